//! Task registry — owns the session→task map.
//!
//! Tasks run to completion independently of observer connections: every
//! normalized event is appended to a replay buffer and fanned out to the
//! current observers under one lock acquisition, so a reconnecting
//! observer that requests replay while subscribing can never see a gap or
//! a duplicate. Completed entries are reclaimed by a periodic sweep once
//! past the retention TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::GlobalConfig;
use crate::models::event::StreamEvent;
use crate::models::task::{TaskStatus, TaskSummary};
use crate::persistence::message_repo::{MessageRepo, NewMessage};
use crate::supervisor::command::INTERACTIVE_QUESTION_TOOL;
use crate::supervisor::{ProcessSupervisor, PromptRequest};
use crate::{AppError, Result};

use super::task::BackgroundTask;
use super::ObserverHandle;

/// Interval between retention sweep passes.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct RegistryInner {
    config: Arc<GlobalConfig>,
    tasks: Mutex<HashMap<String, BackgroundTask>>,
    supervisor: ProcessSupervisor,
    messages: MessageRepo,
}

/// Manages background CLI tasks independently of observer connections.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

impl TaskRegistry {
    /// Create a registry with an empty task map.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        supervisor: ProcessSupervisor,
        messages: MessageRepo,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                tasks: Mutex::new(HashMap::new()),
                supervisor,
                messages,
            }),
        }
    }

    // ── Task creation ────────────────────────────────────────────────────

    /// Start a new background task for a session and return immediately.
    ///
    /// Any terminal task left over for the session is discarded first.
    ///
    /// # Errors
    ///
    /// - `AppError::CapacityExceeded` when the global running-task ceiling
    ///   is reached.
    /// - `AppError::SessionBusy` when a task for this session is already
    ///   running.
    pub async fn start_task(&self, request: PromptRequest) -> Result<TaskSummary> {
        let session_id = request.session_id.clone();
        let cancel;
        let summary;
        {
            let mut tasks = self.inner.tasks.lock().await;

            let running = tasks
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .count();
            let ceiling = usize::try_from(self.inner.config.tasks.max_concurrent)
                .unwrap_or(usize::MAX);
            if running >= ceiling {
                return Err(AppError::CapacityExceeded(format!(
                    "maximum concurrent tasks ({ceiling}) reached; wait for a \
                     task to complete or cancel one"
                )));
            }

            if let Some(existing) = tasks.get(&session_id) {
                if existing.status == TaskStatus::Running {
                    return Err(AppError::SessionBusy(
                        "session is busy; cancel the current request first".into(),
                    ));
                }
                // Terminal leftover — discard so the session can run again.
                tasks.remove(&session_id);
            }

            let task = BackgroundTask::new(session_id.clone(), request.project_id.clone());
            cancel = task.cancel.clone();
            summary = task.summary();
            tasks.insert(session_id.clone(), task);
        }

        // Detach the runner; its lifetime is independent of any caller.
        let registry = self.clone();
        tokio::spawn(async move {
            registry.run_task(request, cancel).await;
        });

        info!(session_id, "background task started");
        Ok(summary)
    }

    // ── Subscription ─────────────────────────────────────────────────────

    /// Register an observer against a session's task.
    ///
    /// Returns whether a task exists for the session. Observers registered
    /// through this method may race the live stream; use
    /// [`subscribe_with_replay`](Self::subscribe_with_replay) for gap-free
    /// catch-up.
    pub async fn subscribe(&self, session_id: &str, observer: ObserverHandle) -> bool {
        let mut tasks = self.inner.tasks.lock().await;
        match tasks.get_mut(session_id) {
            Some(task) => {
                task.observers.push(observer);
                true
            }
            None => false,
        }
    }

    /// Snapshot the replay buffer and register an observer in one lock
    /// acquisition.
    ///
    /// The returned events are everything appended before registration;
    /// every event appended afterwards reaches the observer exactly once
    /// through its live channel.
    pub async fn subscribe_with_replay(
        &self,
        session_id: &str,
        observer: ObserverHandle,
    ) -> Option<(Vec<StreamEvent>, bool)> {
        let mut tasks = self.inner.tasks.lock().await;
        let task = tasks.get_mut(session_id)?;
        let events = task.event_buffer.clone();
        let is_complete = task.status.is_terminal();
        task.observers.push(observer);
        Some((events, is_complete))
    }

    /// Buffered events for replay plus whether the task is terminal.
    pub async fn get_replay(&self, session_id: &str) -> Option<(Vec<StreamEvent>, bool)> {
        let tasks = self.inner.tasks.lock().await;
        let task = tasks.get(session_id)?;
        Some((task.event_buffer.clone(), task.status.is_terminal()))
    }

    /// Remove an observer from one task.
    pub async fn unsubscribe(&self, session_id: &str, observer_id: Uuid) {
        let mut tasks = self.inner.tasks.lock().await;
        if let Some(task) = tasks.get_mut(session_id) {
            task.observers.retain(|o| o.id() != observer_id);
        }
    }

    /// Remove an observer from every task. Called on disconnect — the
    /// underlying tasks keep running.
    pub async fn unsubscribe_all(&self, observer_id: Uuid) {
        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.values_mut() {
            task.observers.retain(|o| o.id() != observer_id);
        }
    }

    // ── Cancellation ─────────────────────────────────────────────────────

    /// Cancel a running task.
    ///
    /// Returns whether the task transitioned running→cancelled. The
    /// supervisor-level "was a process actually killed" outcome is logged,
    /// not returned — a task can be cancelled in the window where its
    /// subprocess has already exited.
    pub async fn cancel_task(&self, session_id: &str) -> bool {
        // Terminal status is set in the same critical section that decides
        // the transition, so the task can never be left "running" behind a
        // kill that races the runner.
        let Some((cancel, snapshot)) = self
            .finish(session_id, TaskStatus::Cancelled)
            .await
        else {
            return false;
        };

        let killed = self.inner.supervisor.cancel(session_id).await;
        debug!(session_id, killed, "task cancelled");
        cancel.cancel();

        self.persist_assistant(session_id, snapshot).await;

        let mut tasks = self.inner.tasks.lock().await;
        if let Some(task) = tasks.get_mut(session_id) {
            task.push_and_broadcast(StreamEvent::Cancelled {
                session_id: session_id.to_owned(),
            });
        }
        true
    }

    // ── Monitoring ───────────────────────────────────────────────────────

    /// Whether a task for the session is currently running.
    pub async fn is_task_running(&self, session_id: &str) -> bool {
        let tasks = self.inner.tasks.lock().await;
        tasks
            .get(session_id)
            .is_some_and(|t| t.status == TaskStatus::Running)
    }

    /// Summaries of every task, running and recently terminal.
    pub async fn list_active(&self) -> Vec<TaskSummary> {
        let tasks = self.inner.tasks.lock().await;
        tasks.values().map(BackgroundTask::summary).collect()
    }

    // ── Broadcasting ─────────────────────────────────────────────────────

    /// Deliver an injected event to a task's observers without buffering
    /// it — side-channel traffic (e.g. generated titles) never becomes
    /// part of the authoritative stream.
    pub async fn broadcast_to_task(&self, session_id: &str, event: StreamEvent) {
        let mut tasks = self.inner.tasks.lock().await;
        if let Some(task) = tasks.get_mut(session_id) {
            task.broadcast(&event);
        }
    }

    // ── Retention sweep ──────────────────────────────────────────────────

    /// Spawn the periodic sweep that reclaims terminal task buffers past
    /// the configured TTL. Runs until the token fires.
    #[must_use]
    pub fn spawn_sweep(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("retention sweep shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        registry.sweep_expired().await;
                    }
                }
            }
        })
    }

    /// Remove terminal tasks whose buffers have outlived the TTL. Never
    /// touches running tasks.
    pub async fn sweep_expired(&self) {
        let ttl = chrono::Duration::seconds(
            i64::try_from(self.inner.config.tasks.buffer_ttl_seconds).unwrap_or(i64::MAX),
        );
        let now = Utc::now();

        let mut tasks = self.inner.tasks.lock().await;
        tasks.retain(|session_id, task| {
            let expired = task.status.is_terminal()
                && task
                    .completed_at
                    .is_some_and(|done| now - done > ttl);
            if expired {
                debug!(session_id, "reclaimed expired task buffer");
            }
            !expired
        });
    }

    // ── Shutdown ─────────────────────────────────────────────────────────

    /// Cancel every running task and persist what has accumulated.
    pub async fn shutdown(&self) {
        let session_ids: Vec<String> = {
            let tasks = self.inner.tasks.lock().await;
            tasks
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .map(|t| t.session_id.clone())
                .collect()
        };
        for session_id in session_ids {
            self.cancel_task(&session_id).await;
        }
    }

    // ── Task runner ──────────────────────────────────────────────────────

    /// Runner body: one detached unit of work per task.
    ///
    /// The stream consumer runs in its own spawned task so that a panic
    /// anywhere inside it is caught at this boundary instead of leaving
    /// the task permanently marked running.
    async fn run_task(&self, request: PromptRequest, cancel: CancellationToken) {
        let session_id = request.session_id.clone();

        let worker = {
            let registry = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { registry.consume_stream(request, &cancel).await })
        };

        if let Err(err) = worker.await {
            error!(session_id, %err, "task runner failed");
            let snapshot = self
                .finish(&session_id, TaskStatus::Error)
                .await
                .and_then(|(_, s)| s);
            self.persist_assistant(&session_id, snapshot).await;

            let mut tasks = self.inner.tasks.lock().await;
            if let Some(task) = tasks.get_mut(&session_id) {
                task.push_and_broadcast(StreamEvent::error(
                    &session_id,
                    "Something went wrong processing your message. Please try again.",
                ));
            }
        }
    }

    /// Consume the supervisor's event stream to a terminal state.
    async fn consume_stream(&self, request: PromptRequest, cancel: &CancellationToken) {
        let session_id = request.session_id.clone();

        {
            let mut tasks = self.inner.tasks.lock().await;
            let Some(task) = tasks.get_mut(&session_id) else {
                return;
            };
            task.push_and_broadcast(StreamEvent::MessageStart {
                session_id: session_id.clone(),
            });
        }

        let mut events = self.inner.supervisor.run_prompt(request);

        loop {
            let event = tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    // cancel_task owns status, persistence, and broadcast.
                    return;
                }

                event = events.recv() => event,
            };

            let Some(event) = event else {
                break; // Stream exhausted.
            };

            let interactive = matches!(
                &event,
                StreamEvent::ToolUseStart { tool_name, .. }
                    if tool_name == INTERACTIVE_QUESTION_TOOL
            );

            {
                // Buffer append, fan-out, and accumulator updates share one
                // lock acquisition so replay is always prefix-consistent.
                let mut tasks = self.inner.tasks.lock().await;
                let Some(task) = tasks.get_mut(&session_id) else {
                    return;
                };
                task.accumulate(&event);
                task.push_and_broadcast(event);
            }

            if interactive {
                // The CLI blocks on input it can never receive once
                // detached from a terminal; kill it and park the session
                // until the next user message resumes it.
                self.inner.supervisor.cancel(&session_id).await;
                let snapshot = self
                    .finish(&session_id, TaskStatus::WaitingForInput)
                    .await
                    .and_then(|(_, s)| s);
                self.persist_assistant(&session_id, snapshot).await;

                let mut tasks = self.inner.tasks.lock().await;
                if let Some(task) = tasks.get_mut(&session_id) {
                    task.push_and_broadcast(StreamEvent::InputRequired {
                        session_id: session_id.clone(),
                    });
                }
                return;
            }
        }

        // The subprocess should be gone once its stream ends; anything
        // still in the map is a straggler.
        if self.inner.supervisor.is_session_busy(&session_id).await {
            warn!(session_id, "force-cleaning busy session after stream end");
            self.inner.supervisor.cancel(&session_id).await;
        }

        let snapshot = self
            .finish(&session_id, TaskStatus::Completed)
            .await
            .and_then(|(_, s)| s);
        self.persist_assistant(&session_id, snapshot).await;
    }

    /// Transition a still-running task to a terminal status.
    ///
    /// Returns `None` if the task is gone or already terminal — the
    /// guarantee that every terminal path persists at most once.
    async fn finish(
        &self,
        session_id: &str,
        status: TaskStatus,
    ) -> Option<(CancellationToken, Option<NewMessage>)> {
        let mut tasks = self.inner.tasks.lock().await;
        let task = tasks.get_mut(session_id)?;
        if task.status != TaskStatus::Running {
            return None;
        }
        task.status = status;
        task.completed_at = Some(Utc::now());
        let snapshot = task.has_content().then(|| task.assistant_message());
        Some((task.cancel.clone(), snapshot))
    }

    /// Best-effort persistence of the accumulated assistant message.
    async fn persist_assistant(&self, session_id: &str, snapshot: Option<NewMessage>) {
        let Some(message) = snapshot else {
            return;
        };
        if let Err(err) = self.inner.messages.save_message(message).await {
            warn!(session_id, %err, "failed to persist assistant message");
        }
    }
}
