//! Background task state and observer fan-out.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::event::StreamEvent;
use crate::models::task::{TaskStatus, TaskSummary, ToolInvocation};
use crate::persistence::message_repo::NewMessage;

/// Capacity of one observer's delivery channel. An observer that falls
/// this far behind is considered dead and dropped.
pub const OBSERVER_CHANNEL_CAPACITY: usize = 64;

/// Delivery handle for one connected observer.
///
/// Fan-out is non-blocking: delivery uses `try_send` into the observer's
/// bounded channel, so a slow or dead observer can never stall event
/// delivery to the task or to other observers.
#[derive(Debug, Clone)]
pub struct ObserverHandle {
    id: Uuid,
    tx: mpsc::Sender<StreamEvent>,
}

impl ObserverHandle {
    /// Create an observer handle plus the receiving end its connection
    /// drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(OBSERVER_CHANNEL_CAPACITY);
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    /// Stable identifier used for unsubscription.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Attempt delivery; `false` means the observer is dead (channel
    /// closed) or hopelessly behind (channel full).
    #[must_use]
    pub fn try_deliver(&self, event: &StreamEvent) -> bool {
        self.tx.try_send(event.clone()).is_ok()
    }
}

/// One session's unit of background work.
///
/// Mutated only by its runner and the registry's subscribe/broadcast
/// paths, always under the registry lock. The event buffer is append-only
/// for the life of the task.
pub(crate) struct BackgroundTask {
    pub(crate) session_id: String,
    pub(crate) project_id: String,
    pub(crate) status: TaskStatus,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) event_buffer: Vec<StreamEvent>,
    pub(crate) observers: Vec<ObserverHandle>,
    pub(crate) cancel: CancellationToken,
    // Accumulators for message persistence.
    pub(crate) full_content: String,
    pub(crate) full_thinking: String,
    pub(crate) tool_uses: Vec<ToolInvocation>,
    pub(crate) final_usage: Option<serde_json::Value>,
    pub(crate) final_cost: Option<f64>,
}

impl BackgroundTask {
    pub(crate) fn new(session_id: String, project_id: String) -> Self {
        Self {
            session_id,
            project_id,
            status: TaskStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            event_buffer: Vec::new(),
            observers: Vec::new(),
            cancel: CancellationToken::new(),
            full_content: String::new(),
            full_thinking: String::new(),
            tool_uses: Vec::new(),
            final_usage: None,
            final_cost: None,
        }
    }

    pub(crate) fn summary(&self) -> TaskSummary {
        let elapsed_ms = (Utc::now() - self.started_at).num_milliseconds();
        #[allow(clippy::cast_precision_loss)]
        let elapsed_seconds = (elapsed_ms as f64 / 100.0).round() / 10.0;
        TaskSummary {
            session_id: self.session_id.clone(),
            project_id: self.project_id.clone(),
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            event_count: self.event_buffer.len(),
            subscriber_count: self.observers.len(),
            elapsed_seconds,
        }
    }

    /// Append to the replay buffer, then fan out to live observers.
    pub(crate) fn push_and_broadcast(&mut self, event: StreamEvent) {
        self.broadcast(&event);
        self.event_buffer.push(event);
    }

    /// Fan out without buffering — used for injected side-channel events
    /// that must not become part of the authoritative stream.
    pub(crate) fn broadcast(&mut self, event: &StreamEvent) {
        self.observers.retain(|observer| observer.try_deliver(event));
    }

    /// Update the persistence accumulators for one stream event.
    pub(crate) fn accumulate(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { text, .. } => self.full_content.push_str(text),
            StreamEvent::ThinkingDelta { thinking, .. } => self.full_thinking.push_str(thinking),
            StreamEvent::ToolUseStart {
                tool_name,
                tool_id,
                input,
                ..
            } => self.tool_uses.push(ToolInvocation::started(
                tool_id.clone(),
                tool_name.clone(),
                input.clone(),
            )),
            StreamEvent::ToolResult {
                tool_id,
                output,
                is_error,
                ..
            } => {
                // Exactly one entry completes; ids are unique per stream.
                if let Some(invocation) = self
                    .tool_uses
                    .iter_mut()
                    .find(|t| t.tool_id == *tool_id && !t.is_complete)
                {
                    invocation.output = Some(output.clone());
                    invocation.is_error = *is_error;
                    invocation.is_complete = true;
                }
            }
            StreamEvent::MessageComplete { usage, cost_usd, .. } => {
                self.final_usage = usage.clone();
                self.final_cost = *cost_usd;
            }
            _ => {}
        }
    }

    /// Whether anything worth persisting has accumulated.
    pub(crate) fn has_content(&self) -> bool {
        !self.full_content.is_empty()
            || !self.full_thinking.is_empty()
            || !self.tool_uses.is_empty()
    }

    /// Snapshot the accumulators as a persistable assistant message.
    pub(crate) fn assistant_message(&self) -> NewMessage {
        NewMessage {
            session_id: self.session_id.clone(),
            role: "assistant".into(),
            content: self.full_content.clone(),
            thinking: self.full_thinking.clone(),
            tool_uses: self.tool_uses.clone(),
            usage: self.final_usage.clone(),
            cost_usd: self.final_cost,
        }
    }
}
