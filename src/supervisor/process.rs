//! Process supervisor — owns the session→process map.
//!
//! Spawns exactly one CLI subprocess per session, streams its stdout
//! through the normalizer into a bounded event channel, drains stderr
//! concurrently so the child can never deadlock on a full pipe, enforces a
//! wall-clock ceiling, and compensates for stale resume handles by
//! retrying a silent continuation failure once as a fresh session.
//!
//! All mutation of the process map goes through one `tokio::sync::Mutex`;
//! the lock is never held across child I/O.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use crate::config::GlobalConfig;
use crate::models::event::StreamEvent;
use crate::persistence::credential_repo::CredentialRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::settings_repo::SettingsRepo;
use crate::stream::codec::StreamCodec;
use crate::stream::parser;
use crate::{AppError, Result};

use super::command::build_command;
use super::environment;

/// Grace period between the graceful signal and the forced kill.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Capacity of the per-invocation event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Cap on captured stderr — enough for any real CLI error message.
const STDERR_CAP_BYTES: usize = 16 * 1024;

/// Cap on retained non-JSON stdout lines kept for diagnostics.
const MAX_DISCARDED_LINES: usize = 100;

/// One prompt to run through the CLI.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    /// Session identifier; doubles as the CLI session id.
    pub session_id: String,
    /// Owning project.
    pub project_id: String,
    /// Working directory for the child.
    pub project_path: PathBuf,
    /// Prompt text.
    pub message: String,
    /// Resume an existing CLI session instead of creating one.
    pub is_continuation: bool,
    /// Model override; falls back to the configured default.
    pub model: Option<String>,
    /// Budget override (USD); falls back to the configured default.
    pub max_budget_usd: Option<f64>,
}

/// A live subprocess owned by the supervisor.
struct RunningProcess {
    project_id: String,
    child: Child,
    started_at: DateTime<Utc>,
    cancelled: Arc<AtomicBool>,
}

/// Outcome of one CLI invocation, after the stream is exhausted.
struct CliRun {
    cancelled: bool,
    timed_out: bool,
    exit_code: Option<i32>,
    exit_success: bool,
    stderr: String,
    discarded: Vec<String>,
    text: String,
}

/// Supervises concurrent CLI subprocess instances, at most one per session.
#[derive(Clone)]
pub struct ProcessSupervisor {
    config: Arc<GlobalConfig>,
    processes: Arc<Mutex<HashMap<String, RunningProcess>>>,
    sessions: SessionRepo,
    credentials: CredentialRepo,
    settings: SettingsRepo,
}

impl ProcessSupervisor {
    /// Create a supervisor with an empty process map.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        sessions: SessionRepo,
        credentials: CredentialRepo,
        settings: SettingsRepo,
    ) -> Self {
        Self {
            config,
            processes: Arc::new(Mutex::new(HashMap::new())),
            sessions,
            credentials,
            settings,
        }
    }

    /// Number of live subprocesses.
    pub async fn active_count(&self) -> usize {
        self.processes.lock().await.len()
    }

    /// Whether a subprocess is currently running for the session.
    pub async fn is_session_busy(&self, session_id: &str) -> bool {
        self.processes.lock().await.contains_key(session_id)
    }

    /// Run a prompt and stream normalized events.
    ///
    /// Returns immediately with the receiving end of a bounded channel; a
    /// detached producer task performs preflight, spawn, streaming, and
    /// cleanup. Preflight failures arrive as a single error event. The
    /// channel closes when the invocation is fully finished.
    #[must_use]
    pub fn run_prompt(&self, request: PromptRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.produce(request, tx).await;
        });
        rx
    }

    /// Cancel the session's subprocess, if one is running.
    ///
    /// Atomically removes the process-map entry, marks it cancelled so the
    /// read loop stops classifying the exit as a failure, and kills the
    /// child. Returns whether a process was actually present.
    pub async fn cancel(&self, session_id: &str) -> bool {
        let removed = self.processes.lock().await.remove(session_id);
        let Some(mut running) = removed else {
            return false;
        };

        running.cancelled.store(true, Ordering::SeqCst);
        kill_process(&mut running.child, session_id).await;
        info!(session_id, "subprocess cancelled");
        true
    }

    /// Kill every live subprocess. Called on server shutdown.
    pub async fn cleanup_all(&self) {
        let session_ids: Vec<String> = self.processes.lock().await.keys().cloned().collect();
        for session_id in session_ids {
            self.cancel(&session_id).await;
        }
    }

    /// Producer task body: preflight, then run (retrying a silent resume
    /// failure once), then record session metadata.
    async fn produce(&self, request: PromptRequest, tx: mpsc::Sender<StreamEvent>) {
        let session_id = request.session_id.clone();

        // Pre-flight: verify the binary exists on PATH.
        if which::which(&self.config.cli.binary).is_err() {
            error!(
                binary = %self.config.cli.binary,
                session_id,
                "CLI binary not found in PATH"
            );
            let _ = tx
                .send(StreamEvent::error(
                    &session_id,
                    format!(
                        "CLI binary '{}' not found in PATH. Make sure it is \
                         installed and available.",
                        self.config.cli.binary
                    ),
                ))
                .await;
            return;
        }

        // Pre-flight: verify the project directory exists.
        if !request.project_path.is_dir() {
            error!(path = %request.project_path.display(), session_id, "project path does not exist");
            let _ = tx
                .send(StreamEvent::error(
                    &session_id,
                    format!(
                        "Project directory not found: {}",
                        request.project_path.display()
                    ),
                ))
                .await;
            return;
        }

        let auto_approve = !self.resolve_approvals(&request.project_id).await;
        let env = self.assemble_env(&request.project_id).await;

        let mut is_continuation = request.is_continuation;
        let mut retried = false;
        let mut preview_source = String::new();

        loop {
            let args = build_command(
                &self.config.cli,
                &session_id,
                &request.message,
                request.model.as_deref(),
                request.max_budget_usd,
                is_continuation,
                auto_approve,
            );
            info!(session_id, is_continuation, "running CLI command");
            debug!(session_id, command = %args.join(" "), "full argument vector");

            let run = match self.run_cli(&args, &request, &env, &tx).await {
                Ok(run) => run,
                Err(err) => {
                    error!(session_id, %err, "failed to run CLI subprocess");
                    let _ = tx
                        .send(StreamEvent::error(
                            &session_id,
                            "Failed to start the CLI subprocess. Check the server logs.",
                        ))
                        .await;
                    break;
                }
            };

            preview_source = run.text;

            if tx.is_closed() {
                // Consumer went away mid-run; nothing left to report to.
                break;
            }

            if !run.exit_success && !run.cancelled && !run.timed_out {
                let has_output = !run.stderr.is_empty() || !run.discarded.is_empty();

                error!(
                    session_id,
                    exit_code = ?run.exit_code,
                    stderr = %truncate(&run.stderr, 500),
                    discarded = run.discarded.len(),
                    "CLI process failed"
                );

                // A resume that produced no diagnostics at all means the CLI
                // session handle has gone stale; retry once from scratch
                // under the same session id.
                if is_continuation && !has_output && !retried {
                    info!(session_id, "resume failed silently, retrying as new session");
                    is_continuation = false;
                    retried = true;
                    continue;
                }

                let message = if run.stderr.is_empty() {
                    if run.discarded.is_empty() {
                        format!(
                            "The CLI exited with {} without any output. Try \
                             running '{} --version' in a terminal to verify \
                             the CLI works.",
                            run.exit_code
                                .map_or_else(|| "a signal".to_owned(), |c| format!("code {c}")),
                            self.config.cli.binary
                        )
                    } else {
                        let tail_start = run.discarded.len().saturating_sub(5);
                        run.discarded[tail_start..].join("\n")
                    }
                } else {
                    truncate(&run.stderr, 500).to_owned()
                };

                let _ = tx.send(StreamEvent::error(&session_id, message)).await;
            }

            break;
        }

        // Record the latest assistant preview; persistence failures must
        // not affect the stream outcome.
        let preview: String = preview_source.chars().take(200).collect();
        if let Err(err) = self.sessions.update_after_message(&session_id, &preview).await {
            warn!(session_id, %err, "failed to update session metadata");
        }
    }

    /// Spawn the subprocess and pump its stdout until EOF, cancellation,
    /// or timeout. The map entry exists exactly while the child runs.
    async fn run_cli(
        &self,
        args: &[String],
        request: &PromptRequest,
        env: &HashMap<String, String>,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<CliRun> {
        let session_id = &request.session_id;
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| AppError::Process("empty argument vector".into()))?;

        let mut child = Command::new(program)
            .args(rest)
            .env_clear()
            .envs(env)
            .current_dir(&request.project_path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::Process(format!("failed to spawn CLI: {err}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Process("failed to capture CLI stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Process("failed to capture CLI stderr".into()))?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let started_at = Utc::now();

        {
            let mut processes = self.processes.lock().await;
            processes.insert(
                session_id.clone(),
                RunningProcess {
                    project_id: request.project_id.clone(),
                    child,
                    started_at,
                    cancelled: Arc::clone(&cancelled),
                },
            );
        }

        // Drain stderr concurrently to prevent pipe buffer deadlock.
        let stderr_task = spawn_stderr_drain(stderr);

        let timeout = Duration::from_secs(self.config.cli.process_timeout_seconds);
        let deadline = tokio::time::Instant::now() + timeout;

        let mut discarded: Vec<String> = Vec::new();
        let mut text = String::new();
        let mut timed_out = false;

        let mut framed = FramedRead::new(stdout, StreamCodec::new());

        'read: loop {
            if cancelled.load(Ordering::SeqCst) {
                break;
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let item = match tokio::time::timeout(remaining, framed.next()).await {
                Err(_elapsed) => {
                    warn!(
                        session_id,
                        timeout_seconds = self.config.cli.process_timeout_seconds,
                        "subprocess exceeded timeout, killing"
                    );
                    self.remove_and_kill(session_id).await;
                    timed_out = true;
                    let _ = tx
                        .send(StreamEvent::error(
                            session_id,
                            format!(
                                "Request timed out after {}s",
                                self.config.cli.process_timeout_seconds
                            ),
                        ))
                        .await;
                    break;
                }
                Ok(item) => item,
            };

            match item {
                None => break, // EOF — child exited or closed stdout.
                Some(Err(AppError::Stream(msg))) => {
                    warn!(session_id, error = %msg, "stream framing error, skipping");
                }
                Some(Err(err)) => {
                    warn!(session_id, %err, "stdout read error, stopping");
                    break;
                }
                Some(Ok(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let events = parser::parse_line(line, session_id);
                    if events.is_empty() {
                        // Non-event output — capture for error diagnostics.
                        if discarded.len() < MAX_DISCARDED_LINES {
                            discarded.push(line.to_owned());
                        }
                        continue;
                    }

                    for event in events {
                        if let StreamEvent::TextDelta { text: ref t, .. } = event {
                            text.push_str(t);
                        }
                        if tx.send(event).await.is_err() {
                            // Consumer is gone; the child would be orphaned.
                            debug!(session_id, "event channel closed, killing subprocess");
                            self.remove_and_kill(session_id).await;
                            break 'read;
                        }
                    }
                }
            }
        }

        // Reap the child. The entry may already be gone if cancel or the
        // timeout path removed it.
        let removed = self.processes.lock().await.remove(session_id);
        let (exit_code, exit_success) = match removed {
            Some(mut running) => {
                let status = running
                    .child
                    .wait()
                    .await
                    .map_err(|err| AppError::Process(format!("failed to reap CLI: {err}")))?;
                (status.code(), status.success())
            }
            None => (None, false),
        };

        let stderr_text = stderr_task.await.unwrap_or_default();

        Ok(CliRun {
            cancelled: cancelled.load(Ordering::SeqCst),
            timed_out,
            exit_code,
            exit_success,
            stderr: stderr_text,
            discarded,
            text,
        })
    }

    /// Remove the map entry and kill the child without marking it
    /// cancelled (timeout and orphan paths).
    async fn remove_and_kill(&self, session_id: &str) {
        let removed = self.processes.lock().await.remove(session_id);
        if let Some(mut running) = removed {
            kill_process(&mut running.child, session_id).await;
        }
    }

    /// Elapsed seconds for a session's live subprocess, if any.
    pub async fn elapsed_seconds(&self, session_id: &str) -> Option<f64> {
        let processes = self.processes.lock().await;
        processes.get(session_id).map(|running| {
            let millis = (Utc::now() - running.started_at).num_milliseconds();
            #[allow(clippy::cast_precision_loss)]
            {
                millis as f64 / 1000.0
            }
        })
    }

    /// Project owning a session's live subprocess, if any.
    pub async fn project_for_session(&self, session_id: &str) -> Option<String> {
        let processes = self.processes.lock().await;
        processes.get(session_id).map(|r| r.project_id.clone())
    }

    async fn resolve_approvals(&self, project_id: &str) -> bool {
        match self.settings.resolve_approvals(project_id).await {
            Ok(enabled) => enabled,
            Err(err) => {
                warn!(project_id, %err, "failed to resolve approvals, defaulting to auto-approve");
                false
            }
        }
    }

    /// Assemble the child environment: inherited minus stripped variables,
    /// plus stored credentials (minus exclusions), plus project overrides.
    async fn assemble_env(&self, project_id: &str) -> HashMap<String, String> {
        let globals = match self.credentials.decrypted_env_map().await {
            Ok(map) => map,
            Err(err) => {
                warn!(project_id, %err, "failed to load credentials for injection");
                HashMap::new()
            }
        };
        let excluded = match self.credentials.excluded_for_project(project_id).await {
            Ok(list) => list,
            Err(err) => {
                warn!(project_id, %err, "failed to load credential exclusions");
                Vec::new()
            }
        };
        let overrides = match self.credentials.project_env_map(project_id).await {
            Ok(map) => map,
            Err(err) => {
                warn!(project_id, %err, "failed to load project env overrides");
                HashMap::new()
            }
        };

        environment::merge_env(std::env::vars(), globals, &excluded, overrides)
    }
}

/// Drain stderr to a capped string so the child never blocks on the pipe.
fn spawn_stderr_drain(mut stderr: ChildStderr) -> JoinHandle<String> {
    use tokio::io::AsyncReadExt;

    tokio::spawn(async move {
        let mut captured: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = STDERR_CAP_BYTES.saturating_sub(captured.len());
                    captured.extend_from_slice(&buf[..n.min(room)]);
                }
            }
        }
        String::from_utf8_lossy(&captured).trim().to_owned()
    })
}

/// Terminate gracefully, wait out the grace period, then force-kill.
///
/// A no-op when the child has already exited.
async fn kill_process(child: &mut Child, session_id: &str) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }

    send_graceful_signal(child);

    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(exit)) => {
            debug!(session_id, ?exit, "subprocess exited after graceful signal");
        }
        Ok(Err(err)) => {
            warn!(session_id, %err, "error waiting for subprocess");
        }
        Err(_elapsed) => {
            warn!(session_id, "subprocess ignored graceful signal, forcing kill");
            if let Err(err) = child.kill().await {
                warn!(session_id, %err, "failed to force-kill subprocess");
            }
        }
    }
}

#[cfg(unix)]
fn send_graceful_signal(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, %err, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn send_graceful_signal(child: &Child) {
    // No graceful signal on this platform; the grace-period wait still
    // applies before the forced kill.
    let _ = child;
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
