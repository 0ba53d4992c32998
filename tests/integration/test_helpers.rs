//! Shared helpers for integration tests.
//!
//! Provides reusable construction of the supervisor/registry pair over an
//! in-memory database, plus stub CLI scripts so tests can drive real
//! subprocesses without the actual CLI installed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use agent_relay::config::GlobalConfig;
use agent_relay::models::event::StreamEvent;
use agent_relay::persistence::credential_repo::CredentialRepo;
use agent_relay::persistence::db;
use agent_relay::persistence::message_repo::MessageRepo;
use agent_relay::persistence::project_repo::ProjectRepo;
use agent_relay::persistence::session_repo::SessionRepo;
use agent_relay::persistence::settings_repo::SettingsRepo;
use agent_relay::registry::TaskRegistry;
use agent_relay::supervisor::{ProcessSupervisor, PromptRequest};

/// Everything a test needs to drive the control plane end to end.
pub struct Harness {
    pub config: Arc<GlobalConfig>,
    pub supervisor: ProcessSupervisor,
    pub registry: TaskRegistry,
    pub sessions: SessionRepo,
    pub messages: MessageRepo,
    pub projects: ProjectRepo,
    pub credentials: CredentialRepo,
    pub settings: SettingsRepo,
}

/// Build a `GlobalConfig` for tests around a stub CLI binary.
pub fn test_config(binary: &str, timeout_seconds: u64, max_concurrent: u32) -> GlobalConfig {
    let toml = format!(
        r#"
http_port = 0

[cli]
binary = '{binary}'
process_timeout_seconds = {timeout_seconds}

[tasks]
max_concurrent = {max_concurrent}
buffer_ttl_seconds = 3600
"#
    );
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}

/// Build the full harness over an in-memory database.
pub async fn harness(config: GlobalConfig) -> Harness {
    let pool = Arc::new(db::connect_memory().await.expect("in-memory db"));
    let config = Arc::new(config);

    let sessions = SessionRepo::new(Arc::clone(&pool));
    let messages = MessageRepo::new(Arc::clone(&pool));
    let projects = ProjectRepo::new(Arc::clone(&pool));
    let credentials = CredentialRepo::new(Arc::clone(&pool));
    let settings = SettingsRepo::new(Arc::clone(&pool));

    let supervisor = ProcessSupervisor::new(
        Arc::clone(&config),
        sessions.clone(),
        credentials.clone(),
        settings.clone(),
    );
    let registry = TaskRegistry::new(Arc::clone(&config), supervisor.clone(), messages.clone());

    Harness {
        config,
        supervisor,
        registry,
        sessions,
        messages,
        projects,
        credentials,
        settings,
    }
}

/// Write an executable stub CLI script into `dir` and return its path.
#[cfg(unix)]
pub fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write stub script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("mark stub executable");
    path
}

/// A stub that streams one thinking block, one text block, and a result.
#[cfg(unix)]
pub fn happy_stub(dir: &Path) -> PathBuf {
    write_stub(
        dir,
        "happy.sh",
        concat!(
            r#"printf '{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"pondering"}]}}\n'"#,
            "\n",
            r#"printf '{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}\n'"#,
            "\n",
            r#"printf '{"type":"result","result":"hello","usage":{"output_tokens":5},"cost_usd":0.01}\n'"#,
            "\n",
        ),
    )
}

/// A stub that emits one start line and then blocks until killed.
#[cfg(unix)]
pub fn hanging_stub(dir: &Path) -> PathBuf {
    write_stub(
        dir,
        "hang.sh",
        concat!(
            r#"printf '{"type":"assistant","message":{"content":[{"type":"text","text":"started"}]}}\n'"#,
            "\n",
            "exec sleep 30\n",
        ),
    )
}

/// Build a prompt request rooted at `project_path`.
pub fn request(session_id: &str, project_path: &Path, is_continuation: bool) -> PromptRequest {
    PromptRequest {
        session_id: session_id.to_owned(),
        project_id: "proj-1".to_owned(),
        project_path: project_path.to_owned(),
        message: "do the thing".to_owned(),
        is_continuation,
        model: None,
        max_budget_usd: None,
    }
}

/// Drain a supervisor event channel until it closes or `wait` elapses.
pub async fn collect_events(
    mut rx: mpsc::Receiver<StreamEvent>,
    wait: Duration,
) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) | Err(_) => break,
        }
    }
    events
}

/// Receive events until one matches `pred`, failing after `wait`.
pub async fn recv_until<F>(
    rx: &mut mpsc::Receiver<StreamEvent>,
    wait: Duration,
    mut pred: F,
) -> Vec<StreamEvent>
where
    F: FnMut(&StreamEvent) -> bool,
{
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let event = tokio::time::timeout(remaining, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed before expected event");
        let done = pred(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Poll until the session's task leaves `running`, failing after `wait`.
pub async fn wait_until_terminal(registry: &TaskRegistry, session_id: &str, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    while registry.is_task_running(session_id).await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "task for {session_id} never reached a terminal state"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
