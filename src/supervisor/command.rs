//! CLI argument-vector construction.
//!
//! Every invocation is config-driven: the prompt, the structured-streaming
//! output format, a session directive (resume vs. create), model and budget
//! ceilings, an optional fallback model, tool pre-approval flags, and a
//! fixed platform context string appended so the agent knows what is
//! driving it.

use crate::config::CliConfig;

/// Tools pre-approved on every invocation unless the project has manual
/// approvals enabled. Without these the CLI blocks waiting for permission
/// input it can never receive once detached from a terminal.
pub const AUTO_APPROVED_TOOLS: &[&str] = &[
    "Read",
    "Write",
    "Edit",
    "Glob",
    "Grep",
    "Bash(*)",
    "WebFetch",
    "WebSearch",
    "NotebookEdit",
];

/// Tool name that signals an interactive question. The CLI blocks on input
/// it will never receive, so the control plane kills the process and parks
/// the task as waiting for input.
pub const INTERACTIVE_QUESTION_TOOL: &str = "AskUserQuestion";

/// Fixed context appended to every invocation via `--append-system-prompt`.
pub const PLATFORM_CONTEXT: &str = "\
# You are running inside agent-relay

You are running as a subprocess of agent-relay, a self-hosted remote \
control for this CLI. The user is chatting with you through a browser, \
not a terminal; your structured output stream is parsed server-side and \
relayed to them over WebSocket in real time.

Important differences from a terminal session:
- Interactive questions work differently here. When you ask one, the \
server pauses this session and resumes it with the user's answer as a \
new message. Prefer stating assumptions over asking when reasonable.
- All assistant messages are persisted server-side and reloaded when the \
user revisits the session, so write responses that stand alone.
- Stored credentials are injected into your environment as variables; use \
them directly instead of prompting for secrets.";

/// Build the argument vector for one CLI invocation.
///
/// `is_continuation` selects `--resume <session>` over `--session-id
/// <session>`; `auto_approve` gates the tool pre-approval flags (disabled
/// when the project requires manual approvals).
#[must_use]
pub fn build_command(
    cli: &CliConfig,
    session_id: &str,
    prompt: &str,
    model: Option<&str>,
    max_budget_usd: Option<f64>,
    is_continuation: bool,
    auto_approve: bool,
) -> Vec<String> {
    let mut cmd: Vec<String> = vec![
        cli.binary.clone(),
        "-p".into(),
        prompt.into(),
        "--output-format".into(),
        "stream-json".into(),
        "--verbose".into(),
    ];

    if is_continuation {
        // Resume an existing CLI session under the same identifier.
        cmd.push("--resume".into());
    } else {
        // First message creates a new CLI session with this identifier.
        cmd.push("--session-id".into());
    }
    cmd.push(session_id.into());

    cmd.push("--model".into());
    cmd.push(model.unwrap_or(&cli.default_model).into());

    cmd.push("--max-budget-usd".into());
    cmd.push(max_budget_usd.unwrap_or(cli.max_budget_usd).to_string());

    if let Some(ref fallback) = cli.fallback_model {
        cmd.push("--fallback-model".into());
        cmd.push(fallback.clone());
    }

    if auto_approve {
        cmd.push("--allowedTools".into());
        cmd.extend(AUTO_APPROVED_TOOLS.iter().map(|t| (*t).to_owned()));
    }

    cmd.push("--append-system-prompt".into());
    cmd.push(PLATFORM_CONTEXT.into());

    cmd
}
