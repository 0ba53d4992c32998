#![forbid(unsafe_code)]

//! `agent-relay-ctl` — operator CLI companion for `agent-relay`.
//!
//! Talks to the server's operational REST surface: list background tasks
//! and cancel one by session id.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "agent-relay-ctl",
    about = "Operator CLI for agent-relay server",
    version,
    long_about = None
)]
struct Cli {
    /// Server base URL.
    #[arg(long, default_value = "http://localhost:8000")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List active and recently completed background tasks.
    List,

    /// Cancel a running task by session id.
    Cancel {
        /// Session identifier.
        session_id: String,
    },
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    let client = reqwest::Client::new();

    let result = match args.command {
        Command::List => list(&client, &args.server).await,
        Command::Cancel { ref session_id } => cancel(&client, &args.server, session_id).await,
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn list(client: &reqwest::Client, server: &str) -> Result<(), String> {
    let payload: serde_json::Value = client
        .get(format!("{server}/api/tasks"))
        .send()
        .await
        .map_err(|err| format!("request failed: {err}"))?
        .json()
        .await
        .map_err(|err| format!("malformed response: {err}"))?;

    let tasks = payload
        .get("tasks")
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();

    if tasks.is_empty() {
        println!("no tasks");
        return Ok(());
    }

    for task in &tasks {
        let field = |key: &str| {
            task.get(key)
                .and_then(serde_json::Value::as_str)
                .unwrap_or("-")
                .to_owned()
        };
        let events = task
            .get("event_count")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        let subscribers = task
            .get("subscriber_count")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        println!(
            "{}  {}  project={}  events={}  subscribers={}",
            field("session_id"),
            field("status"),
            field("project_id"),
            events,
            subscribers,
        );
    }

    Ok(())
}

async fn cancel(client: &reqwest::Client, server: &str, session_id: &str) -> Result<(), String> {
    let response = client
        .post(format!("{server}/api/tasks/{session_id}/cancel"))
        .send()
        .await
        .map_err(|err| format!("request failed: {err}"))?;

    if response.status().is_success() {
        println!("cancelled {session_id}");
        Ok(())
    } else {
        Err(format!("no running task found for session {session_id}"))
    }
}
