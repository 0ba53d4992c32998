#![forbid(unsafe_code)]

//! `agent-relay` — server binary.
//!
//! Bootstraps configuration, connects the database, builds the process
//! supervisor and task registry, and serves the HTTP + WebSocket surface
//! until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::config::GlobalConfig;
use agent_relay::http::{self, AppState};
use agent_relay::persistence::credential_repo::CredentialRepo;
use agent_relay::persistence::db;
use agent_relay::persistence::message_repo::MessageRepo;
use agent_relay::persistence::project_repo::ProjectRepo;
use agent_relay::persistence::session_repo::SessionRepo;
use agent_relay::persistence::settings_repo::SettingsRepo;
use agent_relay::registry::TaskRegistry;
use agent_relay::supervisor::ProcessSupervisor;
use agent_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "AI CLI session relay server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured HTTP port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-relay server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::from_toml_str("")?,
    };
    if let Some(port) = args.port {
        config.http_port = port;
    }
    let config = Arc::new(config);
    info!("configuration loaded");

    // ── Initialize database ─────────────────────────────
    let pool = Arc::new(db::connect(&config.db_path).await?);
    info!(path = %config.db_path.display(), "database connected");

    let sessions = SessionRepo::new(Arc::clone(&pool));
    let messages = MessageRepo::new(Arc::clone(&pool));
    let projects = ProjectRepo::new(Arc::clone(&pool));
    let credentials = CredentialRepo::new(Arc::clone(&pool));
    let settings = SettingsRepo::new(Arc::clone(&pool));

    // ── Build supervisor and registry ───────────────────
    let supervisor = ProcessSupervisor::new(
        Arc::clone(&config),
        sessions.clone(),
        credentials.clone(),
        settings,
    );
    let registry = TaskRegistry::new(
        Arc::clone(&config),
        supervisor.clone(),
        messages.clone(),
    );

    let ct = CancellationToken::new();
    let sweep_handle = registry.spawn_sweep(ct.clone());
    info!("retention sweep started");

    // ── Serve HTTP ──────────────────────────────────────
    let state = AppState {
        config: Arc::clone(&config),
        registry: registry.clone(),
        projects,
        sessions,
        messages,
        credentials,
    };

    let http_ct = ct.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(state, http_ct).await {
            error!(%err, "http surface failed");
        }
    });

    info!(port = config.http_port, "agent-relay ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // Cancel running tasks (persisting partial content), then reap any
    // straggler subprocesses.
    registry.shutdown().await;
    supervisor.cleanup_all().await;

    let _ = tokio::join!(http_handle, sweep_handle);
    info!("agent-relay shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
