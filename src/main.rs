#![forbid(unsafe_code)]

//! `agent-conduit` — agent subprocess bridge binary.
//!
//! Bootstraps configuration, connects the configured agent subprocess,
//! and serves the gateway lease endpoint so a peer client can attach to
//! the running agent over a Unix socket.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conduit::audit::JsonlActivityRecorder;
use agent_conduit::config::GlobalConfig;
use agent_conduit::connection::SpawnOptions;
use agent_conduit::manager::{ConnectOptions, ConnectionManager};
use agent_conduit::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-conduit", about = "Agent subprocess bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the default workspace root.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Connection name for the primary agent.
    #[arg(long, default_value = "primary")]
    name: String,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-conduit bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config_text = std::fs::read_to_string(&args.config)
        .map_err(|err| AppError::Config(format!("cannot read config: {err}")))?;
    let mut config = GlobalConfig::from_toml_str(&config_text)?;

    if let Some(ws) = args.workspace {
        let canonical = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
        config.default_workspace_root = canonical;
    }
    let config = Arc::new(config);
    info!("configuration loaded");

    // ── Build the connection manager ────────────────────
    let mut manager = ConnectionManager::new().with_terminal_limits(
        config.terminal.default_output_byte_limit,
        std::time::Duration::from_millis(config.timeouts.terminal_kill_grace_ms),
    );
    if config.activity.enabled {
        let recorder = Arc::new(JsonlActivityRecorder::new(config.activity_dir())?);
        manager = manager.with_activity_recorder(recorder, config.activity.known_tools.clone());
    }
    let manager = Arc::new(manager);

    // ── Connect the primary agent ───────────────────────
    let agent = config.agent_for(&args.name);
    let spawn = SpawnOptions {
        command: agent.command.clone(),
        args: agent.args.clone(),
        env: agent.env.clone(),
        cwd: Some(
            agent
                .cwd
                .clone()
                .unwrap_or_else(|| config.default_workspace_root.clone()),
        ),
        shutdown_grace: std::time::Duration::from_millis(config.timeouts.shutdown_grace_ms),
    };
    let mut options = ConnectOptions::new(spawn, config.default_workspace_root.clone());
    options.auto_approve = config.auto_approve;
    options.permission_policy = config.permissions.clone();

    let session = manager.connect(&args.name, options).await?;
    info!(name = %args.name, session_id = %session.session_id, "primary agent ready");

    // ── Serve the gateway lease endpoint ────────────────
    let ct = CancellationToken::new();
    let lease_handle = spawn_lease_listener(&config, Arc::clone(&manager), &args.name, ct.clone());

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    manager.dispose_all().await;
    if let Some(handle) = lease_handle {
        let _ = handle.await;
    }
    info!("agent-conduit shut down");

    Ok(())
}

/// Accept peer connections on a Unix socket and hand them to the gateway.
#[cfg(unix)]
fn spawn_lease_listener(
    config: &GlobalConfig,
    manager: Arc<ConnectionManager>,
    name: &str,
    ct: CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    let socket_dir = config.default_workspace_root.join(".conduit");
    if let Err(err) = std::fs::create_dir_all(&socket_dir) {
        error!(%err, "cannot create lease socket directory");
        return None;
    }
    let socket_path = socket_dir.join(format!("{}.sock", config.ipc_name));
    // Stale socket from a previous run.
    let _ = std::fs::remove_file(&socket_path);

    let listener = match tokio::net::UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(path = %socket_path.display(), %err, "cannot bind lease socket");
            return None;
        }
    };
    info!(path = %socket_path.display(), "lease endpoint listening");

    let name = name.to_owned();
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                () = ct.cancelled() => break,

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            if let Err(err) = manager.accept_lease(&name, stream) {
                                warn!(name = %name, %err, "lease rejected");
                            }
                        }
                        Err(err) => {
                            warn!(%err, "lease accept failed");
                        }
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&socket_path);
    }))
}

/// Lease endpoint requires Unix sockets; unavailable on this platform.
#[cfg(not(unix))]
fn spawn_lease_listener(
    _config: &GlobalConfig,
    _manager: Arc<ConnectionManager>,
    _name: &str,
    _ct: CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    warn!("lease endpoint not supported on this platform");
    None
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
