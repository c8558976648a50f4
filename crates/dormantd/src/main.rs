//! dormantd — the Dormant daemon.
//!
//! One process that:
//! - tails the access log (optional) and feeds activity into the controller
//! - serves the query/report API
//! - serves the starter endpoint (optional)
//! - sweeps idle resources on a timer
//! - reloads its config on SIGHUP
//!
//! # Usage
//!
//! ```text
//! dormantd run --config /etc/dormant/dormant.toml
//! dormantd check-config --config ./dormant.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dormant_core::LifecycleConfig;
use dormant_ingest::LogTailer;
use dormantd::{pump_events, Daemon};

const DEFAULT_FILTER: &str = "info,dormantd=debug,dormant=debug";
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(name = "dormantd", version, about = "Idle/activity lifecycle controller")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Run {
        /// Path to dormant.toml.
        #[arg(long, short, default_value = "/etc/dormant/dormant.toml")]
        config: PathBuf,
    },
    /// Validate a config file and print what it configures.
    CheckConfig {
        #[arg(long, short, default_value = "/etc/dormant/dormant.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = LifecycleConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;

    println!("config ok: {}", path.display());
    println!(
        "thresholds: active={:?} idle={:?} system_idle={:?}",
        config.thresholds.active, config.thresholds.idle, config.thresholds.system_idle
    );
    for rule in config.matcher.rules() {
        println!(
            "  {:<24} <- {:?}{}",
            rule.resource_id,
            rule.pattern.as_str(),
            rule.endpoint
                .as_deref()
                .map(|e| format!(" -> {e}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let config = LifecycleConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let service = config.service.clone();
    let ingest = config.ingest.clone();
    info!(
        config = %config_path.display(),
        resources = ?config.resources(),
        "dormant daemon starting"
    );

    let daemon = Arc::new(Daemon::new(config));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    // ── Background tasks ───────────────────────────────────────

    tasks.push(tokio::spawn({
        let reaper = Arc::clone(&daemon.reaper);
        let shutdown = shutdown_rx.clone();
        async move { reaper.run(shutdown).await }
    }));

    if let Some(ingest) = ingest {
        let tailer = LogTailer::new(&ingest).context("building access log parser")?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tasks.push(tokio::spawn(tailer.run(tx, shutdown_rx.clone())));
        tasks.push(tokio::spawn(pump_events(Arc::clone(&daemon.controller), rx)));
    }

    tasks.push(tokio::spawn(reload_on_hangup(
        Arc::clone(&daemon),
        config_path.clone(),
        shutdown_rx.clone(),
    )));

    // ── Starter endpoint ───────────────────────────────────────

    if let Some(addr) = service.starter_listen {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding starter listener {addr}"))?;
        info!(%addr, "starter endpoint listening");
        let router = daemon.starter_router();
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await;
            if let Err(e) = served {
                error!(error = %e, "starter endpoint failed");
            }
        }));
    }

    // ── API server ─────────────────────────────────────────────

    let listener = tokio::net::TcpListener::bind(service.listen)
        .await
        .with_context(|| format!("binding API listener {}", service.listen))?;
    info!(addr = %service.listen, "API server listening");

    axum::serve(listener, daemon.router())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    for task in tasks {
        let _ = task.await;
    }

    info!("dormant daemon stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(unix)]
async fn reload_on_hangup(daemon: Arc<Daemon>, path: PathBuf, mut shutdown: watch::Receiver<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to listen for SIGHUP; reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!(config = %path.display(), "SIGHUP received, reloading");
                if let Err(e) = daemon.reload_from(&path) {
                    error!(error = %format!("{e:#}"), "reload failed, keeping current config");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_daemon: Arc<Daemon>, _path: PathBuf, mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.changed().await;
}
