/*
[INPUT]:  CLI arguments, YAML configuration file, stdin, OS shutdown signals
[OUTPUT]: Live view of a study's blocking tasks with graceful teardown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskwatch::{DismissError, EventHub, TaskReconciler, TaskwatchConfig, render_view};

#[derive(Parser, Debug)]
#[command(name = "taskwatch", version, about = "Watch the background tasks blocking a study")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: PathBuf,
    #[arg(long = "study", value_name = "ID")]
    study: Option<String>,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    #[arg(long = "dry-run")]
    dry_run: bool,
    /// Exit as soon as nothing is unresolved instead of waiting for a dismiss
    #[arg(long = "exit-on-resolve")]
    exit_on_resolve: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    info!(
        config_path = %args.config_path.display(),
        dry_run = args.dry_run,
        "starting taskwatch"
    );

    let config = load_config(&args.config_path)?;
    info!(
        base_url = %config.api.base_url,
        interval_secs = config.reconcile.interval_secs,
        "configuration loaded"
    );

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let study_id = args
        .study
        .clone()
        .context("--study is required unless --dry-run is set")?;

    let client = Arc::new(config.build_client()?);
    let hub = Arc::new(EventHub::spawn(
        config.api.ws_url.clone(),
        config.api.token.clone(),
    ));
    let mut reconciler =
        TaskReconciler::new(client, Arc::clone(&hub), config.reconciler_settings());

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let mut view_rx = reconciler.view();
    reconciler.start(study_id.clone()).await;

    let mut lines = spawn_stdin_reader();
    let mut stdin_open = true;
    let mut seen_tasks = false;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown signal received");
                break;
            }
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                if view.study_id.is_none() {
                    continue;
                }
                println!("{}", render_view(&view));
                seen_tasks |= !view.tasks.is_empty();
                if args.exit_on_resolve && seen_tasks && !view.has_unresolved {
                    info!("all tasks resolved");
                    break;
                }
            }
            line = lines.recv(), if stdin_open => {
                match line {
                    Some(_) => match reconciler.dismiss().await {
                        Ok(()) => {
                            info!(%study_id, "dismissed");
                            break;
                        }
                        Err(DismissError::Unresolved { count }) => {
                            println!("{count} task(s) still running; cannot dismiss yet");
                        }
                        Err(err) => {
                            warn!(error = %err, "dismiss failed");
                            break;
                        }
                    },
                    None => stdin_open = false,
                }
            }
        }
    }

    reconciler.stop().await;
    info!("reconciler stopped");

    drop(reconciler);
    match Arc::try_unwrap(hub) {
        Ok(mut hub) => hub.shutdown_and_wait().await,
        Err(hub) => hub.shutdown(),
    }
    info!("event hub shutdown complete");

    Ok(())
}

/// Blocking stdin reads cannot be cancelled, so they live on a plain thread
/// that must not hold up runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "failed to read stdin");
                    break;
                }
            }
        }
    });
    rx
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<TaskwatchConfig> {
    let path_str = path
        .to_str()
        .context("config path must be valid utf-8")?;
    TaskwatchConfig::from_file(path_str).context("load config")
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
