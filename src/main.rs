//! Process shell: configuration, logging, signals.

mod app;
mod config;
mod feed;
mod pipeline;
mod routes;

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::app::Watcher;
use crate::config::WatcherConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WALLWATCH_CONFIG").ok())
        .unwrap_or_else(|| "wallwatch.toml".to_string());

    let config = WatcherConfig::load(Path::new(&config_path))
        .with_context(|| format!("loading configuration from '{config_path}'"))?;

    // Keep the guard alive for the life of the process so buffered log lines
    // are flushed on exit.
    let _log_guard = init_tracing(config.log_file.as_deref());

    info!("Initializing...");
    let mut watcher = Watcher::new(config.clone())
        .await
        .context("initializing watcher")?;

    if let Some(addr) = config.management_addr {
        let status = watcher.status();
        tokio::spawn(async move {
            if let Err(e) = routes::serve(addr, status).await {
                tracing::error!("Management interface failed: {}", e);
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    println!("Wallpaper watcher started.");
    watcher.run(shutdown_rx).await;
    println!("Wallpaper watcher stopped.");
    Ok(())
}

/// Wait for SIGINT or, on unix, SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Route log output to stdout, or to a file when one is configured
fn init_tracing(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wallwatch=info"));

    match log_file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .map_or_else(|| PathBuf::from("wallwatch.log"), PathBuf::from);
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}
