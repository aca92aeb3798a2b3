use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use codequarry::cancel::CancellationToken;
use codequarry::config::AppConfig;
use codequarry::registry::IndexRegistry;
use codequarry::watcher::FileWatcherManager;

#[tokio::main]
async fn main() -> Result<()> {
    let log_dir = std::env::var("CODEQUARRY_LOG_DIR").unwrap_or_else(|_| {
        dirs::data_local_dir()
            .map(|d| d.join("codequarry").join("logs").to_string_lossy().to_string())
            .unwrap_or_else(|| ".codequarry-data/logs".to_string())
    });
    std::fs::create_dir_all(&log_dir).ok();

    // Daily rotated log files alongside stdout.
    let file_appender = tracing_appender::rolling::daily(&log_dir, "codequarry.log");
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "codequarry=info".into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    // Log panics before unwinding tears the process down.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        error!(target: "codequarry::panic", location = %location, payload = %payload, "PANIC: thread panicked");
        default_panic(info);
    }));

    let config = AppConfig::from_env();
    if config.watched_roots.is_empty() {
        anyhow::bail!("No watched roots configured; set CODEQUARRY_ROOTS");
    }

    info!(
        data_dir = %config.data_dir.display(),
        roots = config.watched_roots.len(),
        max_file_size_bytes = config.max_file_size_bytes,
        watcher_debounce_ms = config.watcher_debounce_ms,
        index_batch_size = config.index_batch_size,
        "codequarry starting"
    );

    std::fs::create_dir_all(&config.data_dir)?;

    let watcher_manager = Arc::new(FileWatcherManager::new(config.watcher_debounce_ms));
    let registry = Arc::new(IndexRegistry::new(config.clone()));
    let scan_cancel = CancellationToken::new();

    // Start watchers first so no change slips between the scan and the
    // watch window, then reconcile each root in the background.
    for root in &config.watched_roots {
        let builder = match registry.open_root(root) {
            Ok(builder) => builder,
            Err(e) => {
                warn!("Skipping root {}: {e}", root.display());
                continue;
            }
        };

        let key = IndexRegistry::root_key(&dunce::canonicalize(root)?);
        if let Err(e) = watcher_manager.start_watching(&key, root, builder) {
            warn!("Failed to watch {}: {e}", root.display());
        }

        let registry = registry.clone();
        let root = root.clone();
        let cancel = scan_cancel.clone();
        tokio::task::spawn_blocking(move || match registry.scan_root(&root, &cancel) {
            Ok(report) => info!(
                "Initial scan of {}: {} indexed, {} removed, {} unchanged",
                root.display(),
                report.indexed,
                report.removed,
                report.unchanged
            ),
            Err(e) => warn!("Initial scan of {} failed: {e}", root.display()),
        });
    }

    shutdown_signal().await;

    scan_cancel.cancel();
    watcher_manager.stop_all();
    if let Err(e) = registry.close_all() {
        warn!("Error while closing indexes: {e}");
    }

    info!("codequarry shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, initiating shutdown"); },
        _ = terminate => { info!("Received terminate signal, initiating shutdown"); },
    }
}
