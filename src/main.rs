use std::env;
use std::path::Path;

use d_keeper::utils::file_io::open_file_for_append;
use d_keeper::KeeperConfig;
use d_keeper::KeeperServer;
use d_keeper::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

/// Usage: `d-keeper [config-file]`
///
/// Without an argument the configuration comes from defaults, `CONFIG_PATH`
/// and `KEEPER__*` environment variables.
#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    let mut config = KeeperConfig::new()?;
    if let Some(path) = env::args().nth(1) {
        config = config.with_override_config(&path)?;
    }
    let config = config.validate()?;

    let _guard = init_observability(&config.server.log_dir)?;

    let server = KeeperServer::new(config);
    let addr = server.start().await?;
    info!(%addr, "keeper started. Waiting for a shutdown signal...");

    wait_for_signal().await;

    if let Err(e) = server.shutdown().await {
        error!("shutdown failed: {}", e);
        return Err(e);
    }
    info!("Exiting program.");
    Ok(())
}

async fn wait_for_signal() {
    let (mut sigint, mut sigterm) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        _ => {
            error!("signal handlers unavailable, falling back to Ctrl+C");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("waiting for Ctrl+C failed: {}", e);
            }
            return;
        }
    };
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
    }
}

fn init_observability(log_dir: &Path) -> Result<WorkerGuard> {
    let log_file = open_file_for_append(log_dir.join("keeper.log"))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(file_layer).init();

    Ok(guard)
}
