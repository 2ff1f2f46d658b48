//! DXX Tracker daemon.
//!
//! Binds the UDP tracker, HTTP, and WebSocket ports, then runs until
//! SIGINT/SIGTERM. Exit code is nonzero only when a socket fails to bind.

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dxx_tracker::network::archive::{ArchiveSink, JsonDirSink, NullSink};
use dxx_tracker::{Config, Supervisor, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("DXX Tracker v{VERSION}");
    let config = Config::from_env()?;
    info!(
        udp = config.udp_port,
        ws = config.ws_port,
        http = config.http_port,
        "configured ports"
    );

    let archive: Box<dyn ArchiveSink> = match &config.archive_dir {
        Some(dir) => {
            info!("archiving finished matches to {}", dir.display());
            Box::new(JsonDirSink::new(dir.clone()))
        }
        None => Box::new(NullSink),
    };

    let mut supervisor = Supervisor::new(config, archive);

    let trigger = supervisor.shutdown_handle();
    let signal_task = tokio::spawn(async move {
        wait_for_signal().await;
        info!("termination signal received");
        trigger.shutdown();
    });

    let result = supervisor.run().await;
    signal_task.abort();
    if let Err(e) = &result {
        error!("tracker failed: {e:#}");
    }
    result
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
