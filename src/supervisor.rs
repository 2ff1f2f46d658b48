//! Process supervisor.
//!
//! Brings up the UDP engine, the HTTP and WebSocket surfaces, the local
//! gamelog watcher, and the poll/cleanup/snapshot background loops, then
//! waits for the shutdown signal. Drain order on shutdown: the UDP receive
//! loop first (no new state enters), then tickers and the watcher, then the
//! read surfaces, and the snapshot writer last so the file reflects the end
//! state. Each stage gets a bounded grace period.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::Config;
use crate::gamelog::watcher;
use crate::network::archive::ArchiveSink;
use crate::network::engine::ProtocolEngine;
use crate::network::{http, snapshot, ws};
use crate::state::TrackerState;

/// Per-stage shutdown grace.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Owns the shared state and the shutdown signal.
pub struct Supervisor {
    state: Arc<TrackerState>,
    shutdown_tx: broadcast::Sender<()>,
    snapshot_rx: Option<mpsc::Receiver<()>>,
}

impl Supervisor {
    /// Assemble the tracker around `config` and an archive sink.
    pub fn new(config: Config, archive: Box<dyn ArchiveSink>) -> Self {
        let (state, snapshot_rx) = TrackerState::new(config, archive);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { state, shutdown_tx, snapshot_rx: Some(snapshot_rx) }
    }

    /// Shared state handle.
    pub fn state(&self) -> Arc<TrackerState> {
        self.state.clone()
    }

    /// Signal every loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Clonable trigger usable from signal handlers while `run` borrows the
    /// supervisor.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Bind everything and run until [`Supervisor::shutdown`]. Socket bind
    /// failures are the only fatal startup errors.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let state = self.state.clone();
        let snapshot_rx = self
            .snapshot_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("supervisor already ran"))?;

        let engine = Arc::new(ProtocolEngine::bind(state.clone()).await?);
        let ws_listener = TcpListener::bind(("0.0.0.0", state.config.ws_port)).await?;
        let http_listener = TcpListener::bind(("0.0.0.0", state.config.http_port)).await?;

        let receive: JoinHandle<()> =
            tokio::spawn(engine.clone().run(self.shutdown_tx.subscribe()));

        let middle: Vec<JoinHandle<()>> = vec![
            tokio::spawn(engine.clone().run_poll_loop(self.shutdown_tx.subscribe())),
            tokio::spawn(engine.clone().run_cleanup_loop(self.shutdown_tx.subscribe())),
            tokio::spawn(watcher::run_watcher(state.clone(), self.shutdown_tx.subscribe())),
        ];

        let readers: Vec<JoinHandle<()>> = vec![
            tokio::spawn(ws::run_acceptor(ws_listener, state.clone(), self.shutdown_tx.subscribe())),
            tokio::spawn(http::run_http(http_listener, state.clone(), self.shutdown_tx.subscribe())),
        ];

        let writer: JoinHandle<()> = tokio::spawn(snapshot::run_writer(
            state.clone(),
            snapshot_rx,
            self.shutdown_tx.subscribe(),
        ));

        info!("tracker up");
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = shutdown_rx.recv().await;
        info!("shutting down");

        drain("udp receive loop", vec![receive]).await;
        drain("tickers and watcher", middle).await;
        drain("read surfaces", readers).await;
        drain("snapshot writer", vec![writer]).await;
        info!("shutdown complete");
        Ok(())
    }
}

/// Detached trigger for the supervisor's shutdown signal.
#[derive(Clone)]
pub struct ShutdownHandle(broadcast::Sender<()>);

impl ShutdownHandle {
    /// Signal every loop to stop.
    pub fn shutdown(&self) {
        let _ = self.0.send(());
    }
}

async fn drain(stage: &str, handles: Vec<JoinHandle<()>>) {
    for mut handle in handles {
        if timeout(DRAIN_GRACE, &mut handle).await.is_err() {
            warn!("{stage} did not stop in time; aborting");
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::archive::NullSink;

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let mut config = Config::default();
        config.udp_port = 0;
        config.ws_port = 0;
        config.http_port = 0;
        config.gamelog_dirs = Vec::new();
        config.snapshot_path =
            std::env::temp_dir().join(format!("supervisor-test-{}.json", std::process::id()));

        let mut supervisor = Supervisor::new(config, Box::new(NullSink));
        let state = supervisor.state();
        assert_eq!(state.registry.read().await.len(), 0);

        let shutdown_tx = supervisor.shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = shutdown_tx.send(());
        });
        timeout(Duration::from_secs(10), supervisor.run()).await.unwrap().unwrap();
    }
}
