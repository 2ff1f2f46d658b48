//! Shared tracker state.
//!
//! One [`TrackerState`] is shared by every task: the UDP engine, the HTTP
//! and WebSocket surfaces, the tickers, and the local gamelog watcher.
//! Mutation goes through the two `RwLock`s; the lock discipline is acquire,
//! mutate or copy, release, then do I/O. Where both locks are needed the
//! registry is always taken first.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::config::Config;
use crate::game::aggregate::{self, GameView, GamelogDigest};
use crate::game::record::{match_key_string, GameRecord};
use crate::game::registry::GameRegistry;
use crate::gamelog::uploads::UploadStore;
use crate::network::archive::{ArchiveSink, ArchivedMatch};
use crate::network::ws::{WsFrame, WsHub};

/// Process-wide shared state.
pub struct TrackerState {
    /// Tracker configuration.
    pub config: Config,
    /// Active-game registry.
    pub registry: RwLock<GameRegistry>,
    /// Uploaded and locally watched textual streams.
    pub uploads: RwLock<UploadStore>,
    /// WebSocket fan-out.
    pub hub: WsHub,
    /// Long-term storage capability.
    pub archive: Box<dyn ArchiveSink>,
    /// Process start, for uptime reporting.
    pub started: Instant,
    snapshot_tx: mpsc::Sender<()>,
}

impl TrackerState {
    /// Build shared state plus the receiver the snapshot writer drains.
    pub fn new(config: Config, archive: Box<dyn ArchiveSink>) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (snapshot_tx, snapshot_rx) = mpsc::channel(16);
        let state = Arc::new(Self {
            config,
            registry: RwLock::new(GameRegistry::new()),
            uploads: RwLock::new(UploadStore::new()),
            hub: WsHub::new(),
            archive,
            started: Instant::now(),
            snapshot_tx,
        });
        (state, snapshot_rx)
    }

    /// Ask the snapshot writer for a rewrite. Coalesces naturally: a full
    /// queue means a write is already owed.
    pub fn nudge_snapshot(&self) {
        let _ = self.snapshot_tx.try_send(());
    }

    /// Seconds since process start.
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Merged views of every confirmed match.
    pub async fn games_summary(&self) -> Vec<GameView> {
        let registry = self.registry.read().await;
        let uploads = self.uploads.read().await;
        registry.confirmed().map(|record| aggregate::game_view(record, &uploads)).collect()
    }

    /// Top-level gamelog digest over all live matches and streams.
    pub async fn build_digest(&self) -> GamelogDigest {
        let registry = self.registry.read().await;
        let uploads = self.uploads.read().await;
        aggregate::digest(registry.iter(), &uploads)
    }

    /// Publish the digest as a `game_summary` frame.
    pub async fn publish_summary(&self) {
        let digest = self.build_digest().await;
        self.hub.broadcast(&WsFrame::GameSummary(digest)).await;
    }

    /// Finish a dead record: hand it to the archive sink (fire-and-forget),
    /// tell subscribers, and schedule a snapshot rewrite.
    pub async fn finish_record(&self, record: GameRecord) {
        let (view, events) = {
            let uploads = self.uploads.read().await;
            (
                aggregate::game_view(&record, &uploads),
                aggregate::merged_timeline(std::iter::once(&record), &uploads),
            )
        };
        let finalized = ArchivedMatch {
            archive_id: record.archive_id(),
            duration_secs: record.created_at.elapsed().as_secs(),
            game: view,
        };
        let id = finalized.archive_id.clone();

        // Sink failures must not stall the tracker, and the lifecycle is
        // one-shot: no retry on a later reap.
        let save = self.archive.save(finalized, events);
        tokio::spawn(async move {
            if let Err(e) = save.await {
                warn!(archive_id = %id, "archive sink failed: {e:#}");
            }
        });

        self.hub
            .broadcast(&WsFrame::GameRemoved {
                id: match_key_string(&record.key),
                game_id: record.game_id,
            })
            .await;
        self.nudge_snapshot();
        debug!(key = %match_key_string(&record.key), "match finished");
    }
}
