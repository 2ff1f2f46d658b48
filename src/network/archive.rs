//! Archive sink.
//!
//! When a match dies its finalized record and merged events are handed to a
//! pluggable sink. The handoff is fire-and-forget: sink failures are logged
//! and in-memory state is not rolled back; a lifecycle is archived at most
//! once.

use chrono::Utc;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::debug;

use crate::game::aggregate::{GameView, TimelineEntry};

/// Finalized match as handed to the sink.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedMatch {
    /// Filename-style id: `ip_port_gameid_unixstart`.
    pub archive_id: String,
    /// Total lifecycle duration in seconds.
    pub duration_secs: u64,
    /// The live record's final merged view.
    #[serde(flatten)]
    pub game: GameView,
}

/// Long-term storage capability.
pub trait ArchiveSink: Send + Sync {
    /// Persist one finished match with its merged event timeline.
    fn save(
        &self,
        finalized: ArchivedMatch,
        events: Vec<TimelineEntry>,
    ) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Discards everything; used in tests and when no store is configured.
#[derive(Debug, Default)]
pub struct NullSink;

impl ArchiveSink for NullSink {
    fn save(
        &self,
        finalized: ArchivedMatch,
        _events: Vec<TimelineEntry>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        debug!(archive_id = %finalized.archive_id, "null sink discarding finished match");
        Box::pin(async { Ok(()) })
    }
}

/// Writes one JSON document per finished match into a directory.
#[derive(Debug)]
pub struct JsonDirSink {
    dir: std::path::PathBuf,
}

impl JsonDirSink {
    /// Sink writing under `dir`; the directory is created on first save.
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveDoc {
    archived_at: chrono::DateTime<Utc>,
    #[serde(flatten)]
    game: ArchivedMatch,
    events: Vec<TimelineEntry>,
}

impl ArchiveSink for JsonDirSink {
    fn save(
        &self,
        finalized: ArchivedMatch,
        events: Vec<TimelineEntry>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        let path = self.dir.join(format!("{}.json", finalized.archive_id));
        let dir = self.dir.clone();
        Box::pin(async move {
            let doc = ArchiveDoc { archived_at: Utc::now(), game: finalized, events };
            let body = serde_json::to_vec_pretty(&doc)?;
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, body).await?;
            Ok(())
        })
    }
}
