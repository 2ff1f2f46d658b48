//! Snapshot file writer.
//!
//! A single task owns the snapshot path. Mutations nudge it through a small
//! channel (bursts coalesce into one write) and the poll ticker nudges it
//! unconditionally. The document is written to a temp file and renamed into
//! place so readers never observe a truncated JSON. Write failures are
//! non-critical and only logged at debug.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::game::aggregate::{GameView, GamelogDigest};
use crate::state::TrackerState;

/// Snapshot document schema. Consumers tolerate missing optional fields.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDoc {
    /// Write timestamp.
    pub updated_at: DateTime<Utc>,
    /// Confirmed games with merged player tables.
    pub games: Vec<GameView>,
    /// Top-level gamelog digest.
    pub gamelog: GamelogDigest,
}

/// Drain nudges and rewrite the snapshot until shutdown.
pub async fn run_writer(
    state: Arc<TrackerState>,
    mut nudges: mpsc::Receiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            nudge = nudges.recv() => {
                if nudge.is_none() {
                    break;
                }
                // Coalesce whatever piled up behind this nudge.
                while nudges.try_recv().is_ok() {}
                write_snapshot(&state).await;
            }
            _ = shutdown.recv() => {
                // Drain: one final write so the file reflects the end state.
                write_snapshot(&state).await;
                break;
            }
        }
    }
}

/// Build and atomically persist the document.
pub async fn write_snapshot(state: &TrackerState) {
    let doc = SnapshotDoc {
        updated_at: Utc::now(),
        games: state.games_summary().await,
        gamelog: state.build_digest().await,
    };

    let body = match serde_json::to_vec_pretty(&doc) {
        Ok(body) => body,
        Err(e) => {
            debug!("snapshot serialize failed: {e}");
            return;
        }
    };

    let path = &state.config.snapshot_path;
    let tmp = path.with_extension("json.tmp");
    let result = async {
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;
    if let Err(e) = result {
        debug!("snapshot write failed: {e}");
    }
}
