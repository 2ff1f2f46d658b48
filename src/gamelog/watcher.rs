//! Local gamelog watcher.
//!
//! Tails `gamelog.txt` in the configured directories into the upload store,
//! under the configured local identity. Files present at startup are read
//! from their current end so stale matches are skipped; a file that shrinks
//! is a new match and resets the stream. Change detection is filesystem
//! notifications with a polling fallback, since DXX writes with plain
//! appends that some platforms never report.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::gamelog::parser;
use crate::network::ws::WsFrame;
use crate::state::TrackerState;

/// Polling fallback cadence.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Identity used when nothing is configured and nothing could be inferred.
const FALLBACK_IDENTITY: &str = "local";

/// Stop trying to infer an identity once this much content passed without
/// one; commit to the fallback instead.
const INFER_LIMIT: usize = 64 * 1024;

struct WatchedLog {
    offset: u64,
}

/// Tail local gamelogs until shutdown.
pub async fn run_watcher(state: Arc<TrackerState>, mut shutdown: broadcast::Receiver<()>) {
    let dirs: Vec<PathBuf> =
        state.config.gamelog_dirs.iter().filter(|d| d.is_dir()).cloned().collect();
    if dirs.is_empty() {
        debug!("no gamelog directories exist; watcher idle");
        return;
    }
    info!("watching {} gamelog directories", dirs.len());

    let mut tracker = LogTracker::new(state.clone());
    tracker.initial_scan(&dirs).await;

    // Notifications nudge the same scan the poll timer runs; coalescing and
    // shrink detection all live in the scan itself.
    let (fs_tx, mut fs_rx) = mpsc::channel::<()>(8);
    let mut watcher = match notify::recommended_watcher(move |_event| {
        let _ = fs_tx.try_send(());
    }) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("filesystem watcher unavailable, polling only: {e}");
            None
        }
    };
    if let Some(watcher) = watcher.as_mut() {
        for dir in &dirs {
            if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                warn!("cannot watch {}: {e}", dir.display());
            }
        }
    }

    let mut poll = interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = poll.tick() => tracker.scan(&dirs).await,
            Some(()) = fs_rx.recv() => tracker.scan(&dirs).await,
            _ = shutdown.recv() => break,
        }
    }
}

struct LogTracker {
    state: Arc<TrackerState>,
    files: BTreeMap<PathBuf, WatchedLog>,
    /// Resolved local identity; starts from config, may be inferred.
    identity: Option<String>,
    /// Set when the identity came from the stream instead of config.
    inferred: bool,
    /// Content held back while the identity is still unknown.
    pending: String,
}

impl LogTracker {
    fn new(state: Arc<TrackerState>) -> Self {
        let identity = state.config.local_player.clone();
        Self { state, files: BTreeMap::new(), identity, inferred: false, pending: String::new() }
    }

    /// Record current sizes so content from before startup is skipped.
    async fn initial_scan(&mut self, dirs: &[PathBuf]) {
        for dir in dirs {
            let path = dir.join("gamelog.txt");
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                info!("tracking {} from offset {}", path.display(), meta.len());
                self.files.insert(path, WatchedLog { offset: meta.len() });
            }
        }
    }

    async fn scan(&mut self, dirs: &[PathBuf]) {
        // Files appearing after startup belong to a fresh match: read fully.
        for dir in dirs {
            let path = dir.join("gamelog.txt");
            if !self.files.contains_key(&path) && tokio::fs::metadata(&path).await.is_ok() {
                info!("new gamelog appeared: {}", path.display());
                self.files.insert(path, WatchedLog { offset: 0 });
            }
        }

        let paths: Vec<PathBuf> = self.files.keys().cloned().collect();
        for path in paths {
            let len = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(_) => continue,
            };
            let offset = self.files.get(&path).map(|f| f.offset).unwrap_or(0);

            if len < offset {
                // Truncation: the game started a new log.
                self.on_reset().await;
                self.read_from(&path, 0, len).await;
            } else if len > offset {
                self.read_from(&path, offset, len).await;
            }
        }
    }

    async fn on_reset(&mut self) {
        let player = self.current_identity();
        info!(player = %player, "gamelog shrank; resetting stream");
        self.pending.clear();
        self.state.uploads.write().await.reset(&player);
        self.state.hub.broadcast(&WsFrame::GamelogReset { player }).await;
        self.state.publish_summary().await;
        self.state.nudge_snapshot();
    }

    async fn read_from(&mut self, path: &PathBuf, offset: u64, len: u64) {
        let chunk = match read_range(path, offset, len).await {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("cannot read {}: {e}", path.display());
                return;
            }
        };
        if let Some(file) = self.files.get_mut(path) {
            file.offset = len;
        }
        self.ingest(&chunk).await;
    }

    async fn ingest(&mut self, chunk: &str) {
        if self.identity.is_none() {
            // Hold content back until a join line names the local player.
            self.pending.push_str(chunk);
            match parser::parse_gamelog(&self.pending, None) {
                Ok(parsed) if parsed.inferred_identity.is_some() => {
                    self.identity = parsed.inferred_identity;
                    self.inferred = true;
                    info!(identity = ?self.identity, "inferred local player identity");
                }
                _ if self.pending.len() >= INFER_LIMIT => {
                    self.identity = Some(FALLBACK_IDENTITY.to_string());
                }
                _ => return,
            }
        }

        let player = self.current_identity();
        let backlog = std::mem::take(&mut self.pending);
        let content = if backlog.is_empty() { chunk.to_string() } else { backlog };

        let added = {
            let mut uploads = self.state.uploads.write().await;
            let added = uploads.append(&player, &content);
            if self.inferred {
                uploads.mark_provisional(&player);
            }
            added
        };
        match added {
            Ok(0) => {}
            Ok(n) => {
                debug!(player = %player, n, "local gamelog events");
                self.state.publish_summary().await;
                self.state.nudge_snapshot();
            }
            Err(e) => warn!("local gamelog unparseable: {e}"),
        }
    }

    fn current_identity(&self) -> String {
        self.identity.clone().unwrap_or_else(|| FALLBACK_IDENTITY.to_string())
    }
}

async fn read_range(path: &PathBuf, offset: u64, len: u64) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut buf = Vec::with_capacity((len - offset) as usize);
    file.take(len - offset).read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::network::archive::NullSink;

    async fn tracker_with_identity(identity: Option<&str>) -> LogTracker {
        let mut config = Config::default();
        config.local_player = identity.map(str::to_string);
        let (state, _rx) = TrackerState::new(config, Box::new(NullSink));
        LogTracker::new(state)
    }

    #[tokio::test]
    async fn test_tail_appends_into_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gamelog.txt");
        tokio::fs::write(&path, "").await.unwrap();

        let mut tracker = tracker_with_identity(Some("alice")).await;
        let dirs = vec![dir.path().to_path_buf()];
        tracker.initial_scan(&dirs).await;

        tokio::fs::write(&path, "You killed bob with Laser\n").await.unwrap();
        tracker.scan(&dirs).await;

        let uploads = tracker.state.uploads.read().await;
        assert_eq!(uploads.get("alice").unwrap().events.len(), 1);
    }

    #[tokio::test]
    async fn test_initial_content_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gamelog.txt");
        tokio::fs::write(&path, "old kill line: ignored\nalice killed bob\n").await.unwrap();

        let mut tracker = tracker_with_identity(Some("alice")).await;
        let dirs = vec![dir.path().to_path_buf()];
        tracker.initial_scan(&dirs).await;
        tracker.scan(&dirs).await;

        assert_eq!(tracker.state.uploads.read().await.total_events(), 0);
    }

    #[tokio::test]
    async fn test_shrink_resets_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gamelog.txt");
        tokio::fs::write(&path, "").await.unwrap();

        let mut tracker = tracker_with_identity(Some("alice")).await;
        let dirs = vec![dir.path().to_path_buf()];
        tracker.initial_scan(&dirs).await;

        tokio::fs::write(&path, "alice killed bob\nalice killed bob\n").await.unwrap();
        tracker.scan(&dirs).await;
        assert_eq!(tracker.state.uploads.read().await.total_events(), 2);

        // New match: shorter file, fresh content.
        tokio::fs::write(&path, "bob killed alice\n").await.unwrap();
        tracker.scan(&dirs).await;
        let uploads = tracker.state.uploads.read().await;
        assert_eq!(uploads.get("alice").unwrap().events.len(), 1);
    }

    #[tokio::test]
    async fn test_identity_inferred_from_join_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gamelog.txt");
        tokio::fs::write(&path, "").await.unwrap();

        let mut tracker = tracker_with_identity(None).await;
        let dirs = vec![dir.path().to_path_buf()];
        tracker.initial_scan(&dirs).await;

        tokio::fs::write(&path, "'carol' is joining the game.\nYou killed bob with Laser\n")
            .await
            .unwrap();
        tracker.scan(&dirs).await;

        let uploads = tracker.state.uploads.read().await;
        let stream = uploads.get("carol").expect("identity not inferred");
        assert!(stream
            .events
            .iter()
            .any(|e| matches!(e, parser::LogEvent::Kill { killer, .. } if killer == "carol")));
    }
}
