//! WebSocket push surface.
//!
//! Dashboards connect on a dedicated TCP port and only ever receive. On
//! connect a client gets an `init` frame and a `snapshot` of the confirmed
//! games; after that the hub fans out mutation frames. Every client has a
//! bounded outgoing queue; a client that cannot keep up is dropped rather
//! than allowed to stall the handlers that publish.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::game::aggregate::{GameView, GamelogDigest, TimelineEntry};
use crate::state::TrackerState;

/// Outgoing queue depth per client; overflow drops the client.
const CLIENT_QUEUE: usize = 64;

/// Writes blocking longer than this drop the client.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Server-push frames; the wire shape is `{type, data}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsFrame {
    /// Greeting sent once per connection.
    Init {
        /// Server name.
        server: String,
        /// Crate version.
        version: String,
    },
    /// Current confirmed games, sent once per connection.
    Snapshot {
        /// Merged views.
        games: Vec<GameView>,
    },
    /// First confirmation of a match.
    GameNew(GameView),
    /// Subsequent update of a confirmed match.
    GameUpdate(GameView),
    /// Match died.
    #[serde(rename_all = "camelCase")]
    GameRemoved {
        /// Match key as `ip:port`.
        id: String,
        /// Lifecycle id.
        game_id: u32,
    },
    /// One meaningful event was appended.
    GameEvent {
        /// Match key as `ip:port`.
        id: String,
        /// The merged-timeline form of the event.
        event: TimelineEntry,
    },
    /// Aggregator digest after a mutation.
    GameSummary(GamelogDigest),
    /// The local gamelog shrank; its stream was reset.
    GamelogReset {
        /// Identity whose stream was reset.
        player: String,
    },
}

/// Connected-client registry with drop-on-full fan-out.
#[derive(Debug, Default)]
pub struct WsHub {
    clients: RwLock<BTreeMap<SocketAddr, mpsc::Sender<String>>>,
}

impl WsHub {
    /// Empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize once and enqueue to every client. Clients whose queue is
    /// full or closed are dropped; nobody blocks.
    pub async fn broadcast(&self, frame: &WsFrame) {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to serialize frame: {e}");
                return;
            }
        };

        let mut dead = Vec::new();
        {
            let clients = self.clients.read().await;
            for (addr, tx) in clients.iter() {
                if tx.try_send(text.clone()).is_err() {
                    dead.push(*addr);
                }
            }
        }
        if !dead.is_empty() {
            let mut clients = self.clients.write().await;
            for addr in dead {
                clients.remove(&addr);
                debug!("dropped slow websocket client {addr}");
            }
        }
    }

    /// Connected client count.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn register(&self, addr: SocketAddr, tx: mpsc::Sender<String>) {
        self.clients.write().await.insert(addr, tx);
    }

    async fn unregister(&self, addr: SocketAddr) {
        self.clients.write().await.remove(&addr);
    }
}

/// Accept loop on the WebSocket port. Runs until the shutdown signal fires.
pub async fn run_acceptor(
    listener: TcpListener,
    state: Arc<TrackerState>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("websocket listening on {:?}", listener.local_addr().ok());
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        tokio::spawn(handle_connection(stream, addr, state.clone()));
                    }
                    Err(e) => warn!("websocket accept error: {e}"),
                }
            }
            _ = shutdown.recv() => {
                debug!("websocket acceptor stopping");
                break;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: Arc<TrackerState>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("websocket handshake failed for {addr}: {e}");
            return;
        }
    };
    debug!("websocket client connected: {addr}");

    let (mut sender, mut receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE);
    state.hub.register(addr, tx).await;

    // Connection greeting plus the current confirmed-games summary.
    let init = WsFrame::Init {
        server: "dxx-tracker".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let snapshot = WsFrame::Snapshot { games: state.games_summary().await };
    for frame in [&init, &snapshot] {
        if let Ok(text) = serde_json::to_string(frame) {
            if sender.send(Message::Text(text)).await.is_err() {
                state.hub.unregister(addr).await;
                return;
            }
        }
    }

    // Forward queued frames; time-box each write so one stuck client never
    // backs up into the hub.
    let forward = async {
        while let Some(text) = rx.recv().await {
            match tokio::time::timeout(WRITE_TIMEOUT, sender.send(Message::Text(text))).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
    };

    // Client frames are ignored; the read side only notices disconnects.
    let drain = async {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = forward => {}
        _ = drain => {}
    }

    state.hub.unregister(addr).await;
    debug!("websocket client gone: {addr}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_drops_full_client() {
        let hub = WsHub::new();
        let (tx, mut rx) = mpsc::channel(1);
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        hub.register(addr, tx).await;

        let frame = WsFrame::GamelogReset { player: "alice".to_string() };
        hub.broadcast(&frame).await;
        assert_eq!(hub.client_count().await, 1);

        // Queue full now; the next broadcast drops the client.
        hub.broadcast(&frame).await;
        assert_eq!(hub.client_count().await, 0);

        // The one queued frame is intact.
        let text = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "gamelog_reset");
        assert_eq!(value["data"]["player"], "alice");
    }

    #[tokio::test]
    async fn test_broadcast_drops_closed_client() {
        let hub = WsHub::new();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let addr: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        hub.register(addr, tx).await;

        hub.broadcast(&WsFrame::GamelogReset { player: "x".to_string() }).await;
        assert_eq!(hub.client_count().await, 0);
    }

    #[test]
    fn test_frame_wire_shape() {
        let frame = WsFrame::GameRemoved { id: "203.0.113.7:5000".to_string(), game_id: 42 };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(value["type"], "game_removed");
        assert_eq!(value["data"]["gameId"], 42);
    }
}
