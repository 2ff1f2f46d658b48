//! UDP protocol engine.
//!
//! One socket, bidirectional: the receive loop classifies each datagram by
//! its leading opcode byte and drives the registry; probes, ACKs, and list
//! responses go back out the same socket. Nothing here blocks under a held
//! lock; state is mutated or copied first, I/O happens after release. A bad
//! packet is logged and dropped, never allowed to take the loop down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::game::aggregate::{self, GameView, TimelineEntry};
use crate::game::events::{GameEvent, WEAPON_NONE};
use crate::game::record::{match_key_string, MatchKey, Phase};
use crate::game::registry::ApplyOutcome;
use crate::network::ws::WsFrame;
use crate::protocol::codec::{self, GameListEntry, ProtocolError};
use crate::protocol::multi::{self, MultiMessage};
use crate::state::TrackerState;

/// Probe cadence per live record.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Reap cadence.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
/// Gap between the three register-ACK sends.
const ACK_GAP: Duration = Duration::from_millis(25);
/// Announced game ports below this are rejected as bogus.
const MIN_GAME_PORT: u16 = 1024;

/// The tracker's UDP face.
pub struct ProtocolEngine {
    socket: Arc<UdpSocket>,
    state: Arc<TrackerState>,
}

impl ProtocolEngine {
    /// Bind the tracker socket on the configured port.
    pub async fn bind(state: Arc<TrackerState>) -> anyhow::Result<Self> {
        let addr = format!("0.0.0.0:{}", state.config.udp_port);
        let socket = UdpSocket::bind(&addr).await?;
        info!("udp tracker listening on {}", socket.local_addr()?);
        Ok(Self { socket: Arc::new(socket), state })
    }

    /// Actual bound address; useful when the configured port is 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive loop. Stops on the shutdown signal; this is the first loop to
    /// stop so no new state enters the system during drain.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut buf = [0u8; 2048];
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, src)) => self.handle_datagram(src, &buf[..len]).await,
                        Err(e) => warn!("udp recv error: {e}"),
                    }
                }
                _ = shutdown.recv() => {
                    debug!("udp receive loop stopping");
                    break;
                }
            }
        }
    }

    /// Poll ticker: lite probes for pending records, full-info requests for
    /// confirmed ones, and an unconditional snapshot rewrite.
    pub async fn run_poll_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = interval(POLL_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => self.poll_tick().await,
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Cleanup ticker: reap idle records and hand them to the archive sink.
    pub async fn run_cleanup_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = interval(CLEANUP_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => self.cleanup_tick().await,
                _ = shutdown.recv() => break,
            }
        }
    }

    /// One probe round over the registry.
    pub async fn poll_tick(&self) {
        let probes: Vec<(SocketAddr, Vec<u8>)> = {
            let registry = self.state.registry.read().await;
            registry
                .iter()
                .map(|record| {
                    let target = SocketAddr::new(record.key.0, record.key.1);
                    let frame = match record.phase {
                        Phase::Confirmed => codec::encode_full_info_request(
                            record.version,
                            record.release,
                            record.netgame_proto,
                        ),
                        _ => codec::encode_lite_request(record.version, record.release),
                    };
                    (target, frame)
                })
                .collect()
        };
        for (target, frame) in probes {
            self.send(target, &frame).await;
        }
        self.state.nudge_snapshot();
    }

    /// One reap round.
    pub async fn cleanup_tick(&self) {
        let reaped = {
            let mut registry = self.state.registry.write().await;
            registry.reap_expired(Instant::now())
        };
        for record in reaped {
            info!(key = %match_key_string(&record.key), "reaping idle match");
            self.state.finish_record(record).await;
        }
    }

    async fn handle_datagram(&self, src: SocketAddr, data: &[u8]) {
        let Some(&opcode) = data.first() else { return };
        match opcode {
            codec::OP_REGISTER => self.on_register(src, data).await,
            codec::OP_UNREGISTER => match data.len() {
                5 => self.on_unregister(src, data).await,
                9 => self.on_version_deny(src, data).await,
                len => debug!("opcode 1 with unexpected length {len} from {src}"),
            },
            codec::OP_GAME_LIST => self.on_game_list_request(src, data).await,
            codec::OP_FULL_INFO => self.on_full_info(src, data).await,
            codec::OP_LITE_INFO => self.on_lite_info(src, data).await,
            codec::OP_PDATA => {}
            codec::OP_MDATA_NORM | codec::OP_MDATA_ACK | codec::OP_OBSDATA => {
                self.on_mdata(src, opcode, data).await
            }
            codec::OP_GAMELOG_KILL => self.on_gamelog_kill(src, data).await,
            codec::OP_GAMELOG_CHAT => self.on_gamelog_chat(src, data).await,
            codec::OP_WEBUI_PING => self.on_webui_ping(src, data).await,
            other => debug!("unknown opcode {other} ({} bytes) from {src}", data.len()),
        }
    }

    async fn on_register(&self, src: SocketAddr, data: &[u8]) {
        let reg = match codec::decode_register(data) {
            Ok(reg) => reg,
            Err(e) => return drop_malformed(src, &e),
        };
        if reg.game_port < MIN_GAME_PORT {
            warn!("register from {src} announces privileged port {}; dropped", reg.game_port);
            return;
        }

        let outcome = {
            let mut registry = self.state.registry.write().await;
            registry.upsert_on_register(src, &reg)
        };
        info!(
            game_id = reg.game_id,
            port = reg.game_port,
            version = %reg.version,
            ?outcome,
            "register from {src}"
        );

        // Probe right away; the poll ticker keeps retrying for pending
        // records that stay silent.
        let game_addr = SocketAddr::new(src.ip(), reg.game_port);
        self.send(game_addr, &codec::encode_lite_request(reg.version, reg.release)).await;
        self.state.nudge_snapshot();
    }

    async fn on_unregister(&self, src: SocketAddr, data: &[u8]) {
        let game_id = match codec::decode_unregister(data) {
            Ok(id) => id,
            Err(e) => return drop_malformed(src, &e),
        };
        let removed = {
            let mut registry = self.state.registry.write().await;
            registry.remove_by_game_id(src.ip(), game_id)
        };
        match removed {
            Some(record) => {
                info!(game_id, "unregister from {src}");
                self.state.finish_record(record).await;
            }
            None => debug!("unregister from {src} for unknown game id {game_id}"),
        }
    }

    async fn on_version_deny(&self, src: SocketAddr, data: &[u8]) {
        let deny = match codec::decode_version_deny(data) {
            Ok(deny) => deny,
            Err(e) => return drop_malformed(src, &e),
        };
        let updated = {
            let mut registry = self.state.registry.write().await;
            registry.apply_version_deny(src.ip(), deny.netgame_proto)
        };
        debug!(
            proto = deny.netgame_proto,
            updated, "version-deny from {src} taught netgame protocol"
        );
    }

    async fn on_game_list_request(&self, src: SocketAddr, data: &[u8]) {
        let req = match codec::decode_game_list_request(data) {
            Ok(req) => req,
            Err(e) => return drop_malformed(src, &e),
        };
        let frames: Vec<Vec<u8>> = {
            let registry = self.state.registry.read().await;
            registry
                .confirmed()
                .filter(|record| record.version == req.version)
                .map(|record| codec::encode_game_list_entry(&list_entry(record)))
                .collect()
        };
        debug!("game list request from {src}: {} entries", frames.len());
        for frame in frames {
            self.send(src, &frame).await;
        }
    }

    async fn on_lite_info(&self, src: SocketAddr, data: &[u8]) {
        let lite = match codec::decode_lite_info(data) {
            Ok(lite) => lite,
            Err(e) => return drop_malformed(src, &e),
        };
        let Some(key) = self.correlate(src).await else {
            debug!("lite info from unknown source {src}; dropped");
            return;
        };
        let applied = {
            let mut registry = self.state.registry.write().await;
            let outcome = registry.apply_lite(key, lite);
            self.after_apply(&mut registry, key, outcome).await
        };
        self.publish_applied(key, applied).await;
    }

    async fn on_full_info(&self, src: SocketAddr, data: &[u8]) {
        let full = match codec::decode_full_info(data) {
            Ok(full) => full,
            Err(e) => return drop_malformed(src, &e),
        };
        let Some(key) = self.correlate(src).await else {
            debug!("full info from unknown source {src}; dropped");
            return;
        };
        let applied = {
            let mut registry = self.state.registry.write().await;
            let outcome = registry.apply_full(key, full);
            self.after_apply(&mut registry, key, outcome).await
        };
        self.publish_applied(key, applied).await;
    }

    /// Shared post-apply step, called under the registry write lock: marks
    /// the ACK as dispatched on the confirm edge and snapshots the merged
    /// view for publication after the lock is gone.
    async fn after_apply(
        &self,
        registry: &mut crate::game::registry::GameRegistry,
        key: MatchKey,
        outcome: ApplyOutcome,
    ) -> Applied {
        match outcome {
            ApplyOutcome::FirstConfirm => {
                let Some(record) = registry.get_mut(&key) else {
                    return Applied::Dropped;
                };
                let ack_target = if record.ack_sent {
                    None
                } else {
                    record.ack_sent = true;
                    Some(record.source_addr)
                };
                let uploads = self.state.uploads.read().await;
                Applied::Confirmed { ack_target, view: aggregate::game_view(record, &uploads) }
            }
            ApplyOutcome::Updated => {
                let Some(record) = registry.get(&key) else {
                    return Applied::Dropped;
                };
                let uploads = self.state.uploads.read().await;
                Applied::Updated { view: aggregate::game_view(record, &uploads) }
            }
            ApplyOutcome::GameIdMismatch => {
                debug!(key = %match_key_string(&key), "info response game-id mismatch; dropped");
                Applied::Dropped
            }
            ApplyOutcome::UnknownSource => Applied::Dropped,
        }
    }

    async fn publish_applied(&self, key: MatchKey, applied: Applied) {
        match applied {
            Applied::Confirmed { ack_target, view } => {
                if let Some(target) = ack_target {
                    self.spawn_register_ack(target);
                }
                info!(key = %match_key_string(&key), name = %view.game_name, "match confirmed");
                self.state.hub.broadcast(&WsFrame::GameNew(view)).await;
                self.state.nudge_snapshot();
            }
            Applied::Updated { view } => {
                self.state.hub.broadcast(&WsFrame::GameUpdate(view)).await;
                self.state.nudge_snapshot();
            }
            Applied::Dropped => {}
        }
    }

    async fn on_mdata(&self, src: SocketAddr, opcode: u8, data: &[u8]) {
        let payload = match multi::decode_mdata(opcode, data) {
            Ok(payload) => payload,
            Err(e) => return drop_malformed(src, &e),
        };
        if payload.messages.is_empty() {
            return;
        }
        let Some(key) = self.correlate(src).await else {
            debug!("multi data from unknown source {src}; dropped");
            return;
        };

        let mut events = Vec::new();
        for message in payload.messages {
            events.push(match message {
                MultiMessage::Kill { killer_slot, victim_slot } => GameEvent::Kill {
                    killer_slot,
                    victim_slot,
                    weapon_type: WEAPON_NONE,
                    weapon_id: WEAPON_NONE,
                },
                MultiMessage::PlayerExplode { slot } => GameEvent::Death { slot },
                MultiMessage::Message { sender_slot, text } => {
                    GameEvent::Chat { sender_slot, text, is_observer: false }
                }
                MultiMessage::Quit { slot } => GameEvent::Quit { slot },
                MultiMessage::ObserverMessage { sender_slot, text } => {
                    GameEvent::Chat { sender_slot, text, is_observer: true }
                }
            });
        }
        self.append_events(key, events, None).await;
    }

    async fn on_gamelog_kill(&self, src: SocketAddr, data: &[u8]) {
        let kill = match codec::decode_gamelog_kill(data) {
            Ok(kill) => kill,
            Err(e) => return drop_malformed(src, &e),
        };
        // Gamelog packets leave from an ephemeral port; the ip alone binds
        // them. TODO: two concurrent matches behind one NAT ip would
        // mis-attribute these events; disambiguation needs a game-id echo in
        // the packet.
        let Some(key) = self.correlate(src).await else {
            debug!("gamelog kill from unknown source {src}; dropped");
            return;
        };
        let event = GameEvent::Kill {
            killer_slot: kill.killer_slot,
            victim_slot: kill.victim_slot,
            weapon_type: kill.weapon_type,
            weapon_id: kill.weapon_id,
        };
        self.append_events(key, vec![event], Some(kill.game_time_us)).await;
    }

    async fn on_gamelog_chat(&self, src: SocketAddr, data: &[u8]) {
        let chat = match codec::decode_gamelog_chat(data) {
            Ok(chat) => chat,
            Err(e) => return drop_malformed(src, &e),
        };
        let Some(key) = self.correlate(src).await else {
            debug!("gamelog chat from unknown source {src}; dropped");
            return;
        };
        let event =
            GameEvent::Chat { sender_slot: chat.sender_slot, text: chat.text, is_observer: false };
        self.append_events(key, vec![event], Some(chat.game_time_us)).await;
    }

    async fn on_webui_ping(&self, src: SocketAddr, data: &[u8]) {
        if let Err(e) = codec::decode_webui_ping(data) {
            return drop_malformed(src, &e);
        }
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as u32;
        self.send(src, &codec::encode_pong(now)).await;
    }

    /// Append events to a match, then publish each as a `game_event` frame
    /// plus one refreshed digest.
    async fn append_events(&self, key: MatchKey, events: Vec<GameEvent>, game_time_us: Option<u64>) {
        let entries: Vec<TimelineEntry> = {
            let mut registry = self.state.registry.write().await;
            let Some(record) = registry.get_mut(&key) else { return };
            record.touch();
            events
                .into_iter()
                .map(|event| {
                    let stored = record.events.push(event, game_time_us);
                    aggregate::timeline_entry(record, &stored)
                })
                .collect()
        };
        let id = match_key_string(&key);
        for entry in entries {
            self.state.hub.broadcast(&WsFrame::GameEvent { id: id.clone(), event: entry }).await;
        }
        self.state.publish_summary().await;
        self.state.nudge_snapshot();
    }

    async fn correlate(&self, src: SocketAddr) -> Option<MatchKey> {
        self.state.registry.read().await.correlate(src)
    }

    /// Three ACK bytes at 0/25/50 ms to the register source address.
    fn spawn_register_ack(&self, target: SocketAddr) {
        let socket = self.socket.clone();
        tokio::spawn(async move {
            let frame = codec::encode_register_ack();
            for i in 0..3 {
                if i > 0 {
                    tokio::time::sleep(ACK_GAP).await;
                }
                if let Err(e) = socket.send_to(&frame, target).await {
                    warn!("register ack to {target} failed: {e}");
                }
            }
        });
    }

    async fn send(&self, target: SocketAddr, frame: &[u8]) {
        if let Err(e) = self.socket.send_to(frame, target).await {
            // Implicit retry comes with the next poll tick.
            warn!("udp send to {target} failed: {e}");
        }
    }
}

/// Result of applying an info response, copied out of the lock.
enum Applied {
    Confirmed { ack_target: Option<SocketAddr>, view: GameView },
    Updated { view: GameView },
    Dropped,
}

fn drop_malformed(src: SocketAddr, error: &ProtocolError) {
    warn!("malformed packet from {src}: {error}");
}

fn list_entry(record: &crate::game::record::GameRecord) -> GameListEntry {
    let lite = record.lite.as_ref();
    GameListEntry {
        ipv6: record.key.0.is_ipv6(),
        ip: record.key.0.to_string(),
        port: record.key.1,
        release: record.release,
        game_id: record.game_id,
        game_name: record.game_name().to_string(),
        mission_title: lite.map(|l| l.mission_title.clone()).unwrap_or_default(),
        mission_id: lite.map(|l| l.mission_id.clone()).unwrap_or_default(),
        level_num: lite.map(|l| l.level_num).unwrap_or(0),
        mode: lite.map(|l| l.mode).unwrap_or(0),
        refuse: lite.map(|l| l.refuse).unwrap_or(0),
        difficulty: lite.map(|l| l.difficulty).unwrap_or(0),
        status: lite.map(|l| l.status).unwrap_or(0),
        num_players: lite.map(|l| l.num_players).unwrap_or(0),
        max_players: lite.map(|l| l.max_players).unwrap_or(0),
        flags: lite.map(|l| l.flags).unwrap_or(0),
    }
}
