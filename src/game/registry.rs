//! Active-game registry.
//!
//! The single source of truth for which matches are alive and what is known
//! about each. All mutation goes through the operations here; the protocol
//! engine serializes access behind one `RwLock` and performs socket I/O only
//! after releasing it.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use crate::game::record::{GameRecord, MatchKey, Phase};
use crate::protocol::codec::{FullInfo, LiteInfo, Register};

/// Records with no traffic for this long are reaped.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

/// What `upsert_on_register` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// No record existed under the key; one was created.
    Created,
    /// Same key, same game-id: a refresh. Last-seen was bumped.
    Refreshed,
    /// Same key, different game-id: the predecessor and its events were
    /// dropped and a new pending lifecycle begins.
    Replaced,
}

impl RegisterOutcome {
    /// True when a fresh pending record now exists.
    pub fn is_new(self) -> bool {
        !matches!(self, Self::Refreshed)
    }
}

/// What applying an info response did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First successful decode: the record moved pending -> confirmed and the
    /// register-ACK triplet must be dispatched.
    FirstConfirm,
    /// Fields refreshed on an already-confirmed record.
    Updated,
    /// The response's embedded game-id does not match the record; dropped.
    GameIdMismatch,
    /// No record correlates; dropped.
    UnknownSource,
}

/// In-memory index of live matches.
#[derive(Debug, Default)]
pub struct GameRegistry {
    games: BTreeMap<MatchKey, GameRecord>,
}

impl GameRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a REGISTER announcement. A changed game-id under an existing
    /// key drops the predecessor (and its event store) before the new record
    /// is created.
    pub fn upsert_on_register(&mut self, source: SocketAddr, reg: &Register) -> RegisterOutcome {
        let key: MatchKey = (source.ip(), reg.game_port);
        match self.games.get_mut(&key) {
            Some(existing) if existing.game_id == reg.game_id => {
                existing.touch();
                existing.source_addr = source;
                RegisterOutcome::Refreshed
            }
            Some(_) => {
                self.games.remove(&key);
                self.games.insert(key, GameRecord::new(source, reg.game_port, reg));
                RegisterOutcome::Replaced
            }
            None => {
                self.games.insert(key, GameRecord::new(source, reg.game_port, reg));
                RegisterOutcome::Created
            }
        }
    }

    /// Apply a lite-info response to the record under `key`.
    pub fn apply_lite(&mut self, key: MatchKey, lite: LiteInfo) -> ApplyOutcome {
        let Some(record) = self.games.get_mut(&key) else {
            return ApplyOutcome::UnknownSource;
        };
        if lite.game_id != record.game_id {
            return ApplyOutcome::GameIdMismatch;
        }
        record.touch();
        record.lite = Some(lite);
        confirm(record)
    }

    /// Apply a full-info response to the record under `key`. Full info
    /// carries no game-id, so correlation alone binds it.
    pub fn apply_full(&mut self, key: MatchKey, full: FullInfo) -> ApplyOutcome {
        let Some(record) = self.games.get_mut(&key) else {
            return ApplyOutcome::UnknownSource;
        };
        record.touch();
        record.full = Some(full);
        confirm(record)
    }

    /// Learn the netgame protocol from a version-deny: every record on the
    /// source ip whose protocol is still unknown adopts it. Returns how many
    /// records were updated.
    pub fn apply_version_deny(&mut self, ip: IpAddr, proto: u16) -> usize {
        let mut updated = 0;
        for record in self.games.values_mut().filter(|r| r.key.0 == ip && r.netgame_proto == 0) {
            record.netgame_proto = proto;
            record.touch();
            updated += 1;
        }
        updated
    }

    /// Remove the record matching ip + game-id; UNREGISTER packets may come
    /// from a port other than the game port. The record is returned marked
    /// dead for the archive handoff.
    pub fn remove_by_game_id(&mut self, ip: IpAddr, game_id: u32) -> Option<GameRecord> {
        let key = self
            .games
            .values()
            .find(|r| r.key.0 == ip && r.game_id == game_id)
            .map(|r| r.key)?;
        let mut record = self.games.remove(&key)?;
        record.phase = Phase::Dead;
        Some(record)
    }

    /// Remove and return every record whose last-seen age exceeds
    /// [`INACTIVITY_TIMEOUT`] at `now`, marked dead.
    pub fn reap_expired(&mut self, now: Instant) -> Vec<GameRecord> {
        let expired: Vec<MatchKey> = self
            .games
            .values()
            .filter(|r| now.duration_since(r.last_seen) > INACTIVITY_TIMEOUT)
            .map(|r| r.key)
            .collect();
        expired
            .into_iter()
            .filter_map(|key| {
                let mut record = self.games.remove(&key)?;
                record.phase = Phase::Dead;
                Some(record)
            })
            .collect()
    }

    /// Bind a packet source to a record: exact ip:port first, ip-only as the
    /// fallback for responses sent from an ephemeral port.
    pub fn correlate(&self, addr: SocketAddr) -> Option<MatchKey> {
        let exact = (addr.ip(), addr.port());
        if self.games.contains_key(&exact) {
            return Some(exact);
        }
        self.games.values().find(|r| r.key.0 == addr.ip()).map(|r| r.key)
    }

    /// Record under `key`.
    pub fn get(&self, key: &MatchKey) -> Option<&GameRecord> {
        self.games.get(key)
    }

    /// Mutable record under `key`.
    pub fn get_mut(&mut self, key: &MatchKey) -> Option<&mut GameRecord> {
        self.games.get_mut(key)
    }

    /// All records in key order.
    pub fn iter(&self) -> impl Iterator<Item = &GameRecord> {
        self.games.values()
    }

    /// Confirmed records in key order.
    pub fn confirmed(&self) -> impl Iterator<Item = &GameRecord> {
        self.games.values().filter(|r| r.phase == Phase::Confirmed)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.games.len()
    }

    /// True when no match is tracked.
    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

/// Promote on the first successful info decode; ACK dispatch belongs to that
/// edge alone.
fn confirm(record: &mut GameRecord) -> ApplyOutcome {
    if record.phase == Phase::Pending {
        record.phase = Phase::Confirmed;
        ApplyOutcome::FirstConfirm
    } else {
        ApplyOutcome::Updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::GameEvent;
    use crate::protocol::codec::DxxVersion;

    fn reg(game_id: u32) -> Register {
        Register {
            tracker_ver: 0,
            version: DxxVersion::D1,
            game_port: 5000,
            game_id,
            release: (1, 3, 2),
        }
    }

    fn lite(game_id: u32) -> LiteInfo {
        LiteInfo {
            release: (1, 3, 2),
            game_id,
            game_name: "1v1".to_string(),
            mission_title: "Wrath".to_string(),
            mission_id: "wrath".to_string(),
            level_num: 1,
            mode: 0,
            refuse: 0,
            difficulty: 2,
            status: 1,
            num_players: 2,
            max_players: 2,
            flags: 0,
        }
    }

    fn source() -> SocketAddr {
        "203.0.113.7:55000".parse().unwrap()
    }

    fn key() -> MatchKey {
        ("203.0.113.7".parse().unwrap(), 5000)
    }

    #[test]
    fn test_register_then_lite_confirms_once() {
        let mut registry = GameRegistry::new();
        assert_eq!(registry.upsert_on_register(source(), &reg(42)), RegisterOutcome::Created);
        assert_eq!(registry.get(&key()).unwrap().phase, Phase::Pending);

        assert_eq!(registry.apply_lite(key(), lite(42)), ApplyOutcome::FirstConfirm);
        assert_eq!(registry.get(&key()).unwrap().phase, Phase::Confirmed);

        // Subsequent lite responses refresh without re-confirming.
        assert_eq!(registry.apply_lite(key(), lite(42)), ApplyOutcome::Updated);
    }

    #[test]
    fn test_lite_game_id_mismatch_dropped() {
        let mut registry = GameRegistry::new();
        registry.upsert_on_register(source(), &reg(42));
        assert_eq!(registry.apply_lite(key(), lite(43)), ApplyOutcome::GameIdMismatch);
        assert_eq!(registry.get(&key()).unwrap().phase, Phase::Pending);
        assert!(registry.get(&key()).unwrap().lite.is_none());
    }

    #[test]
    fn test_reregister_same_id_refreshes() {
        let mut registry = GameRegistry::new();
        registry.upsert_on_register(source(), &reg(42));
        assert_eq!(registry.upsert_on_register(source(), &reg(42)), RegisterOutcome::Refreshed);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_game_id_collision_drops_predecessor_events() {
        let mut registry = GameRegistry::new();
        registry.upsert_on_register(source(), &reg(42));
        registry.apply_lite(key(), lite(42));
        registry
            .get_mut(&key())
            .unwrap()
            .events
            .push(GameEvent::Kill { killer_slot: 0, victim_slot: 1, weapon_type: 0, weapon_id: 13 }, None);

        assert_eq!(registry.upsert_on_register(source(), &reg(99)), RegisterOutcome::Replaced);
        let record = registry.get(&key()).unwrap();
        assert_eq!(record.game_id, 99);
        assert_eq!(record.phase, Phase::Pending);
        assert!(record.events.is_empty());
    }

    #[test]
    fn test_remove_by_game_id_ignores_source_port() {
        let mut registry = GameRegistry::new();
        registry.upsert_on_register(source(), &reg(42));
        let removed = registry.remove_by_game_id("203.0.113.7".parse().unwrap(), 42).unwrap();
        assert_eq!(removed.phase, Phase::Dead);
        assert!(registry.is_empty());
        // A later lite for the gone record finds no correlation target.
        assert_eq!(registry.apply_lite(key(), lite(42)), ApplyOutcome::UnknownSource);
    }

    #[test]
    fn test_remove_by_game_id_wrong_id_is_noop() {
        let mut registry = GameRegistry::new();
        registry.upsert_on_register(source(), &reg(42));
        assert!(registry.remove_by_game_id("203.0.113.7".parse().unwrap(), 43).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_version_deny_teaches_unknown_protos_only() {
        let mut registry = GameRegistry::new();
        registry.upsert_on_register(source(), &reg(42));
        registry.upsert_on_register("203.0.113.7:55001".parse().unwrap(), &{
            let mut r = reg(7);
            r.game_port = 6000;
            r
        });
        registry.get_mut(&("203.0.113.7".parse().unwrap(), 6000)).unwrap().netgame_proto = 12;

        let updated = registry.apply_version_deny("203.0.113.7".parse().unwrap(), 7650);
        assert_eq!(updated, 1);
        assert_eq!(registry.get(&key()).unwrap().netgame_proto, 7650);
        let other = registry.get(&("203.0.113.7".parse().unwrap(), 6000)).unwrap();
        assert_eq!(other.netgame_proto, 12);
    }

    #[test]
    fn test_reap_expired_boundary() {
        let mut registry = GameRegistry::new();
        registry.upsert_on_register(source(), &reg(42));

        // Just inside the window: nothing reaped.
        let now = Instant::now() + INACTIVITY_TIMEOUT;
        assert!(registry.reap_expired(now).is_empty());

        // Past it: reaped exactly once.
        let later = now + Duration::from_secs(1);
        let reaped = registry.reap_expired(later);
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].phase, Phase::Dead);
        assert!(registry.reap_expired(later).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_correlate_prefers_exact_port() {
        let mut registry = GameRegistry::new();
        registry.upsert_on_register(source(), &reg(42));

        assert_eq!(registry.correlate("203.0.113.7:5000".parse().unwrap()), Some(key()));
        // Ephemeral source port still correlates by ip.
        assert_eq!(registry.correlate("203.0.113.7:39999".parse().unwrap()), Some(key()));
        assert_eq!(registry.correlate("203.0.113.8:5000".parse().unwrap()), None);
    }

    #[test]
    fn test_last_register_wins() {
        // Registry state is determined by the last REGISTER's game-id.
        let mut registry = GameRegistry::new();
        for id in [1u32, 2, 3] {
            registry.upsert_on_register(source(), &reg(id));
        }
        assert_eq!(registry.get(&key()).unwrap().game_id, 3);
        registry.remove_by_game_id("203.0.113.7".parse().unwrap(), 3);
        assert!(registry.is_empty());
    }
}
