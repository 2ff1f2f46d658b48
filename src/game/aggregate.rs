//! Evidence merge.
//!
//! A match is observed from up to three directions: full-info packets
//! (authoritative when present), the UDP event stream, and textual gamelog
//! streams uploaded per player or tailed from the local disk. This module
//! folds them into the single view the read-out surfaces publish.
//!
//! Merge rules:
//! - per-slot kills/deaths/suicides take the max across sources, so a missed
//!   full-info refresh never regresses an observed value;
//! - the kill matrix is the full-info one verbatim when available, otherwise
//!   the one accumulated from kill events;
//! - the timeline is a union keyed on (game-µs, kind, killer, victim,
//!   sender); textual events carry no µs, so per name-key the union holds
//!   `max(udp-count, best-stream-count)` entries;
//! - an uploader whose identity matches no slot keeps its events but never
//!   becomes a scoreboard row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::game::events::{GameEvent, StoredEvent, WEAPON_NONE};
use crate::game::record::{GameRecord, MAX_SLOTS, match_key_string};
use crate::game::weapons::weapon_name;
use crate::gamelog::parser::LogEvent;
use crate::gamelog::uploads::UploadStore;

/// Snapshot trim: kill feed entries.
pub const SNAP_KILL_CAP: usize = 50;
/// Snapshot trim: timeline entries.
pub const SNAP_TIMELINE_CAP: usize = 100;
/// Snapshot trim: chat entries.
pub const SNAP_CHAT_CAP: usize = 50;
/// Snapshot trim: damage-by-weapon rows.
pub const SNAP_WEAPON_CAP: usize = 30;

/// One scoreboard row after the merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedPlayer {
    /// Display name (duplicate callsigns already suffixed).
    pub name: String,
    /// Connected per the latest full info.
    pub connected: bool,
    /// Kills, max across sources.
    pub kills: i32,
    /// Deaths, max across sources.
    pub deaths: i32,
    /// Suicides, max across sources.
    pub suicides: i32,
    /// Score from full info when present, else the kill count.
    pub score: i32,
}

/// One merged timeline entry; also the shape of kill-feed and chat rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    /// Wall-clock arrival.
    pub at: DateTime<Utc>,
    /// Game-internal microsecond counter, when the source carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_time_us: Option<u64>,
    /// Entry kind tag.
    pub kind: String,
    /// Killer display name for kills.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub killer: Option<String>,
    /// Victim display name for kills and deaths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub victim: Option<String>,
    /// Acting player for chat/join/quit/escape/flag/kill-goal entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Chat text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Weapon display name for kills.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weapon: Option<String>,
    /// Chat relayed from an observer.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_observer: bool,
}

impl TimelineEntry {
    fn bare(at: DateTime<Utc>, game_time_us: Option<u64>, kind: &str) -> Self {
        Self {
            at,
            game_time_us,
            kind: kind.to_string(),
            killer: None,
            victim: None,
            sender: None,
            text: None,
            weapon: None,
            is_observer: false,
        }
    }

    /// Union key per the dedup rule; chat includes the text so distinct
    /// messages from one sender never collapse.
    fn name_key(&self) -> (String, Option<String>, Option<String>, Option<String>, Option<String>) {
        let text = if self.kind == "chat" { self.text.clone() } else { None };
        (self.kind.clone(), self.killer.clone(), self.victim.clone(), self.sender.clone(), text)
    }
}

/// Full merged state of one match, as published to dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameView {
    /// Match key as `ip:port`.
    pub id: String,
    /// Host ip.
    pub host: String,
    /// Game port.
    pub port: u16,
    /// Host-chosen lifecycle id.
    pub game_id: u32,
    /// "D1" or "D2".
    pub version: String,
    /// Release triplet as `major.minor.micro`.
    pub release: String,
    /// Learned netgame protocol, 0 when unknown.
    pub netgame_proto: u16,
    /// Netgame name.
    pub game_name: String,
    /// Mission title.
    pub mission_title: String,
    /// Short mission id.
    pub mission_id: String,
    /// Current level number.
    pub level_num: u32,
    /// Mode display name.
    pub mode: String,
    /// Status display name.
    pub status: String,
    /// Difficulty 0-4.
    pub difficulty: u8,
    /// Host refuses new players.
    pub refuse: bool,
    /// Connected player count.
    pub player_count: u8,
    /// Slot limit.
    pub max_players: u8,
    /// Netgame flag bits.
    pub flags: u8,
    /// Merged scoreboard; empty until a full info names the slots.
    pub players: Vec<MergedPlayer>,
    /// Kill matrix indexed `[killer][victim]`; full-info numbers when
    /// available, event-derived otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kill_matrix: Option<Vec<Vec<i32>>>,
    /// Wall clock of the first REGISTER.
    pub first_registered: DateTime<Utc>,
}

/// Digest totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestTotals {
    /// Kill entries in the merged timeline.
    pub kills: u32,
    /// Death entries including suicides.
    pub deaths: u32,
    /// Suicide entries.
    pub suicides: u32,
    /// Chat entries.
    pub chat_messages: u32,
}

/// One damage-by-weapon row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaponRow {
    /// Weapon display name.
    pub weapon: String,
    /// Kills credited to it.
    pub kills: u32,
}

/// Top-level gamelog digest for the snapshot file and summary frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GamelogDigest {
    /// Merged totals.
    pub totals: DigestTotals,
    /// Trimmed kill feed, newest last.
    pub kill_feed: Vec<TimelineEntry>,
    /// Trimmed merged timeline, newest last.
    pub timeline: Vec<TimelineEntry>,
    /// Trimmed chat, newest last.
    pub chat: Vec<TimelineEntry>,
    /// Kills per weapon, heaviest first.
    pub damage_by_weapon: Vec<WeaponRow>,
    /// Kills indexed by killer name then victim name.
    pub kill_matrix_by_name: BTreeMap<String, BTreeMap<String, u32>>,
    /// Most recent kill.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_kill: Option<TimelineEntry>,
}

/// Per-match event payload for the HTTP events endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEvents {
    /// Lifecycle id.
    pub game_id: u32,
    /// Merged kill feed.
    pub kill_feed: Vec<TimelineEntry>,
    /// Merged chat.
    pub chat: Vec<TimelineEntry>,
    /// Merged timeline.
    pub timeline: Vec<TimelineEntry>,
    /// Wall clock of the first REGISTER.
    pub start_time: DateTime<Utc>,
}

/// Build the merged view of one match.
pub fn game_view(record: &GameRecord, uploads: &UploadStore) -> GameView {
    let lite = record.lite.as_ref();
    let full = record.full.as_ref();
    let names = record.display_names();

    let player_count = full
        .map(|f| f.current_players)
        .or_else(|| lite.map(|l| l.num_players))
        .unwrap_or(0);

    let kill_matrix = if let Some(full) = full {
        Some(full.kill_matrix.iter().map(|row| row.iter().map(|&c| c as i32).collect()).collect())
    } else if record.events.is_empty() {
        None
    } else {
        Some(
            record
                .events
                .event_matrix()
                .iter()
                .map(|row| row.iter().map(|&c| c as i32).collect())
                .collect(),
        )
    };

    let mut players = Vec::new();
    if let Some(full) = full {
        let counters = record.events.counters();
        for slot in 0..MAX_SLOTS {
            let name = &names[slot];
            if name.is_empty() {
                continue;
            }
            let wire = &full.players[slot];
            let c = counters[slot];

            // Textual streams can only raise a stat that UDP missed.
            let mut text_kills = 0u32;
            let mut text_deaths = 0u32;
            let mut text_suicides = 0u32;
            for stream in uploads.streams() {
                if let Some(stats) = stream.summary().players.get(name) {
                    text_kills = text_kills.max(stats.kills);
                    text_deaths = text_deaths.max(stats.deaths);
                    text_suicides = text_suicides.max(stats.suicides);
                }
            }

            let kills =
                (full.total_kills[slot] as i32).max(c.kills as i32).max(text_kills as i32);
            let deaths =
                (full.total_deaths[slot] as i32).max(c.deaths as i32).max(text_deaths as i32);
            let suicides = (full.kill_matrix[slot][slot].unsigned_abs() as i32)
                .max(c.suicides as i32)
                .max(text_suicides as i32);

            players.push(MergedPlayer {
                name: name.clone(),
                connected: wire.connected != 0,
                kills,
                deaths,
                suicides,
                score: if full.scores[slot] != 0 { full.scores[slot] } else { kills },
            });
        }
    }

    GameView {
        id: match_key_string(&record.key),
        host: record.key.0.to_string(),
        port: record.key.1,
        game_id: record.game_id,
        version: record.version.to_string(),
        release: format!("{}.{}.{}", record.release.0, record.release.1, record.release.2),
        netgame_proto: record.netgame_proto,
        game_name: record.game_name().to_string(),
        mission_title: lite
            .map(|l| l.mission_title.clone())
            .or_else(|| full.map(|f| f.mission_title.clone()))
            .unwrap_or_default(),
        mission_id: lite
            .map(|l| l.mission_id.clone())
            .or_else(|| full.map(|f| f.mission_id.clone()))
            .unwrap_or_default(),
        level_num: lite.map(|l| l.level_num).unwrap_or(0),
        mode: record.mode().to_string(),
        status: record.status().to_string(),
        difficulty: full.map(|f| f.difficulty).or_else(|| lite.map(|l| l.difficulty)).unwrap_or(0),
        refuse: lite.map(|l| l.refuse != 0).unwrap_or(false),
        player_count,
        max_players: full
            .map(|f| f.max_players)
            .or_else(|| lite.map(|l| l.max_players))
            .unwrap_or(0),
        flags: lite.map(|l| l.flags).unwrap_or(0),
        players,
        kill_matrix,
        first_registered: record.first_registered,
    }
}

/// Convert one stored UDP event into a timeline entry using the record's
/// display names.
pub fn timeline_entry(record: &GameRecord, event: &StoredEvent) -> TimelineEntry {
    let slot_name = |slot: u8| {
        record.slot_name(slot).unwrap_or_else(|| format!("Player {slot}"))
    };
    let mut entry = TimelineEntry::bare(event.at, event.game_time_us, "");
    match &event.data {
        GameEvent::Kill { killer_slot, victim_slot, weapon_type, weapon_id } => {
            entry.kind = "kill".to_string();
            entry.killer = Some(slot_name(*killer_slot));
            entry.victim = Some(slot_name(*victim_slot));
            entry.weapon = if *weapon_type == WEAPON_NONE && *weapon_id == WEAPON_NONE {
                None
            } else {
                Some(weapon_name(*weapon_type, *weapon_id))
            };
        }
        GameEvent::Chat { sender_slot, text, is_observer } => {
            entry.kind = "chat".to_string();
            entry.sender = Some(slot_name(*sender_slot));
            entry.text = Some(text.clone());
            entry.is_observer = *is_observer;
        }
        GameEvent::Death { slot } => {
            entry.kind = "death".to_string();
            entry.victim = Some(slot_name(*slot));
        }
        GameEvent::Quit { slot } => {
            entry.kind = "quit".to_string();
            entry.sender = Some(slot_name(*slot));
        }
        GameEvent::ReactorDestroyed => entry.kind = "reactor_destroyed".to_string(),
        GameEvent::Escape => entry.kind = "escape".to_string(),
        GameEvent::Join => entry.kind = "join".to_string(),
        GameEvent::FlagCaptured => entry.kind = "flag_captured".to_string(),
        GameEvent::KillGoal => entry.kind = "kill_goal".to_string(),
    }
    entry
}

/// Convert one textual event into a timeline entry. Textual events carry no
/// game clock; the stream's last update stands in for arrival.
fn text_entry(at: DateTime<Utc>, event: &LogEvent) -> TimelineEntry {
    let mut entry = TimelineEntry::bare(at, None, "");
    match event {
        LogEvent::Kill { killer, victim, weapon } => {
            entry.kind = "kill".to_string();
            entry.killer = Some(killer.clone());
            entry.victim = Some(victim.clone());
            entry.weapon = weapon.clone();
        }
        LogEvent::Suicide { player, weapon } => {
            entry.kind = "kill".to_string();
            entry.killer = Some(player.clone());
            entry.victim = Some(player.clone());
            entry.weapon = weapon.clone();
        }
        LogEvent::Death { player } => {
            entry.kind = "death".to_string();
            entry.victim = Some(player.clone());
        }
        LogEvent::Chat { sender, text } => {
            entry.kind = "chat".to_string();
            entry.sender = Some(sender.clone());
            entry.text = Some(text.clone());
        }
        LogEvent::Join { player } => {
            entry.kind = "join".to_string();
            entry.sender = Some(player.clone());
        }
        LogEvent::Quit { player } => {
            entry.kind = "quit".to_string();
            entry.sender = Some(player.clone());
        }
        LogEvent::ReactorDestroyed => entry.kind = "reactor_destroyed".to_string(),
        LogEvent::Escape { player } => {
            entry.kind = "escape".to_string();
            entry.sender = Some(player.clone());
        }
        LogEvent::FlagCaptured { player } => {
            entry.kind = "flag_captured".to_string();
            entry.sender = Some(player.clone());
        }
        LogEvent::KillGoal { player } => {
            entry.kind = "kill_goal".to_string();
            entry.sender = Some(player.clone());
        }
    }
    entry
}

type NameKey = (String, Option<String>, Option<String>, Option<String>, Option<String>);

/// Merge the UDP timelines of `records` with every uploaded stream.
pub fn merged_timeline<'a>(
    records: impl IntoIterator<Item = &'a GameRecord>,
    uploads: &UploadStore,
) -> Vec<TimelineEntry> {
    let mut merged: Vec<TimelineEntry> = Vec::new();
    let mut udp_counts: BTreeMap<NameKey, usize> = BTreeMap::new();
    for record in records {
        for event in record.events.timeline() {
            let entry = timeline_entry(record, event);
            *udp_counts.entry(entry.name_key()).or_default() += 1;
            merged.push(entry);
        }
    }

    // Per name-key, the best single stream bounds how many textual-only
    // occurrences are real; the same kill logged by K uploaders and the host
    // must collapse to one entry.
    let mut best: BTreeMap<NameKey, (usize, Vec<TimelineEntry>)> = BTreeMap::new();
    for stream in uploads.streams() {
        let mut counts: BTreeMap<NameKey, Vec<TimelineEntry>> = BTreeMap::new();
        for event in &stream.events {
            let entry = text_entry(stream.last_update, event);
            counts.entry(entry.name_key()).or_default().push(entry);
        }
        for (key, entries) in counts {
            let slot = best.entry(key).or_insert_with(|| (0, Vec::new()));
            if entries.len() > slot.0 {
                *slot = (entries.len(), entries);
            }
        }
    }
    for (key, (count, entries)) in best {
        let have = udp_counts.get(&key).copied().unwrap_or(0);
        if count > have {
            merged.extend(entries.into_iter().take(count - have));
        }
    }

    // Ascending by game clock; entries without one sort after, by arrival.
    merged.sort_by(|a, b| {
        let ka = (a.game_time_us.unwrap_or(u64::MAX), a.at);
        let kb = (b.game_time_us.unwrap_or(u64::MAX), b.at);
        ka.cmp(&kb)
    });
    merged
}

/// Build the top-level gamelog digest across all live matches and streams.
pub fn digest<'a>(
    records: impl IntoIterator<Item = &'a GameRecord>,
    uploads: &UploadStore,
) -> GamelogDigest {
    let timeline = merged_timeline(records, uploads);

    let mut totals = DigestTotals::default();
    let mut weapons: BTreeMap<String, u32> = BTreeMap::new();
    let mut matrix: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();
    for entry in &timeline {
        match entry.kind.as_str() {
            "kill" => {
                let suicide = entry.killer == entry.victim;
                if suicide {
                    totals.suicides += 1;
                } else {
                    totals.kills += 1;
                }
                totals.deaths += 1;
                if let Some(weapon) = &entry.weapon {
                    *weapons.entry(weapon.clone()).or_default() += 1;
                }
                if let (Some(killer), Some(victim)) = (&entry.killer, &entry.victim) {
                    *matrix.entry(killer.clone()).or_default().entry(victim.clone()).or_default() +=
                        1;
                }
            }
            "death" => totals.deaths += 1,
            "chat" => totals.chat_messages += 1,
            _ => {}
        }
    }

    let mut damage_by_weapon: Vec<WeaponRow> =
        weapons.into_iter().map(|(weapon, kills)| WeaponRow { weapon, kills }).collect();
    damage_by_weapon.sort_by(|a, b| b.kills.cmp(&a.kills).then_with(|| a.weapon.cmp(&b.weapon)));
    damage_by_weapon.truncate(SNAP_WEAPON_CAP);

    let kills: Vec<TimelineEntry> =
        timeline.iter().filter(|e| e.kind == "kill").cloned().collect();
    let chat: Vec<TimelineEntry> = timeline.iter().filter(|e| e.kind == "chat").cloned().collect();

    GamelogDigest {
        totals,
        last_kill: kills.last().cloned(),
        kill_feed: tail(kills, SNAP_KILL_CAP),
        chat: tail(chat, SNAP_CHAT_CAP),
        timeline: tail(timeline, SNAP_TIMELINE_CAP),
        damage_by_weapon,
        kill_matrix_by_name: matrix,
    }
}

/// Per-match events payload for the HTTP surface.
pub fn match_events(record: &GameRecord, uploads: &UploadStore) -> MatchEvents {
    let timeline = merged_timeline(std::iter::once(record), uploads);
    MatchEvents {
        game_id: record.game_id,
        kill_feed: timeline.iter().filter(|e| e.kind == "kill").cloned().collect(),
        chat: timeline.iter().filter(|e| e.kind == "chat").cloned().collect(),
        timeline,
        start_time: record.first_registered,
    }
}

/// Keep the newest `cap` entries, preserving order.
fn tail(mut entries: Vec<TimelineEntry>, cap: usize) -> Vec<TimelineEntry> {
    if entries.len() > cap {
        entries.drain(..entries.len() - cap);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::record::MatchKey;
    use crate::protocol::codec::{DxxVersion, FullInfo, FullPlayerSlot, Register};
    use std::net::SocketAddr;

    fn record_with_full(callsigns: &[&str]) -> GameRecord {
        let reg = Register {
            tracker_ver: 0,
            version: DxxVersion::D1,
            game_port: 5000,
            game_id: 42,
            release: (1, 3, 2),
        };
        let source: SocketAddr = "203.0.113.7:55000".parse().unwrap();
        let mut record = GameRecord::new(source, 5000, &reg);

        let mut players = vec![FullPlayerSlot::default(); 12];
        for (i, name) in callsigns.iter().enumerate() {
            players[i].callsign = name.to_string();
            players[i].connected = 1;
        }
        record.full = Some(FullInfo {
            release: (1, 3, 2),
            players,
            game_name: "1v1".to_string(),
            mission_title: "Wrath".to_string(),
            mission_id: "wrath".to_string(),
            mode: 0,
            refuse: 0,
            difficulty: 2,
            status: 1,
            num_players_prior: 2,
            max_players: 2,
            current_players: callsigns.len() as u8,
            kill_matrix: [[0; 8]; 8],
            total_deaths: [0; 8],
            total_kills: [0; 8],
            kill_goal: 0,
            play_time_allowed: 0,
            level_time: 0,
            control_invul_time: 0,
            monitor_vector: 0,
            scores: [0; 8],
        });
        record
    }

    fn udp_kill(record: &mut GameRecord, killer: u8, victim: u8, us: u64) {
        record.events.push(
            GameEvent::Kill { killer_slot: killer, victim_slot: victim, weapon_type: 0, weapon_id: 13 },
            Some(us),
        );
    }

    #[test]
    fn test_udp_and_textual_kill_collapse_to_one() {
        // The S4 scenario: one opcode-31 kill plus an upload describing the
        // same kill must merge to a single feed entry.
        let mut record = record_with_full(&["alice", "bob"]);
        udp_kill(&mut record, 0, 1, 1_000_000);

        let mut uploads = UploadStore::new();
        uploads.replace("alice", "You killed bob with Plasma Cannon\n").unwrap();

        let timeline = merged_timeline(std::iter::once(&record), &uploads);
        let kills: Vec<_> = timeline.iter().filter(|e| e.kind == "kill").collect();
        assert_eq!(kills.len(), 1);
        assert_eq!(kills[0].killer.as_deref(), Some("alice"));
        assert_eq!(kills[0].victim.as_deref(), Some("bob"));
        assert_eq!(kills[0].weapon.as_deref(), Some("Plasma Cannon"));

        let view = game_view(&record, &uploads);
        assert_eq!(view.players[0].kills, 1);
        assert_eq!(view.players[1].deaths, 1);
    }

    #[test]
    fn test_k_uploaders_same_kill_one_entry() {
        let record = record_with_full(&["alice", "bob", "carol"]);
        let mut uploads = UploadStore::new();
        uploads.replace("alice", "You killed bob with Laser\n").unwrap();
        uploads.replace("bob", "You were killed by alice with Laser\n").unwrap();
        uploads.replace("carol", "alice killed bob with Laser\n").unwrap();

        let timeline = merged_timeline(std::iter::once(&record), &uploads);
        assert_eq!(timeline.iter().filter(|e| e.kind == "kill").count(), 1);
    }

    #[test]
    fn test_repeated_kills_kept_up_to_best_stream_count() {
        let record = record_with_full(&["alice", "bob"]);
        let mut uploads = UploadStore::new();
        uploads
            .replace("alice", "You killed bob with Laser\nYou killed bob with Laser\n")
            .unwrap();
        uploads.replace("bob", "You were killed by alice with Laser\n").unwrap();

        let timeline = merged_timeline(std::iter::once(&record), &uploads);
        // Dedup is per-occurrence: two observed by alice, one by bob -> two.
        assert_eq!(timeline.iter().filter(|e| e.kind == "kill").count(), 2);
    }

    #[test]
    fn test_full_info_stats_preferred_but_never_regress() {
        let mut record = record_with_full(&["alice", "bob"]);
        {
            let full = record.full.as_mut().unwrap();
            full.total_kills[0] = 5;
            full.total_deaths[1] = 5;
        }
        // Event stream saw more kills than the (stale) full info.
        for i in 0..7u64 {
            udp_kill(&mut record, 0, 1, i * 1_000);
        }
        let view = game_view(&record, &UploadStore::new());
        assert_eq!(view.players[0].kills, 7);
        assert_eq!(view.players[1].deaths, 7);
    }

    #[test]
    fn test_unmatched_uploader_is_no_phantom_player() {
        let record = record_with_full(&["alice", "bob"]);
        let mut uploads = UploadStore::new();
        uploads.replace("mallory", "You killed bob with Laser\n").unwrap();

        let view = game_view(&record, &uploads);
        assert_eq!(view.players.len(), 2);
        assert!(view.players.iter().all(|p| p.name != "mallory"));

        // The events stay in the stream under the uploader's identity.
        let timeline = merged_timeline(std::iter::once(&record), &uploads);
        assert!(timeline.iter().any(|e| e.killer.as_deref() == Some("mallory")));
    }

    #[test]
    fn test_kill_matrix_falls_back_to_events() {
        let mut record = record_with_full(&["alice", "bob"]);
        udp_kill(&mut record, 0, 1, 1_000);
        record.full.as_mut().unwrap().kill_matrix[0][1] = 9;
        let view = game_view(&record, &UploadStore::new());
        // Full info present: verbatim.
        assert_eq!(view.kill_matrix.as_ref().unwrap()[0][1], 9);

        let mut bare = record_with_full(&["alice", "bob"]);
        bare.full = None;
        udp_kill(&mut bare, 0, 1, 1_000);
        let view = game_view(&bare, &UploadStore::new());
        // No full info: derived from the event stream.
        assert_eq!(view.kill_matrix.as_ref().unwrap()[0][1], 1);
    }

    #[test]
    fn test_digest_totals_and_weapon_rows() {
        let mut record = record_with_full(&["alice", "bob"]);
        udp_kill(&mut record, 0, 1, 1_000);
        udp_kill(&mut record, 1, 1, 2_000); // suicide
        record.events.push(
            GameEvent::Chat { sender_slot: 0, text: "gg".to_string(), is_observer: false },
            Some(3_000),
        );

        let digest = digest(std::iter::once(&record), &UploadStore::new());
        assert_eq!(digest.totals.kills, 1);
        assert_eq!(digest.totals.suicides, 1);
        assert_eq!(digest.totals.deaths, 2);
        assert_eq!(digest.totals.chat_messages, 1);
        assert_eq!(digest.damage_by_weapon[0].weapon, "Plasma Cannon");
        assert_eq!(digest.damage_by_weapon[0].kills, 2);
        assert_eq!(digest.kill_matrix_by_name["alice"]["bob"], 1);
        assert!(digest.last_kill.is_some());
    }

    #[test]
    fn test_timeline_sorted_by_game_clock() {
        let mut record = record_with_full(&["alice", "bob"]);
        udp_kill(&mut record, 0, 1, 5_000_000);
        udp_kill(&mut record, 1, 0, 1_000_000);
        let timeline = merged_timeline(std::iter::once(&record), &UploadStore::new());
        assert_eq!(timeline[0].game_time_us, Some(1_000_000));
        assert_eq!(timeline[1].game_time_us, Some(5_000_000));
    }

    #[test]
    fn test_match_events_shape() {
        let mut record = record_with_full(&["alice", "bob"]);
        udp_kill(&mut record, 0, 1, 1_000);
        let events = match_events(&record, &UploadStore::new());
        assert_eq!(events.game_id, 42);
        assert_eq!(events.kill_feed.len(), 1);
        assert!(events.chat.is_empty());
        assert_eq!(events.timeline.len(), 1);
    }

    #[test]
    fn test_game_view_lite_only() {
        let mut record = record_with_full(&["alice", "bob"]);
        record.full = None;
        record.lite = Some(crate::protocol::codec::LiteInfo {
            release: (1, 3, 2),
            game_id: 42,
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
        });
        let view = game_view(&record, &UploadStore::new());
        assert_eq!(view.mode, "Anarchy");
        assert_eq!(view.status, "Playing");
        assert_eq!(view.player_count, 2);
        assert!(view.players.is_empty());
        assert!(view.kill_matrix.is_none());
        let _key: MatchKey = ("203.0.113.7".parse().unwrap(), 5000);
        assert_eq!(view.id, "203.0.113.7:5000");
    }
}
