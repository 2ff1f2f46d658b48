//! Per-match event store.
//!
//! Three bounded rings (kill feed, chat, combined timeline) plus cumulative
//! per-slot counters that survive ring overflow. Appending is O(1); overflow
//! drops the oldest entry.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::game::record::MAX_SLOTS;

/// Sentinel weapon byte for kill events whose source carries no weapon
/// information (relayed multiplayer-data kills).
pub const WEAPON_NONE: u8 = 0xFF;

/// Kill-feed ring capacity.
pub const KILL_FEED_CAP: usize = 100;
/// Chat ring capacity.
pub const CHAT_CAP: usize = 200;
/// Combined timeline ring capacity.
pub const TIMELINE_CAP: usize = 500;

/// One in-match event, as observed over UDP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameEvent {
    /// A slot killed another slot (or itself).
    Kill {
        /// Killer slot index.
        killer_slot: u8,
        /// Victim slot index.
        victim_slot: u8,
        /// Weapon namespace from the kill packet.
        weapon_type: u8,
        /// Weapon id from the kill packet.
        weapon_id: u8,
    },
    /// Chat line.
    Chat {
        /// Sender slot index.
        sender_slot: u8,
        /// Message text.
        text: String,
        /// Relayed from an observer rather than a player.
        is_observer: bool,
    },
    /// A ship exploded without a credited killer.
    Death {
        /// Victim slot index.
        slot: u8,
    },
    /// A player left the game.
    Quit {
        /// Quitting slot index.
        slot: u8,
    },
    /// Reactor destroyed; the escape countdown is running.
    ReactorDestroyed,
    /// A player escaped through the exit tunnel.
    Escape,
    /// A player joined mid-game.
    Join,
    /// CTF flag capture.
    FlagCaptured,
    /// The kill goal was reached.
    KillGoal,
}

/// An event plus its two clocks: wall-clock arrival, and the game's internal
/// microsecond counter when the packet carried one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEvent {
    /// Wall-clock arrival time.
    pub at: DateTime<Utc>,
    /// Game-internal microsecond counter, when present.
    pub game_time_us: Option<u64>,
    /// The event itself.
    #[serde(flatten)]
    pub data: GameEvent,
}

/// Cumulative per-slot tallies derived from kill events. Ring overflow never
/// loses these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotCounters {
    /// Kills credited to the slot.
    pub kills: u32,
    /// Deaths suffered by the slot.
    pub deaths: u32,
    /// Self-kills; each also counts one death, never a kill.
    pub suicides: u32,
}

/// Bounded event rings and counters for one match.
#[derive(Debug, Default)]
pub struct EventStore {
    kill_feed: VecDeque<StoredEvent>,
    chat: VecDeque<StoredEvent>,
    timeline: VecDeque<StoredEvent>,
    counters: [SlotCounters; MAX_SLOTS],
    /// Kill counts indexed `[killer][victim]`, diagonal = suicides.
    event_matrix: [[u32; MAX_SLOTS]; MAX_SLOTS],
}

impl EventStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, updating whichever rings and counters it touches.
    pub fn push(&mut self, data: GameEvent, game_time_us: Option<u64>) -> StoredEvent {
        let entry = StoredEvent { at: Utc::now(), game_time_us, data };

        match &entry.data {
            GameEvent::Kill { killer_slot, victim_slot, .. } => {
                let (k, v) = (*killer_slot as usize, *victim_slot as usize);
                if k < MAX_SLOTS && v < MAX_SLOTS {
                    self.event_matrix[k][v] += 1;
                    if k == v {
                        self.counters[k].suicides += 1;
                        self.counters[k].deaths += 1;
                    } else {
                        self.counters[k].kills += 1;
                        self.counters[v].deaths += 1;
                    }
                }
                push_bounded(&mut self.kill_feed, entry.clone(), KILL_FEED_CAP);
            }
            GameEvent::Chat { .. } => {
                push_bounded(&mut self.chat, entry.clone(), CHAT_CAP);
            }
            _ => {}
        }
        push_bounded(&mut self.timeline, entry.clone(), TIMELINE_CAP);
        entry
    }

    /// Kill feed, oldest first.
    pub fn kill_feed(&self) -> impl Iterator<Item = &StoredEvent> {
        self.kill_feed.iter()
    }

    /// Chat ring, oldest first.
    pub fn chat(&self) -> impl Iterator<Item = &StoredEvent> {
        self.chat.iter()
    }

    /// Combined timeline, oldest first.
    pub fn timeline(&self) -> impl Iterator<Item = &StoredEvent> {
        self.timeline.iter()
    }

    /// Cumulative per-slot tallies.
    pub fn counters(&self) -> &[SlotCounters; MAX_SLOTS] {
        &self.counters
    }

    /// Kill counts indexed `[killer][victim]`.
    pub fn event_matrix(&self) -> &[[u32; MAX_SLOTS]; MAX_SLOTS] {
        &self.event_matrix
    }

    /// Most recent kill, if any survives in the ring.
    pub fn last_kill(&self) -> Option<&StoredEvent> {
        self.kill_feed.back()
    }

    /// True when nothing has ever been appended.
    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }
}

fn push_bounded(ring: &mut VecDeque<StoredEvent>, entry: StoredEvent, cap: usize) {
    if ring.len() == cap {
        ring.pop_front();
    }
    ring.push_back(entry);
}
