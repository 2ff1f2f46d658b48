//! Match records.
//!
//! One [`GameRecord`] per live match, keyed by `(host-ip, game-port)`. The
//! record is the registry's unit of state: identity, lifecycle phase, the
//! latest lite/full info decodes, and the per-match event store.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::game::events::EventStore;
use crate::protocol::codec::{DxxVersion, FullInfo, LiteInfo, Register};

/// Maximum real player slots in a Descent netgame.
pub const MAX_SLOTS: usize = 8;

/// A live match is identified by host address and announced game port.
pub type MatchKey = (IpAddr, u16);

/// Render a match key the way the HTTP surface addresses it.
pub fn match_key_string(key: &MatchKey) -> String {
    format!("{}:{}", key.0, key.1)
}

/// Parse an `ip:port` match key; the reverse of [`match_key_string`].
pub fn parse_match_key(s: &str) -> Option<MatchKey> {
    let (ip, port) = s.rsplit_once(':')?;
    Some((ip.parse().ok()?, port.parse().ok()?))
}

/// Game mode announced in lite/full info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMode {
    /// Free-for-all.
    Anarchy,
    /// Team free-for-all.
    TeamAnarchy,
    /// Robots enabled.
    RoboAnarchy,
    /// Cooperative campaign.
    Cooperative,
    /// Capture the flag.
    CaptureFlag,
    /// Hoard.
    Hoard,
    /// Team hoard.
    TeamHoard,
    /// Bounty.
    Bounty,
    /// Unmapped wire value.
    Unknown(u8),
}

impl GameMode {
    /// Map the wire byte.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Anarchy,
            1 => Self::TeamAnarchy,
            2 => Self::RoboAnarchy,
            3 => Self::Cooperative,
            4 => Self::CaptureFlag,
            5 => Self::Hoard,
            6 => Self::TeamHoard,
            7 => Self::Bounty,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for GameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anarchy => write!(f, "Anarchy"),
            Self::TeamAnarchy => write!(f, "Team Anarchy"),
            Self::RoboAnarchy => write!(f, "Robo Anarchy"),
            Self::Cooperative => write!(f, "Cooperative"),
            Self::CaptureFlag => write!(f, "Capture Flag"),
            Self::Hoard => write!(f, "Hoard"),
            Self::TeamHoard => write!(f, "Team Hoard"),
            Self::Bounty => write!(f, "Bounty"),
            Self::Unknown(raw) => write!(f, "Mode {raw}"),
        }
    }
}

/// Netgame status announced in lite/full info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    /// Host sits in the menu.
    Menu,
    /// Level in progress.
    Playing,
    /// Between levels.
    Between,
    /// End-of-level screen.
    EndLevel,
    /// Lobby, players joining.
    Forming,
    /// Unmapped wire value.
    Unknown(u8),
}

impl GameStatus {
    /// Map the wire byte.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Menu,
            1 => Self::Playing,
            2 => Self::Between,
            3 => Self::EndLevel,
            4 => Self::Forming,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Menu => write!(f, "Menu"),
            Self::Playing => write!(f, "Playing"),
            Self::Between => write!(f, "Between"),
            Self::EndLevel => write!(f, "EndLevel"),
            Self::Forming => write!(f, "Forming"),
            Self::Unknown(raw) => write!(f, "Status {raw}"),
        }
    }
}

/// Lifecycle phase; transitions only move forward. A re-registration with a
/// changed game-id is a new lifecycle on the same key, never a transition
/// back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Registered, never produced an info response.
    Pending,
    /// At least one lite or full info decode succeeded.
    Confirmed,
    /// Unregistered or reaped; the record is on its way to the archive sink.
    Dead,
}

/// Everything the tracker knows about one live match.
#[derive(Debug)]
pub struct GameRecord {
    /// Host ip and announced game port.
    pub key: MatchKey,
    /// Host-chosen lifecycle id.
    pub game_id: u32,
    /// D1 or D2.
    pub version: DxxVersion,
    /// Release triplet.
    pub release: (u16, u16, u16),
    /// Netgame protocol, 0 until a version-deny teaches it.
    pub netgame_proto: u16,
    /// Address the REGISTER came from; the ACK target. Its port may differ
    /// from the game port.
    pub source_addr: SocketAddr,
    /// Wall clock of the first REGISTER.
    pub first_registered: DateTime<Utc>,
    /// Monotonic creation instant.
    pub created_at: Instant,
    /// Monotonic instant of the last packet attributable to this match.
    pub last_seen: Instant,
    /// Lifecycle phase.
    pub phase: Phase,
    /// Set once the register-ACK triplet has been dispatched.
    pub ack_sent: bool,
    /// Latest lite info decode.
    pub lite: Option<LiteInfo>,
    /// Latest full info decode.
    pub full: Option<FullInfo>,
    /// Per-match event rings and counters.
    pub events: EventStore,
}

impl GameRecord {
    /// Create a fresh pending record from a REGISTER.
    pub fn new(source_addr: SocketAddr, game_port: u16, reg: &Register) -> Self {
        let now = Instant::now();
        Self {
            key: (source_addr.ip(), game_port),
            game_id: reg.game_id,
            version: reg.version,
            release: reg.release,
            netgame_proto: 0,
            source_addr,
            first_registered: Utc::now(),
            created_at: now,
            last_seen: now,
            phase: Phase::Pending,
            ack_sent: false,
            lite: None,
            full: None,
            events: EventStore::new(),
        }
    }

    /// Bump the liveness clock.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Best known game name.
    pub fn game_name(&self) -> &str {
        self.lite
            .as_ref()
            .map(|l| l.game_name.as_str())
            .or_else(|| self.full.as_ref().map(|f| f.game_name.as_str()))
            .unwrap_or("")
    }

    /// Raw mode byte, preferring full info.
    pub fn mode(&self) -> GameMode {
        let raw = self
            .full
            .as_ref()
            .map(|f| f.mode)
            .or_else(|| self.lite.as_ref().map(|l| l.mode))
            .unwrap_or(0);
        GameMode::from_raw(raw)
    }

    /// Raw status byte, preferring full info.
    pub fn status(&self) -> GameStatus {
        let raw = self
            .full
            .as_ref()
            .map(|f| f.status)
            .or_else(|| self.lite.as_ref().map(|l| l.status))
            .unwrap_or(0);
        GameStatus::from_raw(raw)
    }

    /// Display names for the eight real slots. Duplicate callsigns get
    /// " (1)", " (2)" suffixes in slot order; slots without a known player
    /// are empty strings.
    pub fn display_names(&self) -> [String; MAX_SLOTS] {
        let mut names: [String; MAX_SLOTS] = Default::default();
        let Some(full) = &self.full else {
            return names;
        };
        for (i, name) in names.iter_mut().enumerate() {
            let Some(slot) = full.players.get(i) else { continue };
            if slot.is_absent() {
                continue;
            }
            let dup_rank = full.players[..i]
                .iter()
                .filter(|p| !p.is_absent() && p.callsign == slot.callsign)
                .count();
            *name = if dup_rank == 0 {
                slot.callsign.clone()
            } else {
                format!("{} ({})", slot.callsign, dup_rank)
            };
        }
        names
    }

    /// Display name for one slot, if the slot is occupied.
    pub fn slot_name(&self, slot: u8) -> Option<String> {
        let names = self.display_names();
        let name = names.get(slot as usize)?;
        if name.is_empty() {
            None
        } else {
            Some(name.clone())
        }
    }

    /// Filename-style id for the archive sink.
    pub fn archive_id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.key.0,
            self.key.1,
            self.game_id,
            self.first_registered.timestamp()
        )
    }
}
