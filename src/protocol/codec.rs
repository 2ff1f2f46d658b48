//! Fixed-layout packet codecs.
//!
//! All multi-byte integers are little-endian; strings are fixed-width
//! null-padded ASCII. Decoders verify the exact length contract of their
//! opcode before touching the payload and fail with
//! [`ProtocolError::Malformed`] otherwise.
//!
//! # Opcode map
//!
//! | Opcode | Direction       | Meaning                                  |
//! |--------|-----------------|------------------------------------------|
//! | 0      | game → tracker  | register (14 or 15 bytes)                |
//! | 1      | game → tracker  | unregister (5) or version-deny (9)       |
//! | 2      | client → tracker| game-list request (3)                    |
//! | 2      | tracker → game  | full-info request (13)                   |
//! | 3      | game → tracker  | full game info (variable)                |
//! | 4      | tracker → game  | lite-info request (11)                   |
//! | 5      | game → tracker  | lite game info (73)                      |
//! | 13     | game → tracker  | position stream (ignored)                |
//! | 19/20  | game → tracker  | relayed multiplayer data                 |
//! | 21     | tracker → game  | register acknowledgement (1)             |
//! | 22     | tracker → client| game-list response entry (variable)      |
//! | 25     | game → tracker  | observer data (handled as 19)            |
//! | 31     | game → tracker  | gamelog kill (13)                        |
//! | 32     | game → tracker  | gamelog chat (>= 11)                     |
//! | 99     | any → tracker   | web-UI ping (>= 5)                       |

use thiserror::Error;

/// REGISTER, announced by a game host on startup.
pub const OP_REGISTER: u8 = 0;
/// UNREGISTER (5 bytes) or VERSION-DENY (9 bytes).
pub const OP_UNREGISTER: u8 = 1;
/// GAME-LIST request on ingress; FULL-INFO request on egress.
pub const OP_GAME_LIST: u8 = 2;
/// Full game info response.
pub const OP_FULL_INFO: u8 = 3;
/// Lite-info request, sent by the tracker.
pub const OP_LITE_REQ: u8 = 4;
/// Lite game info response.
pub const OP_LITE_INFO: u8 = 5;
/// Position data stream; carries nothing the tracker wants.
pub const OP_PDATA: u8 = 13;
/// Multiplayer data, unsequenced.
pub const OP_MDATA_NORM: u8 = 19;
/// Multiplayer data with acknowledgement packet number.
pub const OP_MDATA_ACK: u8 = 20;
/// Register acknowledgement, a single opcode byte.
pub const OP_REGISTER_ACK: u8 = 21;
/// One game-list response frame per confirmed game.
pub const OP_GAME_LIST_RESP: u8 = 22;
/// Observer data, relayed like opcode 19.
pub const OP_OBSDATA: u8 = 25;
/// Gamelog kill event.
pub const OP_GAMELOG_KILL: u8 = 31;
/// Gamelog chat event.
pub const OP_GAMELOG_CHAT: u8 = 32;
/// Web-UI liveness ping.
pub const OP_WEBUI_PING: u8 = 99;

/// Number of player slots carried by a full-info packet.
pub const FULL_INFO_SLOTS: usize = 12;

/// Codec errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Packet length does not match the opcode's layout.
    #[error("malformed opcode {opcode} packet: expected {expected} bytes, got {actual}")]
    Malformed {
        /// Leading opcode byte of the offending packet.
        opcode: u8,
        /// Length the layout requires, as written in the protocol table.
        expected: &'static str,
        /// Length actually received.
        actual: usize,
    },

    /// Version discriminator byte is neither 1 (D1) nor 2 (D2).
    #[error("unsupported game version discriminator {0}")]
    BadVersion(u8),
}

impl ProtocolError {
    fn malformed(opcode: u8, expected: &'static str, actual: usize) -> Self {
        Self::Malformed { opcode, expected, actual }
    }
}

/// Which Descent the host is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DxxVersion {
    /// Descent 1 (D1X).
    D1,
    /// Descent 2 (D2X).
    D2,
}

impl DxxVersion {
    /// Parse the wire discriminator (1 = D1, 2 = D2).
    pub fn from_wire(raw: u8) -> Result<Self, ProtocolError> {
        match raw {
            1 => Ok(Self::D1),
            2 => Ok(Self::D2),
            other => Err(ProtocolError::BadVersion(other)),
        }
    }

    /// Wire discriminator byte.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::D1 => 1,
            Self::D2 => 2,
        }
    }

    /// Four-byte request id used by info request packets.
    pub fn request_id(self) -> &'static [u8; 4] {
        match self {
            Self::D1 => b"D1XR",
            Self::D2 => b"D2XR",
        }
    }
}

impl std::fmt::Display for DxxVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::D1 => write!(f, "D1"),
            Self::D2 => write!(f, "D2"),
        }
    }
}

fn u16_at(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn u32_at(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn u64_at(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

fn i16_at(buf: &[u8], off: usize) -> i16 {
    i16::from_le_bytes([buf[off], buf[off + 1]])
}

fn i32_at(buf: &[u8], off: usize) -> i32 {
    i32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Decode a fixed-width null-padded ASCII field: cut at the first NUL, then
/// drop anything outside the printable range.
fn str_at(buf: &[u8], off: usize, width: usize) -> String {
    let field = &buf[off..off + width];
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    field[..end]
        .iter()
        .filter(|&&b| (0x20..=0x7E).contains(&b))
        .map(|&b| b as char)
        .collect()
}

/// Write `s` into a fixed-width null-padded field.
fn put_str(out: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(width);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + (width - n), 0);
}

// =============================================================================
// INGRESS: game -> tracker
// =============================================================================

/// Decoded REGISTER announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    /// Tracker protocol revision the game speaks.
    pub tracker_ver: u8,
    /// D1 or D2.
    pub version: DxxVersion,
    /// UDP port the game itself listens on (may differ from the source port).
    pub game_port: u16,
    /// Host-chosen 32-bit lifecycle id.
    pub game_id: u32,
    /// Release triplet (major, minor, micro).
    pub release: (u16, u16, u16),
}

/// Decode opcode 0. The micro field is a u16 in the 15-byte layout and a u8
/// in the legacy 14-byte layout.
pub fn decode_register(data: &[u8]) -> Result<Register, ProtocolError> {
    if data.len() != 14 && data.len() != 15 {
        return Err(ProtocolError::malformed(OP_REGISTER, "14 or 15", data.len()));
    }
    let micro = if data.len() == 15 { u16_at(data, 13) } else { data[13] as u16 };
    Ok(Register {
        tracker_ver: data[1],
        version: DxxVersion::from_wire(data[2])?,
        game_port: u16_at(data, 3),
        game_id: u32_at(data, 5),
        release: (u16_at(data, 9), u16_at(data, 11), micro),
    })
}

/// Decode the 5-byte UNREGISTER variant of opcode 1, returning the game id.
pub fn decode_unregister(data: &[u8]) -> Result<u32, ProtocolError> {
    if data.len() != 5 {
        return Err(ProtocolError::malformed(OP_UNREGISTER, "5", data.len()));
    }
    Ok(u32_at(data, 1))
}

/// Decoded VERSION-DENY, the game's answer to a full-info request whose
/// netgame-protocol field did not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDeny {
    /// Release triplet of the denying game.
    pub release: (u16, u16, u16),
    /// The netgame protocol the game actually speaks.
    pub netgame_proto: u16,
}

/// Decode the 9-byte VERSION-DENY variant of opcode 1.
pub fn decode_version_deny(data: &[u8]) -> Result<VersionDeny, ProtocolError> {
    if data.len() != 9 {
        return Err(ProtocolError::malformed(OP_UNREGISTER, "9", data.len()));
    }
    Ok(VersionDeny {
        release: (u16_at(data, 1), u16_at(data, 3), u16_at(data, 5)),
        netgame_proto: u16_at(data, 7),
    })
}

/// Decoded GAME-LIST request from a dashboard or game browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameListRequest {
    /// Which Descent's games the client wants.
    pub version: DxxVersion,
}

/// Decode the 3-byte ingress form of opcode 2.
pub fn decode_game_list_request(data: &[u8]) -> Result<GameListRequest, ProtocolError> {
    if data.len() != 3 {
        return Err(ProtocolError::malformed(OP_GAME_LIST, "3", data.len()));
    }
    Ok(GameListRequest { version: DxxVersion::from_wire(u16_at(data, 1) as u8)? })
}

/// Decoded 73-byte LITE-INFO response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteInfo {
    /// Release triplet.
    pub release: (u16, u16, u16),
    /// Host-chosen lifecycle id; must match the registered one.
    pub game_id: u32,
    /// Netgame name.
    pub game_name: String,
    /// Mission title.
    pub mission_title: String,
    /// Short mission id.
    pub mission_id: String,
    /// Current level number.
    pub level_num: u32,
    /// Raw mode byte (0 = anarchy, ...).
    pub mode: u8,
    /// Refuse-new-players flag.
    pub refuse: u8,
    /// Difficulty 0-4.
    pub difficulty: u8,
    /// Raw status byte (1 = playing, 4 = forming, ...).
    pub status: u8,
    /// Connected player count.
    pub num_players: u8,
    /// Slot limit.
    pub max_players: u8,
    /// Netgame flag bits.
    pub flags: u8,
}

/// Decode opcode 5.
pub fn decode_lite_info(data: &[u8]) -> Result<LiteInfo, ProtocolError> {
    if data.len() != 73 {
        return Err(ProtocolError::malformed(OP_LITE_INFO, "73", data.len()));
    }
    Ok(LiteInfo {
        release: (u16_at(data, 1), u16_at(data, 3), u16_at(data, 5)),
        game_id: u32_at(data, 7),
        game_name: str_at(data, 11, 16),
        mission_title: str_at(data, 27, 26),
        mission_id: str_at(data, 53, 9),
        level_num: u32_at(data, 62),
        mode: data[66],
        refuse: data[67],
        difficulty: data[68],
        status: data[69],
        num_players: data[70],
        max_players: data[71],
        flags: data[72],
    })
}

/// One of the twelve fixed player slots in a full-info packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FullPlayerSlot {
    /// Callsign, empty when the slot is unused.
    pub callsign: String,
    /// Nonzero while the player is connected.
    pub connected: u8,
    /// Multiplayer rank.
    pub rank: u8,
    /// Ship color index; only present in the 14-byte slot layout.
    pub color: Option<u8>,
    /// Missile color index; only present in the 14-byte slot layout.
    pub missile_color: Option<u8>,
}

impl FullPlayerSlot {
    /// Empty callsign plus disconnected means the slot was never used.
    pub fn is_absent(&self) -> bool {
        self.callsign.is_empty() && self.connected == 0
    }
}

/// Decoded FULL-INFO packet: player table, kill matrix and totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullInfo {
    /// Release triplet.
    pub release: (u16, u16, u16),
    /// All twelve wire slots, absent ones included.
    pub players: Vec<FullPlayerSlot>,
    /// Netgame name.
    pub game_name: String,
    /// Mission title.
    pub mission_title: String,
    /// Short mission id.
    pub mission_id: String,
    /// Raw mode byte.
    pub mode: u8,
    /// Refuse-new-players flag.
    pub refuse: u8,
    /// Difficulty 0-4.
    pub difficulty: u8,
    /// Raw status byte.
    pub status: u8,
    /// Player count when the level started.
    pub num_players_prior: u8,
    /// Slot limit.
    pub max_players: u8,
    /// Currently connected player count.
    pub current_players: u8,
    /// Kills[killer][victim], negative entries are suicides per DXX convention.
    pub kill_matrix: [[i16; 8]; 8],
    /// Cumulative deaths per slot.
    pub total_deaths: [i16; 8],
    /// Cumulative kills per slot.
    pub total_kills: [i16; 8],
    /// Kill goal setting, 0 when unset.
    pub kill_goal: i32,
    /// Play time limit in fix seconds, 0 when unset.
    pub play_time_allowed: i32,
    /// Elapsed level time.
    pub level_time: i32,
    /// Reactor invulnerability window.
    pub control_invul_time: i32,
    /// Monitor bit vector.
    pub monitor_vector: i32,
    /// Scores per slot (coop uses these instead of kills).
    pub scores: [i32; 8],
}

/// Settings-area bytes consumed by [`decode_full_info`]: 58 header bytes
/// followed by the 212-byte stats block. Anything past that is release-
/// specific trailing data the tracker does not read.
const FULL_SETTINGS_MIN: usize = 58 + 212;

/// Per-slot stride chosen from the total packet length. The 519/520-byte
/// variants predate the ship color fields.
///
/// TODO: extend this match if a release ships a third slot layout.
fn slot_stride(total_len: usize) -> usize {
    match total_len {
        519 | 520 => 12,
        _ => 14,
    }
}

/// Decode opcode 3. Layout variant is picked from the total length.
pub fn decode_full_info(data: &[u8]) -> Result<FullInfo, ProtocolError> {
    if data.len() < 7 {
        return Err(ProtocolError::malformed(OP_FULL_INFO, "at least 7", data.len()));
    }
    let stride = slot_stride(data.len());
    let settings = 7 + FULL_INFO_SLOTS * stride;
    if data.len() < settings + FULL_SETTINGS_MIN {
        return Err(ProtocolError::malformed(OP_FULL_INFO, "at least 421", data.len()));
    }

    let mut players = Vec::with_capacity(FULL_INFO_SLOTS);
    for i in 0..FULL_INFO_SLOTS {
        let off = 7 + i * stride;
        let (color, missile_color) = if stride == 14 {
            (Some(data[off + 12]), Some(data[off + 13]))
        } else {
            (None, None)
        };
        players.push(FullPlayerSlot {
            callsign: str_at(data, off, 9),
            connected: data[off + 9],
            rank: data[off + 10],
            color,
            missile_color,
        });
    }

    let mut kill_matrix = [[0i16; 8]; 8];
    let stats = settings + 58;
    for (row, matrix_row) in kill_matrix.iter_mut().enumerate() {
        for (col, cell) in matrix_row.iter_mut().enumerate() {
            *cell = i16_at(data, stats + (row * 8 + col) * 2);
        }
    }
    let mut total_deaths = [0i16; 8];
    let mut total_kills = [0i16; 8];
    let mut scores = [0i32; 8];
    for i in 0..8 {
        total_deaths[i] = i16_at(data, stats + 128 + i * 2);
        total_kills[i] = i16_at(data, stats + 144 + i * 2);
        scores[i] = i32_at(data, stats + 180 + i * 4);
    }

    Ok(FullInfo {
        release: (u16_at(data, 1), u16_at(data, 3), u16_at(data, 5)),
        players,
        game_name: str_at(data, settings, 16),
        mission_title: str_at(data, settings + 16, 26),
        mission_id: str_at(data, settings + 42, 9),
        mode: data[settings + 51],
        refuse: data[settings + 52],
        difficulty: data[settings + 53],
        status: data[settings + 54],
        num_players_prior: data[settings + 55],
        max_players: data[settings + 56],
        current_players: data[settings + 57],
        kill_matrix,
        total_deaths,
        total_kills,
        kill_goal: i32_at(data, stats + 160),
        play_time_allowed: i32_at(data, stats + 164),
        level_time: i32_at(data, stats + 168),
        control_invul_time: i32_at(data, stats + 172),
        monitor_vector: i32_at(data, stats + 176),
        scores,
    })
}

/// Decoded opcode 31 kill event. The game clock is a microsecond counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GamelogKill {
    /// Game-internal microsecond counter at the kill.
    pub game_time_us: u64,
    /// Killer slot index.
    pub killer_slot: u8,
    /// Victim slot index.
    pub victim_slot: u8,
    /// Weapon namespace.
    pub weapon_type: u8,
    /// Weapon id within the namespace.
    pub weapon_id: u8,
}

/// Decode opcode 31.
pub fn decode_gamelog_kill(data: &[u8]) -> Result<GamelogKill, ProtocolError> {
    if data.len() != 13 {
        return Err(ProtocolError::malformed(OP_GAMELOG_KILL, "13", data.len()));
    }
    Ok(GamelogKill {
        game_time_us: u64_at(data, 1),
        killer_slot: data[9],
        victim_slot: data[10],
        weapon_type: data[11],
        weapon_id: data[12],
    })
}

/// Decoded opcode 32 chat event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamelogChat {
    /// Game-internal microsecond counter at the message.
    pub game_time_us: u64,
    /// Sender slot index.
    pub sender_slot: u8,
    /// Message text, NUL-stripped and trimmed.
    pub text: String,
}

/// Decode opcode 32.
pub fn decode_gamelog_chat(data: &[u8]) -> Result<GamelogChat, ProtocolError> {
    if data.len() < 11 {
        return Err(ProtocolError::malformed(OP_GAMELOG_CHAT, "at least 11", data.len()));
    }
    let raw: Vec<u8> = data[10..].iter().copied().filter(|&b| b != 0).collect();
    Ok(GamelogChat {
        game_time_us: u64_at(data, 1),
        sender_slot: data[9],
        text: String::from_utf8_lossy(&raw).trim().to_string(),
    })
}

/// Validate an opcode 99 web-UI ping (`"ping"` after the opcode byte).
pub fn decode_webui_ping(data: &[u8]) -> Result<(), ProtocolError> {
    if data.len() < 5 || &data[1..5] != b"ping" {
        return Err(ProtocolError::malformed(OP_WEBUI_PING, "at least 5", data.len()));
    }
    Ok(())
}

// =============================================================================
// EGRESS: tracker -> game / client
// =============================================================================

/// Encode the 11-byte lite-info request (opcode 4).
pub fn encode_lite_request(version: DxxVersion, release: (u16, u16, u16)) -> Vec<u8> {
    let mut out = Vec::with_capacity(11);
    out.push(OP_LITE_REQ);
    out.extend_from_slice(version.request_id());
    out.extend_from_slice(&release.0.to_le_bytes());
    out.extend_from_slice(&release.1.to_le_bytes());
    out.extend_from_slice(&release.2.to_le_bytes());
    out
}

/// Decode an encoded lite-info request; exercised by the egress inverses.
pub fn decode_lite_request(data: &[u8]) -> Result<(DxxVersion, (u16, u16, u16)), ProtocolError> {
    if data.len() != 11 {
        return Err(ProtocolError::malformed(OP_LITE_REQ, "11", data.len()));
    }
    let version = match &data[1..5] {
        b"D1XR" => DxxVersion::D1,
        b"D2XR" => DxxVersion::D2,
        _ => return Err(ProtocolError::BadVersion(data[1])),
    };
    Ok((version, (u16_at(data, 5), u16_at(data, 7), u16_at(data, 9))))
}

/// Encode the 13-byte full-info request (egress form of opcode 2). With an
/// unknown protocol pass 0; the game answers with a version-deny that teaches
/// the real value.
pub fn encode_full_info_request(
    version: DxxVersion,
    release: (u16, u16, u16),
    netgame_proto: u16,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(13);
    out.push(OP_GAME_LIST);
    out.extend_from_slice(version.request_id());
    out.extend_from_slice(&release.0.to_le_bytes());
    out.extend_from_slice(&release.1.to_le_bytes());
    out.extend_from_slice(&release.2.to_le_bytes());
    out.extend_from_slice(&netgame_proto.to_le_bytes());
    out
}

/// Decode an encoded full-info request; exercised by the egress inverses.
pub fn decode_full_info_request(
    data: &[u8],
) -> Result<(DxxVersion, (u16, u16, u16), u16), ProtocolError> {
    if data.len() != 13 {
        return Err(ProtocolError::malformed(OP_GAME_LIST, "13", data.len()));
    }
    let version = match &data[1..5] {
        b"D1XR" => DxxVersion::D1,
        b"D2XR" => DxxVersion::D2,
        _ => return Err(ProtocolError::BadVersion(data[1])),
    };
    Ok((
        version,
        (u16_at(data, 5), u16_at(data, 7), u16_at(data, 9)),
        u16_at(data, 11),
    ))
}

/// The single-byte register acknowledgement (opcode 21).
pub fn encode_register_ack() -> [u8; 1] {
    [OP_REGISTER_ACK]
}

/// Decode a register acknowledgement.
pub fn decode_register_ack(data: &[u8]) -> Result<(), ProtocolError> {
    if data.len() != 1 || data[0] != OP_REGISTER_ACK {
        return Err(ProtocolError::malformed(OP_REGISTER_ACK, "1", data.len()));
    }
    Ok(())
}

/// One opcode-22 game-list response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameListEntry {
    /// Set when `ip` is an IPv6 literal.
    pub ipv6: bool,
    /// Host address as ASCII.
    pub ip: String,
    /// Game port.
    pub port: u16,
    /// Release triplet.
    pub release: (u16, u16, u16),
    /// Lifecycle id.
    pub game_id: u32,
    /// Netgame name.
    pub game_name: String,
    /// Mission title.
    pub mission_title: String,
    /// Short mission id.
    pub mission_id: String,
    /// Current level number.
    pub level_num: u32,
    /// Raw mode byte.
    pub mode: u8,
    /// Refuse-new-players flag.
    pub refuse: u8,
    /// Difficulty 0-4.
    pub difficulty: u8,
    /// Raw status byte.
    pub status: u8,
    /// Connected player count.
    pub num_players: u8,
    /// Slot limit.
    pub max_players: u8,
    /// Netgame flag bits.
    pub flags: u8,
}

/// Encode an opcode-22 frame.
pub fn encode_game_list_entry(entry: &GameListEntry) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + entry.ip.len() + 1 + 75);
    out.push(OP_GAME_LIST_RESP);
    out.push(entry.ipv6 as u8);
    out.extend_from_slice(entry.ip.as_bytes());
    out.push(0);
    out.extend_from_slice(&entry.port.to_le_bytes());
    out.extend_from_slice(&entry.release.0.to_le_bytes());
    out.extend_from_slice(&entry.release.1.to_le_bytes());
    out.extend_from_slice(&entry.release.2.to_le_bytes());
    out.extend_from_slice(&entry.game_id.to_le_bytes());
    put_str(&mut out, &entry.game_name, 16);
    put_str(&mut out, &entry.mission_title, 26);
    put_str(&mut out, &entry.mission_id, 9);
    out.extend_from_slice(&entry.level_num.to_le_bytes());
    out.push(entry.mode);
    out.push(entry.refuse);
    out.push(entry.difficulty);
    out.push(entry.status);
    out.push(entry.num_players);
    out.push(entry.max_players);
    out.push(entry.flags);
    out.push(0);
    out
}

/// Decode an opcode-22 frame; exercised by the egress inverses.
pub fn decode_game_list_entry(data: &[u8]) -> Result<GameListEntry, ProtocolError> {
    // 2 fixed bytes, the NUL-terminated ip, then 75 bytes of fixed payload.
    let nul = data
        .iter()
        .skip(2)
        .position(|&b| b == 0)
        .ok_or(ProtocolError::malformed(OP_GAME_LIST_RESP, "at least 78", data.len()))?;
    let rest = 2 + nul + 1;
    if data.len() != rest + 75 {
        return Err(ProtocolError::malformed(OP_GAME_LIST_RESP, "ip + 78", data.len()));
    }
    Ok(GameListEntry {
        ipv6: data[1] != 0,
        ip: String::from_utf8_lossy(&data[2..2 + nul]).into_owned(),
        port: u16_at(data, rest),
        release: (u16_at(data, rest + 2), u16_at(data, rest + 4), u16_at(data, rest + 6)),
        game_id: u32_at(data, rest + 8),
        game_name: str_at(data, rest + 12, 16),
        mission_title: str_at(data, rest + 28, 26),
        mission_id: str_at(data, rest + 54, 9),
        level_num: u32_at(data, rest + 63),
        mode: data[rest + 67],
        refuse: data[rest + 68],
        difficulty: data[rest + 69],
        status: data[rest + 70],
        num_players: data[rest + 71],
        max_players: data[rest + 72],
        flags: data[rest + 73],
    })
}

/// Encode the 8-byte web-UI pong: `"pong"` plus unix seconds.
pub fn encode_pong(unix_secs: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(b"pong");
    out.extend_from_slice(&unix_secs.to_le_bytes());
    out
}

/// Decode a pong reply; exercised by the egress inverses.
pub fn decode_pong(data: &[u8]) -> Result<u32, ProtocolError> {
    if data.len() != 8 || &data[..4] != b"pong" {
        return Err(ProtocolError::malformed(OP_WEBUI_PING, "8", data.len()));
    }
    Ok(u32_at(data, 4))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_register() -> Vec<u8> {
        // game-port 5000, game-id 0x04030201, v1.3.2, D1
        vec![
            0x00, 0x00, 0x01, 0x88, 0x13, 0x01, 0x02, 0x03, 0x04, 0x01, 0x00, 0x03, 0x00, 0x02,
            0x00,
        ]
    }

    #[test]
    fn test_decode_register_15() {
        let reg = decode_register(&sample_register()).unwrap();
        assert_eq!(reg.version, DxxVersion::D1);
        assert_eq!(reg.game_port, 5000);
        assert_eq!(reg.game_id, 0x0403_0201);
        assert_eq!(reg.release, (1, 3, 2));
    }

    #[test]
    fn test_decode_register_14_legacy_micro() {
        let mut data = sample_register();
        data.truncate(13);
        data.push(7); // u8 micro
        let reg = decode_register(&data).unwrap();
        assert_eq!(reg.release, (1, 3, 7));
    }

    #[test]
    fn test_decode_register_rejects_other_lengths() {
        for len in [0usize, 1, 13, 16, 64] {
            let data = vec![0u8; len];
            assert!(matches!(
                decode_register(&data),
                Err(ProtocolError::Malformed { opcode: 0, actual, .. }) if actual == len
            ));
        }
    }

    #[test]
    fn test_decode_register_rejects_bad_version() {
        let mut data = sample_register();
        data[2] = 3;
        assert_eq!(decode_register(&data), Err(ProtocolError::BadVersion(3)));
    }

    #[test]
    fn test_decode_unregister() {
        let data = [0x01, 0x01, 0x02, 0x03, 0x04];
        assert_eq!(decode_unregister(&data).unwrap(), 0x0403_0201);
        assert!(decode_unregister(&data[..4]).is_err());
    }

    #[test]
    fn test_decode_version_deny() {
        let mut data = vec![0x01];
        for v in [1u16, 3, 2, 7650] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let deny = decode_version_deny(&data).unwrap();
        assert_eq!(deny.release, (1, 3, 2));
        assert_eq!(deny.netgame_proto, 7650);
        assert!(decode_version_deny(&data[..8]).is_err());
    }

    fn sample_lite(game_id: u32) -> Vec<u8> {
        let mut data = vec![0x05];
        for v in [1u16, 3, 2] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.extend_from_slice(&game_id.to_le_bytes());
        put_str(&mut data, "1v1", 16);
        put_str(&mut data, "Wrath", 26);
        put_str(&mut data, "wrath", 9);
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&[0, 0, 2, 1, 2, 2, 0]); // mode..flags
        data
    }

    #[test]
    fn test_decode_lite_info() {
        let data = sample_lite(0x0403_0201);
        assert_eq!(data.len(), 73);
        let lite = decode_lite_info(&data).unwrap();
        assert_eq!(lite.game_id, 0x0403_0201);
        assert_eq!(lite.game_name, "1v1");
        assert_eq!(lite.mission_title, "Wrath");
        assert_eq!(lite.level_num, 1);
        assert_eq!(lite.mode, 0);
        assert_eq!(lite.status, 1);
        assert_eq!(lite.num_players, 2);
        assert_eq!(lite.max_players, 2);
    }

    #[test]
    fn test_decode_lite_info_rejects_other_lengths() {
        for len in [0usize, 72, 74, 100] {
            assert!(decode_lite_info(&vec![5u8; len]).is_err());
        }
    }

    #[test]
    fn test_lite_strings_stripped() {
        let mut data = sample_lite(1);
        data[11] = 0x1B; // control byte inside name field
        data[12] = b'x';
        let lite = decode_lite_info(&data).unwrap();
        assert_eq!(lite.game_name, "xv1");
    }

    /// Build a stride-12 full-info packet padded to 519 bytes.
    fn sample_full() -> Vec<u8> {
        let mut data = vec![0x03];
        for v in [1u16, 3, 2] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        for i in 0..FULL_INFO_SLOTS {
            let name = match i {
                0 => "alice",
                1 => "bob",
                _ => "",
            };
            put_str(&mut data, name, 9);
            data.push((i < 2) as u8); // connected
            data.push(0); // rank
            data.push(0); // extra
        }
        put_str(&mut data, "1v1", 16);
        put_str(&mut data, "Wrath", 26);
        put_str(&mut data, "wrath", 9);
        data.extend_from_slice(&[0, 0, 2, 1, 2, 2, 2]); // mode..current_players
        // kill matrix: alice killed bob 3 times, bob suicided once
        let mut matrix = [[0i16; 8]; 8];
        matrix[0][1] = 3;
        matrix[1][1] = -1;
        for row in &matrix {
            for cell in row {
                data.extend_from_slice(&cell.to_le_bytes());
            }
        }
        for deaths in [3i16, 4, 0, 0, 0, 0, 0, 0] {
            data.extend_from_slice(&deaths.to_le_bytes());
        }
        for kills in [3i16, 0, 0, 0, 0, 0, 0, 0] {
            data.extend_from_slice(&kills.to_le_bytes());
        }
        for v in [0i32, 0, 120, 0, 0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        for score in [30i32, -5, 0, 0, 0, 0, 0, 0] {
            data.extend_from_slice(&score.to_le_bytes());
        }
        data.resize(519, 0);
        data
    }

    #[test]
    fn test_decode_full_info_stride12() {
        let full = decode_full_info(&sample_full()).unwrap();
        assert_eq!(full.players[0].callsign, "alice");
        assert_eq!(full.players[1].callsign, "bob");
        assert!(full.players[2].is_absent());
        assert_eq!(full.players[0].color, None);
        assert_eq!(full.kill_matrix[0][1], 3);
        assert_eq!(full.kill_matrix[1][1], -1);
        assert_eq!(full.total_kills[0], 3);
        assert_eq!(full.total_deaths[1], 4);
        assert_eq!(full.scores[0], 30);
        assert_eq!(full.scores[1], -5);
        assert_eq!(full.level_time, 120);
        assert_eq!(full.current_players, 2);
    }

    #[test]
    fn test_decode_full_info_stride14() {
        // Rebuild with 14-byte slots; not 519/520 so the wide stride is chosen.
        let narrow = sample_full();
        let mut data = narrow[..7].to_vec();
        for i in 0..FULL_INFO_SLOTS {
            let off = 7 + i * 12;
            data.extend_from_slice(&narrow[off..off + 12]);
            data.push(i as u8); // color
            data.push(i as u8); // missile color
        }
        data.extend_from_slice(&narrow[7 + 12 * 12..]);
        assert_ne!(data.len(), 519);
        let full = decode_full_info(&data).unwrap();
        assert_eq!(full.players[1].callsign, "bob");
        assert_eq!(full.players[1].color, Some(1));
        assert_eq!(full.kill_matrix[0][1], 3);
    }

    #[test]
    fn test_decode_full_info_rejects_short() {
        assert!(decode_full_info(&[3u8; 6]).is_err());
        assert!(decode_full_info(&[3u8; 200]).is_err());
    }

    #[test]
    fn test_decode_gamelog_kill() {
        let mut data = vec![31u8];
        data.extend_from_slice(&1_000_000u64.to_le_bytes());
        data.extend_from_slice(&[0, 1, 0, 13]);
        let kill = decode_gamelog_kill(&data).unwrap();
        assert_eq!(kill.game_time_us, 1_000_000);
        assert_eq!(kill.killer_slot, 0);
        assert_eq!(kill.victim_slot, 1);
        assert_eq!(kill.weapon_id, 13);
        assert!(decode_gamelog_kill(&data[..12]).is_err());
        data.push(0);
        assert!(decode_gamelog_kill(&data).is_err());
    }

    #[test]
    fn test_decode_gamelog_chat() {
        let mut data = vec![32u8];
        data.extend_from_slice(&2_500_000u64.to_le_bytes());
        data.push(3);
        data.extend_from_slice(b" good game \0\0");
        let chat = decode_gamelog_chat(&data).unwrap();
        assert_eq!(chat.sender_slot, 3);
        assert_eq!(chat.text, "good game");
        assert!(decode_gamelog_chat(&data[..10]).is_err());
    }

    #[test]
    fn test_webui_ping_pong() {
        assert!(decode_webui_ping(b"\x63ping").is_ok());
        assert!(decode_webui_ping(b"\x63pin").is_err());
        assert!(decode_webui_ping(b"\x63pung").is_err());
        let pong = encode_pong(1_700_000_000);
        assert_eq!(pong.len(), 8);
        assert_eq!(decode_pong(&pong).unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_lite_request_inverse() {
        let frame = encode_lite_request(DxxVersion::D1, (1, 3, 2));
        assert_eq!(frame.len(), 11);
        assert_eq!(&frame[..5], b"\x04D1XR");
        assert_eq!(decode_lite_request(&frame).unwrap(), (DxxVersion::D1, (1, 3, 2)));
    }

    #[test]
    fn test_full_info_request_inverse() {
        let frame = encode_full_info_request(DxxVersion::D2, (1, 3, 2), 7650);
        assert_eq!(frame.len(), 13);
        assert_eq!(
            decode_full_info_request(&frame).unwrap(),
            (DxxVersion::D2, (1, 3, 2), 7650)
        );
    }

    #[test]
    fn test_register_ack_inverse() {
        let frame = encode_register_ack();
        assert_eq!(frame, [21]);
        assert!(decode_register_ack(&frame).is_ok());
    }

    #[test]
    fn test_game_list_entry_inverse() {
        let entry = GameListEntry {
            ipv6: false,
            ip: "203.0.113.7".to_string(),
            port: 5000,
            release: (1, 3, 2),
            game_id: 0x0403_0201,
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
        };
        let frame = encode_game_list_entry(&entry);
        assert_eq!(frame[0], OP_GAME_LIST_RESP);
        assert_eq!(decode_game_list_entry(&frame).unwrap(), entry);
    }

    #[test]
    fn test_game_list_request() {
        let req = decode_game_list_request(&[2, 1, 0]).unwrap();
        assert_eq!(req.version, DxxVersion::D1);
        assert!(decode_game_list_request(&[2, 1]).is_err());
        assert!(decode_game_list_request(&[2, 1, 0, 0]).is_err());
    }
}
