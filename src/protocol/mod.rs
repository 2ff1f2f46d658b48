//! PyTracker-compatible UDP wire protocol.
//!
//! `codec` holds the fixed-layout packet encoders/decoders, `multi` the
//! submessage extraction for relayed in-game data frames. Both are pure
//! byte-level transformations; the socket never appears here.

pub mod codec;
pub mod multi;

pub use codec::{
    DxxVersion, FullInfo, FullPlayerSlot, GameListEntry, GameListRequest, GamelogChat,
    GamelogKill, LiteInfo, ProtocolError, Register, VersionDeny,
};
pub use multi::{MultiMessage, MultiPayload};
