//! # DXX Tracker
//!
//! UDP tracker and live dashboard backend for DXX-Redux/Rebirth multiplayer
//! games. Game hosts announce themselves over the PyTracker-compatible
//! protocol; the tracker keeps a live registry of matches, decodes embedded
//! match state and in-game events, merges them with per-player gamelog
//! uploads, and publishes the consolidated view over WebSocket, HTTP, and a
//! snapshot file.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         DXX TRACKER                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  protocol/        - Wire format (no I/O)                     │
//! │  ├── codec.rs     - Fixed-layout packet encode/decode        │
//! │  └── multi.rs     - Embedded submessage extraction           │
//! │                                                              │
//! │  game/            - Match state                              │
//! │  ├── record.rs    - Match records and lifecycle              │
//! │  ├── registry.rs  - Active-game index                        │
//! │  ├── events.rs    - Bounded per-match event rings            │
//! │  ├── aggregate.rs - Multi-source evidence merge              │
//! │  └── weapons.rs   - Weapon display names                     │
//! │                                                              │
//! │  gamelog/         - Textual gamelog handling                 │
//! │  ├── parser.rs    - Regex line parser, "You" rewriting       │
//! │  ├── uploads.rs   - Per-player stream store                  │
//! │  └── watcher.rs   - Local gamelog.txt tailer                 │
//! │                                                              │
//! │  network/         - Sockets and read-out surfaces            │
//! │  ├── engine.rs    - UDP dispatch, probes, ACKs, tickers      │
//! │  ├── ws.rs        - WebSocket fan-out                        │
//! │  ├── http.rs      - Read API and gamelog uploads             │
//! │  ├── snapshot.rs  - Atomic snapshot file writer              │
//! │  └── archive.rs   - Finished-match handoff                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! State is warm-memory only: a restart forgets every live match and relies
//! on hosts re-registering. Evidence conflicts are settled by deterministic
//! merge rules, never by trusting one source outright.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod game;
pub mod gamelog;
pub mod network;
pub mod protocol;
pub mod state;
pub mod supervisor;

pub use config::Config;
pub use state::TrackerState;
pub use supervisor::Supervisor;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
