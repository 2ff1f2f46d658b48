//! Socket-facing layer: the UDP protocol engine and the read-out surfaces.

pub mod archive;
pub mod engine;
pub mod http;
pub mod snapshot;
pub mod ws;

pub use archive::{ArchiveSink, ArchivedMatch, JsonDirSink, NullSink};
pub use engine::ProtocolEngine;
pub use ws::{WsFrame, WsHub};
