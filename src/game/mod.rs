//! Match state: registry, records, per-match events, and the evidence merge.

pub mod aggregate;
pub mod events;
pub mod record;
pub mod registry;
pub mod weapons;

pub use record::{GameRecord, MatchKey, Phase};
pub use registry::{ApplyOutcome, GameRegistry, RegisterOutcome};
