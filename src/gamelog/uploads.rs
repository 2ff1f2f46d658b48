//! Per-player textual stream store.
//!
//! One [`ClientStream`] per uploading player (plus one for the local
//! watcher), holding the parsed events with "You" already rewritten to the
//! bound identity, the unconsumed tail of the upload, and the last update
//! time. Summaries are recomputed from the accumulated events on demand.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::gamelog::parser::{self, LogEvent, LogSummary, ParseError};

/// One uploader's parsed stream.
#[derive(Debug, Clone)]
pub struct ClientStream {
    /// Bound identity; "You" in this stream means this player.
    pub identity: String,
    /// The identity was inferred from the stream, not supplied by the
    /// uploader.
    pub provisional: bool,
    /// Parsed events in upload order.
    pub events: Vec<LogEvent>,
    /// Unconsumed partial final line, re-fed on the next append.
    pub tail: String,
    /// Wall clock of the last upload touching this stream.
    pub last_update: DateTime<Utc>,
}

impl ClientStream {
    fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            provisional: false,
            events: Vec::new(),
            tail: String::new(),
            last_update: Utc::now(),
        }
    }

    /// Summary over everything parsed so far.
    pub fn summary(&self) -> LogSummary {
        parser::summarize(&self.events, Some(&self.identity), self.provisional)
    }
}

/// All uploaded streams, keyed by player name.
#[derive(Debug, Default)]
pub struct UploadStore {
    streams: BTreeMap<String, ClientStream>,
}

impl UploadStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a player's stream with a full upload. Returns the total event
    /// count. On a parse error the previous stream is left untouched.
    pub fn replace(&mut self, player: &str, content: &str) -> Result<usize, ParseError> {
        let parsed = parser::parse_gamelog(content, Some(player))?;
        let mut stream = ClientStream::new(player);
        stream.tail = content[parsed.consumed..].to_string();
        stream.events = parsed.events;
        let count = stream.events.len();
        self.streams.insert(player.to_string(), stream);
        Ok(count)
    }

    /// Append an upload tail to a player's stream, creating it on first
    /// contact. Returns the number of newly parsed events.
    pub fn append(&mut self, player: &str, content: &str) -> Result<usize, ParseError> {
        // Parse before touching the stream so errors commit nothing.
        let pending = match self.streams.get(player) {
            Some(stream) => format!("{}{}", stream.tail, content),
            None => content.to_string(),
        };
        let parsed = parser::parse_gamelog(&pending, Some(player))?;

        let stream = self
            .streams
            .entry(player.to_string())
            .or_insert_with(|| ClientStream::new(player));
        stream.tail = pending[parsed.consumed..].to_string();
        let added = parsed.events.len();
        stream.events.extend(parsed.events);
        stream.last_update = Utc::now();
        Ok(added)
    }

    /// Flag a stream's identity as inferred rather than uploader-supplied.
    pub fn mark_provisional(&mut self, player: &str) {
        if let Some(stream) = self.streams.get_mut(player) {
            stream.provisional = true;
        }
    }

    /// Drop a player's accumulated events; used when the source file shrank
    /// and a new match is assumed.
    pub fn reset(&mut self, player: &str) {
        if let Some(stream) = self.streams.get_mut(player) {
            stream.events.clear();
            stream.tail.clear();
            stream.last_update = Utc::now();
        }
    }

    /// Stream for one player.
    pub fn get(&self, player: &str) -> Option<&ClientStream> {
        self.streams.get(player)
    }

    /// All streams in name order.
    pub fn streams(&self) -> impl Iterator<Item = &ClientStream> {
        self.streams.values()
    }

    /// Number of distinct uploaders.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// True when nobody has uploaded.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Total events across all streams.
    pub fn total_events(&self) -> usize {
        self.streams.values().map(|s| s.events.len()).sum()
    }
}
