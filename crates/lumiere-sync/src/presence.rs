//! Viewer presence tracking.
//!
//! Maintains the member set for each stream room.  The set is only ever
//! replaced wholesale by a `sync` event; incremental join/leave events are
//! diagnostics and never adjust the count, so missed messages cannot make
//! the count drift.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use lumiere_shared::{ConnectionKey, StreamId};

/// Tracks the currently connected viewers of each subscribed stream.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    rooms: HashMap<StreamId, HashMap<ConnectionKey, DateTime<Utc>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the room's member set with the authoritative full set.
    /// This is the reconciliation point; it always wins over anything
    /// inferred locally.  Returns the new count.
    pub fn on_sync(
        &mut self,
        stream: StreamId,
        members: HashMap<ConnectionKey, DateTime<Utc>>,
    ) -> usize {
        let count = members.len();
        debug!(stream = %stream, count, "presence sync");
        self.rooms.insert(stream, members);
        count
    }

    /// A connection joined.  Diagnostics only; the count changes on the
    /// next sync.
    pub fn on_join(&self, stream: StreamId, key: &ConnectionKey) {
        debug!(stream = %stream, key = %key, "presence join");
    }

    /// A connection left.  Diagnostics only; the count changes on the
    /// next sync.
    pub fn on_leave(&self, stream: StreamId, key: &ConnectionKey) {
        debug!(stream = %stream, key = %key, "presence leave");
    }

    /// Number of distinct connection keys currently tracked for a stream.
    pub fn count(&self, stream: StreamId) -> usize {
        self.rooms.get(&stream).map(HashMap::len).unwrap_or(0)
    }

    /// Whether a connection key is present in the room.
    pub fn contains(&self, stream: StreamId, key: &ConnectionKey) -> bool {
        self.rooms
            .get(&stream)
            .map(|m| m.contains_key(key))
            .unwrap_or(false)
    }

    /// Drop all state for a stream (on navigation away).
    pub fn clear(&mut self, stream: StreamId) {
        self.rooms.remove(&stream);
    }
}
