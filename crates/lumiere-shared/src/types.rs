use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::OPTIMISTIC_ID_PREFIX;

// Stream identifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Name of the pub/sub room carrying this stream's chat, tip and
    /// presence traffic.
    pub fn to_room(&self) -> String {
        format!("stream:{}", self.0)
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// User identity = wallet address or platform account id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> String {
        self.0.chars().take(8).collect()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Message id
// ---------------------------------------------------------------------------

static OPTIMISTIC_SEQ: AtomicU64 = AtomicU64::new(0);

/// Chat message identifier.
///
/// Either a server-assigned id, or a locally generated placeholder of the
/// form `optimistic-<millis>-<seq>` while a submission is in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh placeholder id, unique within this process.
    pub fn optimistic() -> Self {
        let seq = OPTIMISTIC_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "{}{}-{}",
            OPTIMISTIC_ID_PREFIX,
            Utc::now().timestamp_millis(),
            seq
        ))
    }

    /// Whether this id is a local placeholder awaiting confirmation.
    pub fn is_optimistic(&self) -> bool {
        self.0.starts_with(OPTIMISTIC_ID_PREFIX)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Presence connection key
// ---------------------------------------------------------------------------

/// Key under which one connection registers in a stream's presence room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConnectionKey(pub String);

impl ConnectionKey {
    /// Key derived from an authenticated identity.
    pub fn for_user(user: &UserId) -> Self {
        Self(format!("user:{}", user.0))
    }

    /// Random key for an anonymous viewer, unique per page load.
    pub fn anonymous() -> Self {
        let raw: [u8; 8] = rand::random();
        Self(format!("anon:{}", hex::encode(raw)))
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
