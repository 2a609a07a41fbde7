//! Domain model structs exchanged with the backend capabilities.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a UI layer or logged as structured JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MessageId, StreamId, UserId};

// ---------------------------------------------------------------------------
// Sender profile
// ---------------------------------------------------------------------------

/// Minimal denormalized display info for a sender, resolved asynchronously
/// through the identity-resolution capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SenderProfile {
    /// Human-readable display name, if the user has set one.
    pub display_name: Option<String>,
    /// Avatar image URL.
    pub avatar_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Chat message
// ---------------------------------------------------------------------------

/// A single chat utterance on a stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned id, or a local placeholder while in flight.
    pub id: MessageId,
    /// The stream this message belongs to.
    pub stream_id: StreamId,
    /// Identity of the sender.
    pub sender: UserId,
    /// Trimmed message body (1–500 UTF-16 code units).
    pub body: String,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
    /// Resolved display info for the sender; `None` until resolved.
    pub sender_profile: Option<SenderProfile>,
}

/// Payload for persisting a new chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewChatMessage {
    pub stream_id: StreamId,
    pub sender: UserId,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Tip
// ---------------------------------------------------------------------------

/// One value-transfer event associated with a stream.  Tips are created
/// externally by payment events and only ever consumed here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tip {
    /// Server-assigned id.
    pub id: String,
    /// The stream the tip was sent on.
    pub stream_id: StreamId,
    /// Identity of the tipper.
    pub sender: UserId,
    /// The stream owner receiving the tip.
    pub receiver: UserId,
    /// Tip amount in platform currency units (non-negative).
    pub amount: f64,
    /// When the tip was recorded.
    pub created_at: DateTime<Utc>,
    /// Resolved display info for the tipper; `None` until resolved.
    pub sender_profile: Option<SenderProfile>,
}

// ---------------------------------------------------------------------------
// Stream record
// ---------------------------------------------------------------------------

/// The persisted record for one stream, as returned by the query capability.
/// This is the authoritative local input to the liveness state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    /// Unique stream identifier.
    pub id: StreamId,
    /// Identity of the stream's owner (tip receiver).
    pub owner: UserId,
    /// Display title.
    pub title: String,
    /// Playback identifier at the broadcast provider, if configured.
    pub playback_id: Option<String>,
    /// Known playback URL, if the broadcast has been seen live already.
    pub playback_url: Option<String>,
    /// Persisted "is this live" flag.
    pub is_live: bool,
    /// Set when the stream was explicitly terminated.
    pub ended_at: Option<DateTime<Utc>>,
}
