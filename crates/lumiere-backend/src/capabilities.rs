//! Capability contracts consumed by the synchronization core.
//!
//! Each trait is one seam toward the hosted backend.  Implementations must
//! be cheap to clone behind an `Arc` and safe to call from spawned tasks.

use std::collections::HashMap;

use async_trait::async_trait;

use lumiere_shared::{
    ChatMessage, NewChatMessage, PersistenceError, SenderProfile, StatusError, StreamId, Tip,
    UserId,
};

// ---------------------------------------------------------------------------
// Status check result
// ---------------------------------------------------------------------------

/// Outcome of one status probe against the broadcast provider.
///
/// `Unknown` covers malformed payloads; callers must treat it as "not
/// active" (the watcher fails safe toward `waiting`, never toward `live`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCheckResult {
    /// A broadcast is active and playable at the given URL.
    Active { playback_url: String },
    /// The stream is configured but nothing is being broadcast.
    Inactive,
    /// The provider answered but the payload could not be interpreted.
    Unknown,
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Query and mutate capability for chat, tips, and the durable viewer
/// counter.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// The most recent `limit` messages for a stream, ascending by
    /// creation time.
    async fn recent_messages(
        &self,
        stream: StreamId,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, PersistenceError>;

    /// Persist a new message and return the authoritative record.
    async fn insert_message(&self, new: NewChatMessage) -> Result<ChatMessage, PersistenceError>;

    /// The most recent `limit` tips for a stream, ascending by creation
    /// time.  Only the stream's owner is authorized to call this.
    async fn recent_tips(&self, stream: StreamId, limit: u32) -> Result<Vec<Tip>, PersistenceError>;

    /// Fire-and-forget write of the observed viewer count.
    async fn persist_viewer_count(
        &self,
        stream: StreamId,
        count: u64,
    ) -> Result<(), PersistenceError>;
}

/// Status-check capability: is a broadcast currently active for a playback
/// identifier?
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn check(&self, playback_id: &str) -> Result<StatusCheckResult, StatusError>;
}

/// Identity-resolution capability: display info for a batch of senders.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    /// Resolve display profiles for the given ids.  Partial results are
    /// allowed; unknown ids are simply absent from the returned map.
    async fn resolve(&self, ids: &[UserId]) -> HashMap<UserId, SenderProfile>;
}
