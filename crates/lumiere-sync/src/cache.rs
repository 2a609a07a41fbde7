//! Reconciling chat cache.
//!
//! Presents one ordered message sequence per stream that reflects both the
//! viewer's in-flight submissions and the authoritative change feed,
//! without duplicates or reordering.  Ordering is insertion order, not
//! timestamp order: optimistic entries must appear immediately, before any
//! server-assigned ordering exists.

use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;

use lumiere_shared::constants::MAX_MESSAGE_LEN;
use lumiere_shared::{ChatMessage, MessageId, SenderProfile, StreamId, UserId, ValidationError};

/// Outcome of applying one authoritative feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    /// A matching placeholder was upgraded in place to the authoritative
    /// id; no new row was added.
    UpgradedPlaceholder,
    /// The entry was new and appended.
    Appended,
    /// The id was already present; duplicate delivery ignored.
    Duplicate,
}

/// In-memory keyed store of ordered chat sequences.
#[derive(Debug, Default)]
pub struct ChatCache {
    streams: HashMap<StreamId, Vec<ChatMessage>>,
}

impl ChatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a submission and append its optimistic placeholder.
    ///
    /// Returns the placeholder id to later [`confirm`](Self::confirm) or
    /// [`discard`](Self::discard).  On a validation error nothing is
    /// mutated.
    pub fn stage(
        &mut self,
        stream: StreamId,
        sender: UserId,
        body: &str,
        sender_profile: Option<SenderProfile>,
    ) -> Result<MessageId, ValidationError> {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyBody);
        }
        let len = trimmed.encode_utf16().count();
        if len > MAX_MESSAGE_LEN {
            return Err(ValidationError::too_long(len));
        }

        let id = MessageId::optimistic();
        self.streams.entry(stream).or_default().push(ChatMessage {
            id: id.clone(),
            stream_id: stream,
            sender,
            body: trimmed.to_string(),
            created_at: Utc::now(),
            sender_profile,
        });
        Ok(id)
    }

    /// Replace a placeholder with the authoritative record, in place.
    ///
    /// The entry's position is unchanged, and an already resolved sender
    /// profile survives an authoritative payload that lacks one.  If the
    /// placeholder was meanwhile upgraded by a feed event this is a no-op.
    pub fn confirm(&mut self, stream: StreamId, placeholder: &MessageId, record: ChatMessage) {
        let entries = self.streams.entry(stream).or_default();
        if let Some(entry) = entries.iter_mut().find(|e| &e.id == placeholder) {
            let kept_profile = entry.sender_profile.take();
            *entry = record;
            if entry.sender_profile.is_none() {
                entry.sender_profile = kept_profile;
            }
        } else {
            debug!(stream = %stream, id = %record.id, "placeholder already reconciled");
        }
    }

    /// Remove a failed placeholder entry.  Only the specific entry is
    /// removed; concurrent entries are untouched.
    pub fn discard(&mut self, stream: StreamId, placeholder: &MessageId) -> bool {
        let entries = self.streams.entry(stream).or_default();
        let before = entries.len();
        entries.retain(|e| &e.id != placeholder);
        before != entries.len()
    }

    /// Apply an authoritative insert delivered by the change feed.
    ///
    /// A placeholder from the same sender with the same body is upgraded in
    /// place (the submission's confirmation raced the feed); an already
    /// present id is ignored; anything else is appended.
    pub fn apply_remote(&mut self, stream: StreamId, record: ChatMessage) -> RemoteApply {
        let entries = self.streams.entry(stream).or_default();

        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.id.is_optimistic() && e.sender == record.sender && e.body == record.body)
        {
            debug!(stream = %stream, id = %record.id, "upgrading placeholder from feed event");
            entry.id = record.id;
            entry.created_at = record.created_at;
            if entry.sender_profile.is_none() {
                entry.sender_profile = record.sender_profile;
            }
            return RemoteApply::UpgradedPlaceholder;
        }

        if entries.iter().any(|e| e.id == record.id) {
            return RemoteApply::Duplicate;
        }

        entries.push(record);
        RemoteApply::Appended
    }

    /// Seed a stream's sequence from backfilled history, deduplicating by
    /// id against anything already cached.
    pub fn seed(&mut self, stream: StreamId, records: Vec<ChatMessage>) {
        let entries = self.streams.entry(stream).or_default();
        for record in records {
            if !entries.iter().any(|e| e.id == record.id) {
                entries.push(record);
            }
        }
    }

    /// Fill in the display profile on every entry from `sender` that does
    /// not have one yet.
    pub fn patch_profile(&mut self, stream: StreamId, sender: &UserId, profile: &SenderProfile) {
        if let Some(entries) = self.streams.get_mut(&stream) {
            for entry in entries.iter_mut() {
                if &entry.sender == sender && entry.sender_profile.is_none() {
                    entry.sender_profile = Some(profile.clone());
                }
            }
        }
    }

    /// Current ordered sequence for a stream.
    pub fn messages(&self, stream: StreamId) -> &[ChatMessage] {
        self.streams.get(&stream).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self, stream: StreamId) -> usize {
        self.streams.get(&stream).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, stream: StreamId) -> bool {
        self.len(stream) == 0
    }
}
