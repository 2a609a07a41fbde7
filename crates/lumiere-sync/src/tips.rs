//! Append-only tip ledger.
//!
//! Tips are created externally by payment events; there is no optimistic
//! path.  The ledger only deduplicates feed deliveries by id and keeps a
//! running total for the UI.

use std::collections::HashMap;

use lumiere_shared::{SenderProfile, StreamId, Tip, UserId};

#[derive(Debug, Default)]
pub struct TipLedger {
    streams: HashMap<StreamId, Vec<Tip>>,
}

impl TipLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a tip delivered by the change feed.  Returns `false` when the
    /// id is already present (duplicate delivery).
    pub fn apply_remote(&mut self, stream: StreamId, tip: Tip) -> bool {
        let entries = self.streams.entry(stream).or_default();
        if entries.iter().any(|t| t.id == tip.id) {
            return false;
        }
        entries.push(tip);
        true
    }

    /// Seed from backfilled history, deduplicating by id.
    pub fn seed(&mut self, stream: StreamId, tips: Vec<Tip>) {
        for tip in tips {
            self.apply_remote(stream, tip);
        }
    }

    /// Fill in the display profile on every tip from `sender` lacking one.
    pub fn patch_profile(&mut self, stream: StreamId, sender: &UserId, profile: &SenderProfile) {
        if let Some(entries) = self.streams.get_mut(&stream) {
            for tip in entries.iter_mut() {
                if &tip.sender == sender && tip.sender_profile.is_none() {
                    tip.sender_profile = Some(profile.clone());
                }
            }
        }
    }

    /// Tips for a stream, in arrival order.
    pub fn tips(&self, stream: StreamId) -> &[Tip] {
        self.streams.get(&stream).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Running total of tip amounts for a stream.
    pub fn total(&self, stream: StreamId) -> f64 {
        self.tips(stream).iter().map(|t| t.amount).sum()
    }
}
