//! In-process backend implementing every chat capability.
//!
//! Used by tests and local development shells.  Message inserts are
//! assigned server-style ids (`m_<n>`) and published to the attached
//! [`LocalFeed`], so a session exercising this backend sees the same
//! mutate-result-plus-feed-event double delivery the hosted service
//! produces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use lumiere_shared::{
    ChatMessage, MessageId, NewChatMessage, PersistenceError, SenderProfile, StreamId, Tip, UserId,
};

use crate::capabilities::{ChatBackend, ProfileResolver};
use crate::feed::LocalFeed;

pub struct MemoryBackend {
    feed: Arc<LocalFeed>,
    messages: RwLock<HashMap<StreamId, Vec<ChatMessage>>>,
    tips: RwLock<HashMap<StreamId, Vec<Tip>>>,
    profiles: RwLock<HashMap<UserId, SenderProfile>>,
    viewer_counts: RwLock<HashMap<StreamId, u64>>,
    next_message: AtomicU64,
    next_tip: AtomicU64,
    /// When set, the next insert fails.  Test hook for rollback paths.
    fail_next_insert: AtomicBool,
}

impl MemoryBackend {
    pub fn new(feed: Arc<LocalFeed>) -> Self {
        Self {
            feed,
            messages: RwLock::new(HashMap::new()),
            tips: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            viewer_counts: RwLock::new(HashMap::new()),
            next_message: AtomicU64::new(1),
            next_tip: AtomicU64::new(1),
            fail_next_insert: AtomicBool::new(false),
        }
    }

    /// Register a display profile for a user.
    pub async fn put_profile(&self, user: UserId, profile: SenderProfile) {
        self.profiles.write().await.insert(user, profile);
    }

    /// Record a tip (simulating an external payment event) and publish it
    /// to owner subscriptions on the feed.
    pub async fn add_tip(&self, stream: StreamId, sender: UserId, receiver: UserId, amount: f64) -> Tip {
        let tip = Tip {
            id: format!("t_{}", self.next_tip.fetch_add(1, Ordering::Relaxed)),
            stream_id: stream,
            sender,
            receiver,
            amount,
            created_at: Utc::now(),
            sender_profile: None,
        };
        self.tips
            .write()
            .await
            .entry(stream)
            .or_default()
            .push(tip.clone());
        info!(stream = %stream, id = %tip.id, amount, "tip recorded");
        self.feed.publish_tip(tip.clone()).await;
        tip
    }

    /// Last persisted viewer count for a stream.
    pub async fn viewer_count(&self, stream: StreamId) -> u64 {
        self.viewer_counts
            .read()
            .await
            .get(&stream)
            .copied()
            .unwrap_or(0)
    }

    /// Make the next `insert_message` call fail with a backend error.
    pub fn fail_next_insert(&self) {
        self.fail_next_insert.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn recent_messages(
        &self,
        stream: StreamId,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, PersistenceError> {
        let messages = self.messages.read().await;
        let all = messages.get(&stream).map(Vec::as_slice).unwrap_or(&[]);
        let skip = all.len().saturating_sub(limit as usize);
        Ok(all[skip..].to_vec())
    }

    async fn insert_message(&self, new: NewChatMessage) -> Result<ChatMessage, PersistenceError> {
        if self.fail_next_insert.swap(false, Ordering::Relaxed) {
            return Err(PersistenceError::Backend("simulated failure".into()));
        }

        let message = ChatMessage {
            id: MessageId::new(format!(
                "m_{}",
                self.next_message.fetch_add(1, Ordering::Relaxed)
            )),
            stream_id: new.stream_id,
            sender: new.sender,
            body: new.body,
            created_at: Utc::now(),
            sender_profile: None,
        };

        self.messages
            .write()
            .await
            .entry(new.stream_id)
            .or_default()
            .push(message.clone());

        debug!(stream = %new.stream_id, id = %message.id, "message persisted");
        self.feed.publish_message(message.clone()).await;
        Ok(message)
    }

    async fn recent_tips(&self, stream: StreamId, limit: u32) -> Result<Vec<Tip>, PersistenceError> {
        let tips = self.tips.read().await;
        let all = tips.get(&stream).map(Vec::as_slice).unwrap_or(&[]);
        let skip = all.len().saturating_sub(limit as usize);
        Ok(all[skip..].to_vec())
    }

    async fn persist_viewer_count(
        &self,
        stream: StreamId,
        count: u64,
    ) -> Result<(), PersistenceError> {
        self.viewer_counts.write().await.insert(stream, count);
        debug!(stream = %stream, count, "viewer count persisted");
        Ok(())
    }
}

#[async_trait]
impl ProfileResolver for MemoryBackend {
    async fn resolve(&self, ids: &[UserId]) -> HashMap<UserId, SenderProfile> {
        let profiles = self.profiles.read().await;
        ids.iter()
            .filter_map(|id| profiles.get(id).map(|p| (id.clone(), p.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        MemoryBackend::new(Arc::new(LocalFeed::new()))
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_server_ids() {
        let backend = backend();
        let stream = StreamId::new();

        let first = backend
            .insert_message(NewChatMessage {
                stream_id: stream,
                sender: UserId::new("u1"),
                body: "one".into(),
            })
            .await
            .unwrap();
        let second = backend
            .insert_message(NewChatMessage {
                stream_id: stream,
                sender: UserId::new("u1"),
                body: "two".into(),
            })
            .await
            .unwrap();

        assert_eq!(first.id, MessageId::new("m_1"));
        assert_eq!(second.id, MessageId::new("m_2"));
        assert!(!first.id.is_optimistic());
    }

    #[tokio::test]
    async fn test_recent_messages_returns_last_n_ascending() {
        let backend = backend();
        let stream = StreamId::new();

        for body in ["a", "b", "c"] {
            backend
                .insert_message(NewChatMessage {
                    stream_id: stream,
                    sender: UserId::new("u1"),
                    body: body.into(),
                })
                .await
                .unwrap();
        }

        let recent = backend.recent_messages(stream, 2).await.unwrap();
        let bodies: Vec<&str> = recent.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_resolver_tolerates_partial_results() {
        let backend = backend();
        let known = UserId::new("known");
        backend
            .put_profile(
                known.clone(),
                SenderProfile {
                    display_name: Some("Known".into()),
                    avatar_url: None,
                },
            )
            .await;

        let resolved = backend.resolve(&[known.clone(), UserId::new("missing")]).await;
        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains_key(&known));
    }
}
