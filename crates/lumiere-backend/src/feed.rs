//! Typed change-feed client with a tokio mpsc command/event pattern.
//!
//! A [`FeedSubscription`] is one stream room: the subscriber receives
//! insert and presence events on a typed channel and steers its own
//! presence registration through typed commands.  The transport behind the
//! [`ChangeFeed`] trait is the hosted pub/sub service; [`LocalFeed`] is the
//! in-process implementation used by tests and local development shells.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use lumiere_shared::{ChatMessage, ConnectionKey, StreamId, Tip};

// ---------------------------------------------------------------------------
// Command / event types
// ---------------------------------------------------------------------------

/// Commands sent *into* a feed subscription.
#[derive(Debug)]
pub enum FeedCommand {
    /// Register the caller's presence under the given connection key.
    Track(ConnectionKey),
    /// Remove the caller's presence registration.
    Untrack,
    /// Tear the subscription down.
    Close,
}

/// Events delivered *from* the feed for one subscribed stream.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A new authoritative chat message row was inserted.
    MessageInserted(ChatMessage),
    /// A new tip row was inserted (delivered only to owner subscriptions).
    TipInserted(Tip),
    /// Full replacement of the room's member set.
    PresenceSync {
        members: HashMap<ConnectionKey, DateTime<Utc>>,
    },
    /// A connection joined the room.  Diagnostics only; the authoritative
    /// member set always comes from the next sync.
    PresenceJoin { key: ConnectionKey },
    /// A connection left the room.  Diagnostics only.
    PresenceLeave { key: ConnectionKey },
}

/// Per-subscription options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Deliver tip inserts.  Only the stream's owner may ask for these.
    pub tips: bool,
}

/// A live subscription to one stream room.
pub struct FeedSubscription {
    /// Typed events for this room, in delivery order.
    pub events: mpsc::Receiver<FeedEvent>,
    cmd_tx: mpsc::Sender<FeedCommand>,
}

impl FeedSubscription {
    pub fn new(events: mpsc::Receiver<FeedEvent>, cmd_tx: mpsc::Sender<FeedCommand>) -> Self {
        Self { events, cmd_tx }
    }

    /// Register the caller's own presence in the room.
    pub async fn track(&self, key: ConnectionKey) {
        let _ = self.cmd_tx.send(FeedCommand::Track(key)).await;
    }

    /// Remove the caller's presence registration.
    pub async fn untrack(&self) {
        let _ = self.cmd_tx.send(FeedCommand::Untrack).await;
    }

    /// Tear the subscription down.  The event channel closes afterwards.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(FeedCommand::Close).await;
    }

    /// A clonable handle to the command side, for teardown after the event
    /// receiver has been moved into a task.
    pub fn commands(&self) -> mpsc::Sender<FeedCommand> {
        self.cmd_tx.clone()
    }
}

/// Subscribe capability: insert and presence events for one stream room.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(
        &self,
        stream: StreamId,
        opts: SubscribeOptions,
    ) -> anyhow::Result<FeedSubscription>;
}

// ---------------------------------------------------------------------------
// In-process feed hub
// ---------------------------------------------------------------------------

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<FeedEvent>,
    tips: bool,
    tracked: Option<ConnectionKey>,
}

#[derive(Default)]
struct Room {
    members: HashMap<ConnectionKey, DateTime<Utc>>,
    subscribers: Vec<Subscriber>,
}

/// In-process feed hub.  Each subscription gets its own command task;
/// room state lives behind a single async mutex, and events are fanned out
/// per stream in insertion order.
pub struct LocalFeed {
    rooms: Arc<Mutex<HashMap<StreamId, Room>>>,
    next_sub_id: AtomicU64,
}

impl LocalFeed {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
            next_sub_id: AtomicU64::new(0),
        }
    }

    /// Publish an authoritative message insert to every subscriber of the
    /// stream's room.
    pub async fn publish_message(&self, message: ChatMessage) {
        let stream = message.stream_id;
        let targets = {
            let rooms = self.rooms.lock().await;
            match rooms.get(&stream) {
                Some(room) => room.subscribers.iter().map(|s| s.tx.clone()).collect(),
                None => Vec::new(),
            }
        };
        debug!(stream = %stream, id = %message.id, "publishing message insert");
        fan_out(targets, FeedEvent::MessageInserted(message)).await;
    }

    /// Publish a tip insert to owner subscriptions of the stream's room.
    pub async fn publish_tip(&self, tip: Tip) {
        let stream = tip.stream_id;
        let targets = {
            let rooms = self.rooms.lock().await;
            match rooms.get(&stream) {
                Some(room) => room
                    .subscribers
                    .iter()
                    .filter(|s| s.tips)
                    .map(|s| s.tx.clone())
                    .collect(),
                None => Vec::new(),
            }
        };
        debug!(stream = %stream, id = %tip.id, "publishing tip insert");
        fan_out(targets, FeedEvent::TipInserted(tip)).await;
    }
}

impl Default for LocalFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeed for LocalFeed {
    async fn subscribe(
        &self,
        stream: StreamId,
        opts: SubscribeOptions,
    ) -> anyhow::Result<FeedSubscription> {
        let (event_tx, event_rx) = mpsc::channel::<FeedEvent>(256);
        let (cmd_tx, cmd_rx) = mpsc::channel::<FeedCommand>(16);

        let sub_id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut rooms = self.rooms.lock().await;
            let room = rooms.entry(stream).or_default();
            room.subscribers.push(Subscriber {
                id: sub_id,
                tx: event_tx,
                tips: opts.tips,
                tracked: None,
            });
        }

        info!(room = %stream.to_room(), sub = sub_id, tips = opts.tips, "feed subscription opened");

        let rooms = self.rooms.clone();
        tokio::spawn(async move {
            run_subscription(rooms, stream, sub_id, cmd_rx).await;
        });

        Ok(FeedSubscription::new(event_rx, cmd_tx))
    }
}

/// Command loop for one subscription.  A closed command channel is treated
/// as `Close` so dropping the subscription cannot leak a phantom member.
async fn run_subscription(
    rooms: Arc<Mutex<HashMap<StreamId, Room>>>,
    stream: StreamId,
    sub_id: u64,
    mut cmd_rx: mpsc::Receiver<FeedCommand>,
) {
    loop {
        let cmd = cmd_rx.recv().await.unwrap_or(FeedCommand::Close);
        match cmd {
            FeedCommand::Track(key) => {
                let (targets, sync) = {
                    let mut rooms = rooms.lock().await;
                    let room = match rooms.get_mut(&stream) {
                        Some(r) => r,
                        None => continue,
                    };
                    // Re-tracking the same key is idempotent.
                    room.members.entry(key.clone()).or_insert_with(Utc::now);
                    if let Some(sub) = room.subscribers.iter_mut().find(|s| s.id == sub_id) {
                        sub.tracked = Some(key.clone());
                    }
                    (
                        room.subscribers.iter().map(|s| s.tx.clone()).collect::<Vec<_>>(),
                        room.members.clone(),
                    )
                };
                debug!(stream = %stream, key = %key, "presence track");
                fan_out(targets.clone(), FeedEvent::PresenceJoin { key }).await;
                fan_out(targets, FeedEvent::PresenceSync { members: sync }).await;
            }

            FeedCommand::Untrack => {
                if let Some(key) = detach_member(&rooms, stream, sub_id).await {
                    debug!(stream = %stream, key = %key, "presence untrack");
                }
            }

            FeedCommand::Close => {
                if let Some(key) = detach_member(&rooms, stream, sub_id).await {
                    debug!(stream = %stream, key = %key, "presence untrack on close");
                }
                let mut rooms = rooms.lock().await;
                if let Some(room) = rooms.get_mut(&stream) {
                    room.subscribers.retain(|s| s.id != sub_id);
                    if room.subscribers.is_empty() && room.members.is_empty() {
                        rooms.remove(&stream);
                    }
                }
                info!(stream = %stream, sub = sub_id, "feed subscription closed");
                break;
            }
        }
    }
}

/// Remove the subscription's tracked member, if any, then broadcast a
/// leave event followed by a full sync.
async fn detach_member(
    rooms: &Arc<Mutex<HashMap<StreamId, Room>>>,
    stream: StreamId,
    sub_id: u64,
) -> Option<ConnectionKey> {
    let (key, targets, sync) = {
        let mut rooms = rooms.lock().await;
        let room = rooms.get_mut(&stream)?;
        let sub = room.subscribers.iter_mut().find(|s| s.id == sub_id)?;
        let key = sub.tracked.take()?;
        room.members.remove(&key);
        (
            key,
            room.subscribers.iter().map(|s| s.tx.clone()).collect::<Vec<_>>(),
            room.members.clone(),
        )
    };
    fan_out(targets.clone(), FeedEvent::PresenceLeave { key: key.clone() }).await;
    fan_out(targets, FeedEvent::PresenceSync { members: sync }).await;
    Some(key)
}

async fn fan_out(targets: Vec<mpsc::Sender<FeedEvent>>, event: FeedEvent) {
    for tx in targets {
        if tx.send(event.clone()).await.is_err() {
            debug!("feed subscriber dropped, skipping delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumiere_shared::{MessageId, UserId};

    fn test_message(stream: StreamId, id: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId::new(id),
            stream_id: stream,
            sender: UserId::new("u1"),
            body: "hello".into(),
            created_at: Utc::now(),
            sender_profile: None,
        }
    }

    fn test_tip(stream: StreamId, id: &str) -> Tip {
        Tip {
            id: id.into(),
            stream_id: stream,
            sender: UserId::new("u2"),
            receiver: UserId::new("owner"),
            amount: 5.0,
            created_at: Utc::now(),
            sender_profile: None,
        }
    }

    #[tokio::test]
    async fn test_track_broadcasts_join_then_sync() {
        let feed = LocalFeed::new();
        let stream = StreamId::new();

        let mut a = feed.subscribe(stream, SubscribeOptions::default()).await.unwrap();
        let mut b = feed.subscribe(stream, SubscribeOptions::default()).await.unwrap();

        let key = ConnectionKey::anonymous();
        a.track(key.clone()).await;

        for sub in [&mut a, &mut b] {
            match sub.events.recv().await.unwrap() {
                FeedEvent::PresenceJoin { key: k } => assert_eq!(k, key),
                other => panic!("expected join, got {other:?}"),
            }
            match sub.events.recv().await.unwrap() {
                FeedEvent::PresenceSync { members } => {
                    assert_eq!(members.len(), 1);
                    assert!(members.contains_key(&key));
                }
                other => panic!("expected sync, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_untrack_broadcasts_leave_then_empty_sync() {
        let feed = LocalFeed::new();
        let stream = StreamId::new();

        let mut a = feed.subscribe(stream, SubscribeOptions::default()).await.unwrap();
        let key = ConnectionKey::for_user(&UserId::new("u1"));
        a.track(key.clone()).await;
        a.events.recv().await.unwrap(); // join
        a.events.recv().await.unwrap(); // sync

        a.untrack().await;
        match a.events.recv().await.unwrap() {
            FeedEvent::PresenceLeave { key: k } => assert_eq!(k, key),
            other => panic!("expected leave, got {other:?}"),
        }
        match a.events.recv().await.unwrap() {
            FeedEvent::PresenceSync { members } => assert!(members.is_empty()),
            other => panic!("expected sync, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_message_insert_reaches_all_subscribers() {
        let feed = LocalFeed::new();
        let stream = StreamId::new();

        let mut a = feed.subscribe(stream, SubscribeOptions::default()).await.unwrap();
        let mut b = feed.subscribe(stream, SubscribeOptions::default()).await.unwrap();

        feed.publish_message(test_message(stream, "m_1")).await;

        for sub in [&mut a, &mut b] {
            match sub.events.recv().await.unwrap() {
                FeedEvent::MessageInserted(m) => assert_eq!(m.id, MessageId::new("m_1")),
                other => panic!("expected message, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_tips_only_reach_owner_subscriptions() {
        let feed = LocalFeed::new();
        let stream = StreamId::new();

        let mut owner = feed
            .subscribe(stream, SubscribeOptions { tips: true })
            .await
            .unwrap();
        let mut viewer = feed.subscribe(stream, SubscribeOptions::default()).await.unwrap();

        feed.publish_tip(test_tip(stream, "t_1")).await;
        feed.publish_message(test_message(stream, "m_1")).await;

        match owner.events.recv().await.unwrap() {
            FeedEvent::TipInserted(t) => assert_eq!(t.id, "t_1"),
            other => panic!("expected tip, got {other:?}"),
        }
        // The viewer's first event is the message; the tip was never sent.
        match viewer.events.recv().await.unwrap() {
            FeedEvent::MessageInserted(m) => assert_eq!(m.id, MessageId::new("m_1")),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_removes_tracked_member() {
        let feed = LocalFeed::new();
        let stream = StreamId::new();

        let a = feed.subscribe(stream, SubscribeOptions::default()).await.unwrap();
        let mut b = feed.subscribe(stream, SubscribeOptions::default()).await.unwrap();

        let key = ConnectionKey::anonymous();
        a.track(key.clone()).await;
        b.events.recv().await.unwrap(); // join
        b.events.recv().await.unwrap(); // sync(1)

        a.close().await;
        match b.events.recv().await.unwrap() {
            FeedEvent::PresenceLeave { key: k } => assert_eq!(k, key),
            other => panic!("expected leave, got {other:?}"),
        }
        match b.events.recv().await.unwrap() {
            FeedEvent::PresenceSync { members } => assert!(members.is_empty()),
            other => panic!("expected sync, got {other:?}"),
        }
    }
}
