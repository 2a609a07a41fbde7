//! Per-stream coordinating session.
//!
//! A [`StreamSession`] owns the reconciling caches for one stream view,
//! bridges the change feed into them, runs the liveness watcher and the
//! viewer-count persister, and emits [`SessionEvent`]s toward the UI
//! layer.  Teardown is explicit: [`StreamSession::close`] untracks
//! presence, cancels the poll timer, and waits for the loops to finish.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lumiere_backend::{
    ChangeFeed, ChatBackend, FeedCommand, FeedEvent, ProfileResolver, StatusProbe,
    SubscribeOptions,
};
use lumiere_shared::{
    ChatMessage, ConnectionKey, NewChatMessage, PersistenceError, SenderProfile, StreamId,
    StreamRecord, SyncError, Tip, UserId,
};
use lumiere_sync::{
    spawn_watcher, ChatCache, LivenessState, PresenceTracker, RemoteApply, TipLedger,
    WatcherHandle,
};

use crate::config::SessionConfig;
use crate::events::{emit, SessionEvent};

// ---------------------------------------------------------------------------
// Viewer identity
// ---------------------------------------------------------------------------

/// Who is looking at the stream.
#[derive(Debug, Clone)]
pub struct ViewerIdentity {
    /// Authenticated identity, if any.  Anonymous viewers can watch and
    /// count toward presence but cannot chat.
    pub user_id: Option<UserId>,
    /// The viewer's own display profile, attached to optimistic entries
    /// so they render correctly before any resolution round-trip.
    pub profile: Option<SenderProfile>,
}

impl ViewerIdentity {
    pub fn authenticated(user_id: UserId, profile: Option<SenderProfile>) -> Self {
        Self {
            user_id: Some(user_id),
            profile,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            profile: None,
        }
    }

    /// Presence key for this viewer: identity-derived when authenticated,
    /// otherwise random and unique per page load.
    pub fn connection_key(&self) -> ConnectionKey {
        match &self.user_id {
            Some(user) => ConnectionKey::for_user(user),
            None => ConnectionKey::anonymous(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One open stream view.
pub struct StreamSession {
    record: StreamRecord,
    viewer: ViewerIdentity,
    key: ConnectionKey,
    backend: Arc<dyn ChatBackend>,
    chat: Arc<Mutex<ChatCache>>,
    tips: Arc<Mutex<TipLedger>>,
    presence: Arc<Mutex<PresenceTracker>>,
    watcher: WatcherHandle,
    feed_cmds: mpsc::Sender<FeedCommand>,
    events_tx: mpsc::Sender<SessionEvent>,
    persist_shutdown: watch::Sender<bool>,
    loop_task: JoinHandle<()>,
    persist_task: JoinHandle<()>,
}

impl StreamSession {
    /// Open a session: backfill history, join the stream room, start the
    /// liveness watcher and the viewer-count persister.
    ///
    /// Returns the session plus the receiver for its UI-facing events.
    pub async fn open(
        backend: Arc<dyn ChatBackend>,
        resolver: Arc<dyn ProfileResolver>,
        feed: Arc<dyn ChangeFeed>,
        probe: Arc<dyn StatusProbe>,
        record: StreamRecord,
        viewer: ViewerIdentity,
        config: SessionConfig,
    ) -> anyhow::Result<(Self, mpsc::Receiver<SessionEvent>)> {
        let stream = record.id;
        let is_owner = viewer.user_id.as_ref() == Some(&record.owner);

        // History backfill before any live event is applied.
        let mut chat_cache = ChatCache::new();
        let history = backend
            .recent_messages(stream, config.history_limit)
            .await
            .map_err(|e| anyhow::anyhow!("history backfill failed: {e}"))?;
        info!(stream = %stream, count = history.len(), "backfilled chat history");
        chat_cache.seed(stream, history);

        // Tips are only fetched when the viewer owns the stream.
        let mut tip_ledger = TipLedger::new();
        if is_owner {
            let tips = backend
                .recent_tips(stream, config.history_limit)
                .await
                .map_err(|e| anyhow::anyhow!("tip backfill failed: {e}"))?;
            tip_ledger.seed(stream, tips);
        }

        // Resolve backfilled sender profiles in one batch.
        let mut profile_memo: HashMap<UserId, SenderProfile> = HashMap::new();
        let unresolved: Vec<UserId> = chat_cache
            .messages(stream)
            .iter()
            .filter(|m| m.sender_profile.is_none())
            .map(|m| m.sender.clone())
            .chain(
                tip_ledger
                    .tips(stream)
                    .iter()
                    .filter(|t| t.sender_profile.is_none())
                    .map(|t| t.sender.clone()),
            )
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if !unresolved.is_empty() {
            let resolved = resolver.resolve(&unresolved).await;
            debug!(
                stream = %stream,
                requested = unresolved.len(),
                resolved = resolved.len(),
                "backfill profile resolution"
            );
            for (user, profile) in &resolved {
                chat_cache.patch_profile(stream, user, profile);
                tip_ledger.patch_profile(stream, user, profile);
            }
            profile_memo.extend(resolved);
        }

        // Subscribe and register our own presence.
        let sub = feed
            .subscribe(stream, SubscribeOptions { tips: is_owner })
            .await?;
        let key = viewer.connection_key();
        sub.track(key.clone()).await;
        info!(stream = %stream, key = %key, owner = is_owner, "joined stream room");

        let watcher = spawn_watcher(&record, probe, config.watcher());

        let chat = Arc::new(Mutex::new(chat_cache));
        let tips = Arc::new(Mutex::new(tip_ledger));
        let presence = Arc::new(Mutex::new(PresenceTracker::new()));
        let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(256);

        let feed_cmds = sub.commands();
        let feed_events = sub.events;

        let loop_task = tokio::spawn(event_loop(
            stream,
            feed_events,
            chat.clone(),
            tips.clone(),
            presence.clone(),
            resolver,
            watcher.subscribe(),
            watcher.exhausted(),
            events_tx.clone(),
            profile_memo,
        ));

        let (persist_shutdown, persist_shutdown_rx) = watch::channel(false);
        let persist_task = tokio::spawn(persist_loop(
            stream,
            backend.clone(),
            presence.clone(),
            config.persist_interval,
            persist_shutdown_rx,
        ));

        Ok((
            Self {
                record,
                viewer,
                key,
                backend,
                chat,
                tips,
                presence,
                watcher,
                feed_cmds,
                events_tx,
                persist_shutdown,
                loop_task,
                persist_task,
            },
            events_rx,
        ))
    }

    /// Submit a chat message.
    ///
    /// The optimistic entry is visible before the persistence call runs;
    /// on failure it is rolled back and the error is returned once, to the
    /// caller.  No automatic retry.
    pub async fn send_message(&self, body: &str) -> Result<ChatMessage, SyncError> {
        let sender = self
            .viewer
            .user_id
            .clone()
            .ok_or(SyncError::Persistence(PersistenceError::PermissionDenied))?;

        let placeholder = self.chat.lock().unwrap().stage(
            self.record.id,
            sender.clone(),
            body,
            self.viewer.profile.clone(),
        )?;
        emit(
            &self.events_tx,
            SessionEvent::MessagesChanged {
                stream_id: self.record.id,
            },
        );
        debug!(stream = %self.record.id, id = %placeholder, "optimistic message staged");

        let new = NewChatMessage {
            stream_id: self.record.id,
            sender,
            body: body.trim().to_string(),
        };
        match self.backend.insert_message(new).await {
            Ok(record) => {
                self.chat
                    .lock()
                    .unwrap()
                    .confirm(self.record.id, &placeholder, record.clone());
                emit(
                    &self.events_tx,
                    SessionEvent::MessagesChanged {
                        stream_id: self.record.id,
                    },
                );
                Ok(record)
            }
            Err(e) => {
                self.chat.lock().unwrap().discard(self.record.id, &placeholder);
                emit(
                    &self.events_tx,
                    SessionEvent::MessagesChanged {
                        stream_id: self.record.id,
                    },
                );
                warn!(stream = %self.record.id, error = %e, "message send failed, rolled back");
                Err(e.into())
            }
        }
    }

    /// Owner action: mark the stream ended.  The liveness watcher treats
    /// this as absorbing; any racing `live` poll result is discarded.
    pub fn mark_ended(&self) {
        self.watcher.mark_ended();
    }

    pub fn stream_id(&self) -> StreamId {
        self.record.id
    }

    pub fn is_owner(&self) -> bool {
        self.viewer.user_id.as_ref() == Some(&self.record.owner)
    }

    /// Presence key this session is tracked under.
    pub fn connection_key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Current ordered message sequence.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.chat.lock().unwrap().messages(self.record.id).to_vec()
    }

    /// Tips received so far (owner sessions only; always empty otherwise).
    pub fn tips(&self) -> Vec<Tip> {
        self.tips.lock().unwrap().tips(self.record.id).to_vec()
    }

    pub fn tip_total(&self) -> f64 {
        self.tips.lock().unwrap().total(self.record.id)
    }

    /// Viewer count as of the last presence sync.
    pub fn viewer_count(&self) -> usize {
        self.presence.lock().unwrap().count(self.record.id)
    }

    pub fn liveness(&self) -> LivenessState {
        self.watcher.state()
    }

    pub fn liveness_updates(&self) -> watch::Receiver<LivenessState> {
        self.watcher.subscribe()
    }

    /// Tear the session down: untrack presence, close the feed
    /// subscription, cancel the poll timer and the persister, and wait for
    /// the loops to wind down.  In-flight async results resolve into
    /// no-ops.
    pub async fn close(self) {
        info!(stream = %self.record.id, key = %self.key, "closing stream session");
        let _ = self.feed_cmds.send(FeedCommand::Untrack).await;
        let _ = self.feed_cmds.send(FeedCommand::Close).await;
        self.watcher.stop();
        let _ = self.persist_shutdown.send(true);
        let _ = self.loop_task.await;
        let _ = self.persist_task.await;
        self.presence.lock().unwrap().clear(self.record.id);
    }
}

// ---------------------------------------------------------------------------
// Background loops
// ---------------------------------------------------------------------------

/// Main loop: apply feed events to the caches and forward changes to the
/// UI layer.  Ends when the feed subscription closes.
#[allow(clippy::too_many_arguments)]
async fn event_loop(
    stream: StreamId,
    mut feed_events: mpsc::Receiver<FeedEvent>,
    chat: Arc<Mutex<ChatCache>>,
    tips: Arc<Mutex<TipLedger>>,
    presence: Arc<Mutex<PresenceTracker>>,
    resolver: Arc<dyn ProfileResolver>,
    mut liveness_rx: watch::Receiver<LivenessState>,
    mut exhausted_rx: watch::Receiver<bool>,
    events_tx: mpsc::Sender<SessionEvent>,
    mut profile_memo: HashMap<UserId, SenderProfile>,
) {
    info!(stream = %stream, "session event loop started");

    let mut liveness_open = true;
    let mut exhausted_open = true;

    loop {
        tokio::select! {
            event = feed_events.recv() => {
                let Some(event) = event else { break };
                handle_feed_event(
                    stream,
                    event,
                    &chat,
                    &tips,
                    &presence,
                    resolver.as_ref(),
                    &events_tx,
                    &mut profile_memo,
                )
                .await;
            }

            res = liveness_rx.changed(), if liveness_open => {
                match res {
                    Ok(()) => {
                        let state = liveness_rx.borrow_and_update().clone();
                        emit(&events_tx, SessionEvent::LivenessChanged { stream_id: stream, state });
                    }
                    Err(_) => liveness_open = false,
                }
            }

            res = exhausted_rx.changed(), if exhausted_open => {
                match res {
                    Ok(()) => {
                        if *exhausted_rx.borrow_and_update() {
                            warn!(stream = %stream, "liveness polling gave up");
                            emit(&events_tx, SessionEvent::PollExhausted { stream_id: stream });
                            exhausted_open = false;
                        }
                    }
                    Err(_) => exhausted_open = false,
                }
            }
        }
    }

    debug!(stream = %stream, "session event loop ended");
}

#[allow(clippy::too_many_arguments)]
async fn handle_feed_event(
    stream: StreamId,
    event: FeedEvent,
    chat: &Arc<Mutex<ChatCache>>,
    tips: &Arc<Mutex<TipLedger>>,
    presence: &Arc<Mutex<PresenceTracker>>,
    resolver: &dyn ProfileResolver,
    events_tx: &mpsc::Sender<SessionEvent>,
    profile_memo: &mut HashMap<UserId, SenderProfile>,
) {
    match event {
        FeedEvent::MessageInserted(message) => {
            let sender = message.sender.clone();
            let needs_profile = message.sender_profile.is_none();
            let outcome = chat.lock().unwrap().apply_remote(stream, message);
            match outcome {
                RemoteApply::Duplicate => {
                    debug!(stream = %stream, "duplicate message delivery ignored");
                }
                RemoteApply::UpgradedPlaceholder | RemoteApply::Appended => {
                    emit(events_tx, SessionEvent::MessagesChanged { stream_id: stream });
                    if needs_profile
                        && resolve_profile(stream, &sender, chat, tips, resolver, profile_memo)
                            .await
                    {
                        emit(events_tx, SessionEvent::MessagesChanged { stream_id: stream });
                    }
                }
            }
        }

        FeedEvent::TipInserted(tip) => {
            let sender = tip.sender.clone();
            let fresh = tips.lock().unwrap().apply_remote(stream, tip.clone());
            if !fresh {
                debug!(stream = %stream, id = %tip.id, "duplicate tip delivery ignored");
                return;
            }
            info!(stream = %stream, id = %tip.id, amount = tip.amount, "tip received");
            resolve_profile(stream, &sender, chat, tips, resolver, profile_memo).await;
            emit(events_tx, SessionEvent::TipReceived { stream_id: stream, tip });
        }

        FeedEvent::PresenceSync { members } => {
            let count = presence.lock().unwrap().on_sync(stream, members);
            emit(
                events_tx,
                SessionEvent::ViewerCountChanged { stream_id: stream, count },
            );
        }

        FeedEvent::PresenceJoin { key } => {
            presence.lock().unwrap().on_join(stream, &key);
        }

        FeedEvent::PresenceLeave { key } => {
            presence.lock().unwrap().on_leave(stream, &key);
        }
    }
}

/// Resolve one sender's profile (memoized) and patch both caches.
/// Returns whether a profile was applied.
async fn resolve_profile(
    stream: StreamId,
    sender: &UserId,
    chat: &Arc<Mutex<ChatCache>>,
    tips: &Arc<Mutex<TipLedger>>,
    resolver: &dyn ProfileResolver,
    profile_memo: &mut HashMap<UserId, SenderProfile>,
) -> bool {
    let profile = match profile_memo.get(sender) {
        Some(profile) => profile.clone(),
        None => {
            let resolved = resolver.resolve(std::slice::from_ref(sender)).await;
            match resolved.get(sender) {
                Some(profile) => {
                    profile_memo.insert(sender.clone(), profile.clone());
                    profile.clone()
                }
                None => {
                    debug!(stream = %stream, sender = %sender, "sender profile unresolved");
                    return false;
                }
            }
        }
    };
    chat.lock().unwrap().patch_profile(stream, sender, &profile);
    tips.lock().unwrap().patch_profile(stream, sender, &profile);
    true
}

/// Periodically persist the presence-derived viewer count.  Writes are
/// fire-and-forget: failures are logged, never retried, and never block
/// the UI-visible count.
async fn persist_loop(
    stream: StreamId,
    backend: Arc<dyn ChatBackend>,
    presence: Arc<Mutex<PresenceTracker>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut last_written: Option<usize> = None;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!(stream = %stream, "viewer-count persister stopped");
                break;
            }
            _ = ticker.tick() => {}
        }

        let count = presence.lock().unwrap().count(stream);
        if last_written == Some(count) {
            continue;
        }
        last_written = Some(count);

        if let Err(e) = backend.persist_viewer_count(stream, count as u64).await {
            warn!(stream = %stream, error = %e, "Failed to persist viewer count");
        }
    }
}
