//! Stream liveness state machine.
//!
//! Determines whether a broadcast is actually active by combining the
//! persisted stream record with polling of the status-check capability.
//! `ended` is absorbing: once a stream is marked ended, no poll result may
//! resurrect it.  Polling runs in a background task with deterministic
//! teardown; results arriving after teardown are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use lumiere_backend::{StatusCheckResult, StatusProbe};
use lumiere_shared::constants::{
    DEFAULT_POLL_INTERVAL_SECS, MAX_POLL_FAILURES, PLAYBACK_BASE_URL, POLL_BACKOFF_MAX_SECS,
};
use lumiere_shared::{StreamId, StreamRecord};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Liveness for one stream.
///
/// Transitions: `idle → waiting → live`, `waiting → ended`, `live → ended`.
/// `ended` has no outgoing transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum LivenessState {
    /// No broadcast configured.
    Idle,
    /// Configured but not actively broadcasting.
    Waiting,
    /// Actively broadcasting.
    Live { playback_url: String },
    /// Explicitly terminated.  Terminal.
    Ended,
}

impl LivenessState {
    /// Whether the state machine is settled for this mount (no polling
    /// can change it).
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Live { .. } | Self::Ended)
    }
}

/// Default playback URL for a playback id, used when the local record says
/// live but no URL was persisted yet.
pub fn derived_playback_url(playback_id: &str) -> String {
    format!("{PLAYBACK_BASE_URL}/hls/{playback_id}/index.m3u8")
}

/// Compute the mount-time state synchronously from the persisted record.
///
/// The explicit ended timestamp wins over everything; the persisted live
/// flag wins over the playback-id heuristic.
pub fn initial_state(record: &StreamRecord) -> LivenessState {
    if record.ended_at.is_some() {
        return LivenessState::Ended;
    }
    if record.is_live {
        let playback_url = record
            .playback_url
            .clone()
            .or_else(|| record.playback_id.as_deref().map(derived_playback_url))
            .unwrap_or_default();
        return LivenessState::Live { playback_url };
    }
    if record.playback_id.is_some() {
        return LivenessState::Waiting;
    }
    LivenessState::Idle
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

/// Polling parameters for the watcher.
#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    /// Base poll interval.
    pub poll_interval: Duration,
    /// Upper bound on the backed-off interval after failures.
    pub backoff_max: Duration,
    /// Consecutive failures tolerated before polling gives up.
    pub max_failures: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            backoff_max: Duration::from_secs(POLL_BACKOFF_MAX_SECS),
            max_failures: MAX_POLL_FAILURES,
        }
    }
}

/// Handle to one stream's liveness watcher.
///
/// Dropping the handle closes the state channels; call
/// [`stop`](Self::stop) for deterministic teardown of the poll task.
pub struct WatcherHandle {
    stream: StreamId,
    state_tx: Arc<watch::Sender<LivenessState>>,
    state_rx: watch::Receiver<LivenessState>,
    shutdown_tx: watch::Sender<bool>,
    exhausted_tx: Arc<watch::Sender<bool>>,
    ended: Arc<AtomicBool>,
}

impl WatcherHandle {
    /// Current state.
    pub fn state(&self) -> LivenessState {
        self.state_rx.borrow().clone()
    }

    /// Watch channel for state changes.
    pub fn subscribe(&self) -> watch::Receiver<LivenessState> {
        self.state_tx.subscribe()
    }

    /// Watch channel signalling poll exhaustion (failure cap reached).
    pub fn exhausted(&self) -> watch::Receiver<bool> {
        self.exhausted_tx.subscribe()
    }

    /// External signal that the stream was manually ended.
    ///
    /// Flips the absorbing guard before publishing, so a `live` poll
    /// result racing this call is discarded rather than applied.
    pub fn mark_ended(&self) {
        self.ended.store(true, Ordering::Relaxed);
        self.state_tx.send_replace(LivenessState::Ended);
        info!(stream = %self.stream, "stream marked ended");
        self.stop();
    }

    /// Cancel the poll task.  Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Start watching one stream.
///
/// If the initial state is already settled (`live` or `ended`) or there is
/// nothing to poll (`idle`), no poll task is spawned and the status-check
/// capability is never invoked for this mount.
pub fn spawn_watcher(
    record: &StreamRecord,
    probe: Arc<dyn StatusProbe>,
    config: WatcherConfig,
) -> WatcherHandle {
    let stream = record.id;
    let initial = initial_state(record);

    let (state_tx, state_rx) = watch::channel(initial.clone());
    let state_tx = Arc::new(state_tx);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (exhausted_tx, _exhausted_rx) = watch::channel(false);
    let exhausted_tx = Arc::new(exhausted_tx);
    let ended = Arc::new(AtomicBool::new(matches!(initial, LivenessState::Ended)));

    let handle = WatcherHandle {
        stream,
        state_tx: state_tx.clone(),
        state_rx,
        shutdown_tx,
        exhausted_tx: exhausted_tx.clone(),
        ended: ended.clone(),
    };

    let playback_id = match (&initial, record.playback_id.clone()) {
        (LivenessState::Waiting, Some(id)) => id,
        _ => {
            debug!(stream = %stream, state = ?initial, "liveness settled, not polling");
            return handle;
        }
    };

    tokio::spawn(poll_loop(
        stream,
        playback_id,
        probe,
        config,
        state_tx,
        shutdown_rx,
        exhausted_tx,
        ended,
    ));

    handle
}

#[allow(clippy::too_many_arguments)]
async fn poll_loop(
    stream: StreamId,
    playback_id: String,
    probe: Arc<dyn StatusProbe>,
    config: WatcherConfig,
    state_tx: Arc<watch::Sender<LivenessState>>,
    mut shutdown_rx: watch::Receiver<bool>,
    exhausted_tx: Arc<watch::Sender<bool>>,
    ended: Arc<AtomicBool>,
) {
    let mut interval = config.poll_interval;
    let mut failures = 0u32;

    info!(stream = %stream, playback_id = %playback_id, "liveness polling started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!(stream = %stream, "liveness watcher stopped");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let result = probe.check(&playback_id).await;

        // The mount may have been torn down while the check was in
        // flight; its result must not mutate state afterwards.
        if *shutdown_rx.borrow() {
            debug!(stream = %stream, "poll result arrived after teardown, dropped");
            break;
        }

        match result {
            Ok(StatusCheckResult::Active { playback_url }) => {
                if ended.load(Ordering::Relaxed) {
                    debug!(stream = %stream, "stale live result for ended stream, discarded");
                    break;
                }
                info!(stream = %stream, url = %playback_url, "broadcast is live");
                let _ = state_tx.send(LivenessState::Live { playback_url });
                // One-way for the lifetime of this mount.
                break;
            }
            Ok(StatusCheckResult::Inactive) => {
                failures = 0;
                interval = config.poll_interval;
            }
            Ok(StatusCheckResult::Unknown) => {
                warn!(stream = %stream, "unintelligible status payload, staying in waiting");
                failures = 0;
                interval = config.poll_interval;
            }
            Err(e) => {
                failures += 1;
                warn!(stream = %stream, error = %e, failures, "status poll failed");
                if failures >= config.max_failures {
                    error!(stream = %stream, failures, "status polling exhausted, giving up");
                    let _ = exhausted_tx.send(true);
                    break;
                }
                interval = (interval * 2).min(config.backoff_max);
            }
        }
    }

    debug!(stream = %stream, "liveness poll task ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Notify;

    use lumiere_shared::{StatusError, UserId};

    fn record(playback_id: Option<&str>, is_live: bool, ended: bool) -> StreamRecord {
        StreamRecord {
            id: StreamId::new(),
            owner: UserId::new("owner"),
            title: "test stream".into(),
            playback_id: playback_id.map(String::from),
            playback_url: None,
            is_live,
            ended_at: ended.then(Utc::now),
        }
    }

    struct ScriptedProbe {
        script: Mutex<VecDeque<Result<StatusCheckResult, StatusError>>>,
        calls: AtomicU32,
    }

    impl ScriptedProbe {
        fn new(script: Vec<Result<StatusCheckResult, StatusError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl StatusProbe for ScriptedProbe {
        async fn check(&self, _playback_id: &str) -> Result<StatusCheckResult, StatusError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(StatusCheckResult::Inactive))
        }
    }

    /// Probe whose first check blocks until the gate is released, then
    /// reports an active broadcast.
    struct GatedProbe {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl StatusProbe for GatedProbe {
        async fn check(&self, _playback_id: &str) -> Result<StatusCheckResult, StatusError> {
            self.gate.notified().await;
            Ok(StatusCheckResult::Active {
                playback_url: "https://cdn/live.m3u8".into(),
            })
        }
    }

    fn fast_config() -> WatcherConfig {
        WatcherConfig {
            poll_interval: Duration::from_secs(1),
            backoff_max: Duration::from_secs(4),
            max_failures: 3,
        }
    }

    #[test]
    fn test_initial_state_matrix() {
        assert_eq!(initial_state(&record(None, false, false)), LivenessState::Idle);
        assert_eq!(
            initial_state(&record(Some("pb"), false, false)),
            LivenessState::Waiting
        );
        assert_eq!(
            initial_state(&record(Some("pb"), true, false)),
            LivenessState::Live {
                playback_url: derived_playback_url("pb")
            }
        );
        // The ended timestamp wins over the live flag.
        assert_eq!(
            initial_state(&record(Some("pb"), true, true)),
            LivenessState::Ended
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_polling_when_already_live_or_ended() {
        let probe = ScriptedProbe::new(vec![]);

        let live = spawn_watcher(&record(Some("pb"), true, false), probe.clone(), fast_config());
        let ended = spawn_watcher(&record(Some("pb"), false, true), probe.clone(), fast_config());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.calls(), 0);
        assert!(live.state().is_settled());
        assert_eq!(ended.state(), LivenessState::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_transitions_to_live_and_stops_polling() {
        let probe = ScriptedProbe::new(vec![
            Ok(StatusCheckResult::Inactive),
            Ok(StatusCheckResult::Active {
                playback_url: "https://cdn/live.m3u8".into(),
            }),
        ]);

        let handle = spawn_watcher(&record(Some("pb"), false, false), probe.clone(), fast_config());
        assert_eq!(handle.state(), LivenessState::Waiting);

        let mut rx = handle.subscribe();
        rx.changed().await.unwrap();
        assert_eq!(
            *rx.borrow(),
            LivenessState::Live {
                playback_url: "https://cdn/live.m3u8".into()
            }
        );

        // The poll timer was cancelled on transition.
        let calls = probe.calls();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(probe.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_is_terminal_against_polling() {
        let handle = spawn_watcher(
            &record(Some("pb"), false, false),
            ScriptedProbe::new(vec![Ok(StatusCheckResult::Active {
                playback_url: "x".into(),
            })]),
            fast_config(),
        );

        handle.mark_ended();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.state(), LivenessState::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_live_result_discarded_after_manual_end() {
        let gate = Arc::new(Notify::new());
        let handle = spawn_watcher(
            &record(Some("pb"), false, false),
            Arc::new(GatedProbe { gate: gate.clone() }),
            fast_config(),
        );

        // Let the first tick fire; the check is now blocked on the gate.
        tokio::time::sleep(Duration::from_secs(2)).await;

        handle.mark_ended();
        gate.notify_one();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(handle.state(), LivenessState::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_payload_keeps_waiting_and_keeps_polling() {
        let probe = ScriptedProbe::new(vec![
            Ok(StatusCheckResult::Unknown),
            Ok(StatusCheckResult::Unknown),
        ]);

        let handle = spawn_watcher(&record(Some("pb"), false, false), probe.clone(), fast_config());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.state(), LivenessState::Waiting);
        assert!(probe.calls() >= 2);

        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_then_goes_live() {
        let probe = ScriptedProbe::new(vec![
            Err(StatusError::Timeout),
            Ok(StatusCheckResult::Active {
                playback_url: "https://cdn/live.m3u8".into(),
            }),
        ]);

        let handle = spawn_watcher(&record(Some("pb"), false, false), probe, fast_config());
        let mut rx = handle.subscribe();
        rx.changed().await.unwrap();
        assert!(matches!(*rx.borrow(), LivenessState::Live { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_exhaustion_after_failure_cap() {
        let probe = ScriptedProbe::new(vec![
            Err(StatusError::Timeout),
            Err(StatusError::Timeout),
            Err(StatusError::Timeout),
        ]);

        let handle = spawn_watcher(&record(Some("pb"), false, false), probe.clone(), fast_config());
        let mut exhausted = handle.exhausted();
        exhausted.changed().await.unwrap();

        assert!(*exhausted.borrow());
        assert_eq!(handle.state(), LivenessState::Waiting);
        assert_eq!(probe.calls(), 3);
    }
}
