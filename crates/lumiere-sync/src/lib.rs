//! # lumiere-sync
//!
//! The synchronization cores of the Lumière client: the reconciling chat
//! cache, the append-only tip ledger, the presence tracker, and the stream
//! liveness watcher.  The cache, ledger, and tracker are pure in-memory
//! structures driven by the session; the watcher owns a background poll
//! task with deterministic teardown.

pub mod cache;
pub mod liveness;
pub mod presence;
pub mod tips;

pub use cache::{ChatCache, RemoteApply};
pub use liveness::{initial_state, spawn_watcher, LivenessState, WatcherConfig, WatcherHandle};
pub use presence::PresenceTracker;
pub use tips::TipLedger;
