//! Session configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a session can be opened with
//! zero configuration.

use std::time::Duration;

use lumiere_shared::constants::{
    DEFAULT_HISTORY_LIMIT, DEFAULT_PERSIST_INTERVAL_SECS, DEFAULT_POLL_INTERVAL_SECS,
    MAX_POLL_FAILURES, POLL_BACKOFF_MAX_SECS,
};
use lumiere_sync::WatcherConfig;

/// Per-session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Liveness poll interval.
    /// Env: `LUMIERE_POLL_INTERVAL_SECS`
    /// Default: `5`
    pub poll_interval: Duration,

    /// Upper bound on the backed-off poll interval.
    /// Env: `LUMIERE_POLL_BACKOFF_MAX_SECS`
    /// Default: `60`
    pub poll_backoff_max: Duration,

    /// Consecutive poll failures tolerated before giving up.
    /// Env: `LUMIERE_MAX_POLL_FAILURES`
    /// Default: `12`
    pub max_poll_failures: u32,

    /// Viewer-count persistence interval.
    /// Env: `LUMIERE_PERSIST_INTERVAL_SECS`
    /// Default: `15`
    pub persist_interval: Duration,

    /// Number of history rows backfilled on open.
    /// Env: `LUMIERE_HISTORY_LIMIT`
    /// Default: `50`
    pub history_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            poll_backoff_max: Duration::from_secs(POLL_BACKOFF_MAX_SECS),
            max_poll_failures: MAX_POLL_FAILURES,
            persist_interval: Duration::from_secs(DEFAULT_PERSIST_INTERVAL_SECS),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults on missing or unparsable values.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_u64("LUMIERE_POLL_INTERVAL_SECS") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("LUMIERE_POLL_BACKOFF_MAX_SECS") {
            config.poll_backoff_max = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("LUMIERE_MAX_POLL_FAILURES") {
            config.max_poll_failures = n as u32;
        }
        if let Some(secs) = env_u64("LUMIERE_PERSIST_INTERVAL_SECS") {
            config.persist_interval = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("LUMIERE_HISTORY_LIMIT") {
            config.history_limit = n as u32;
        }

        config
    }

    /// The watcher slice of this configuration.
    pub fn watcher(&self) -> WatcherConfig {
        WatcherConfig {
            poll_interval: self.poll_interval,
            backoff_max: self.poll_backoff_max,
            max_failures: self.max_poll_failures,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}
