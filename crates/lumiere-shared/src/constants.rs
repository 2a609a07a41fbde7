/// Application name
pub const APP_NAME: &str = "Lumière";

/// Maximum chat message length in UTF-16 code units (after trimming)
pub const MAX_MESSAGE_LEN: usize = 500;

/// Prefix on locally generated placeholder message ids
pub const OPTIMISTIC_ID_PREFIX: &str = "optimistic-";

/// Default liveness poll interval in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Upper bound on the backed-off poll interval in seconds
pub const POLL_BACKOFF_MAX_SECS: u64 = 60;

/// Consecutive poll failures tolerated before the watcher gives up
pub const MAX_POLL_FAILURES: u32 = 12;

/// Default viewer-count persistence interval in seconds
pub const DEFAULT_PERSIST_INTERVAL_SECS: u64 = 15;

/// Default number of history rows backfilled when a stream view opens
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Base URL of the HLS playback edge, used to derive a playback URL when
/// the status endpoint reports an active broadcast without one
pub const PLAYBACK_BASE_URL: &str = "https://playback.lumiere.stream";
