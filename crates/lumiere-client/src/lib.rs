//! # lumiere-client
//!
//! The coordinating layer of the Lumière synchronization core: session
//! configuration, the UI-facing event stream, and the per-stream
//! [`StreamSession`] that wires the caches, the change feed, the liveness
//! watcher, and the viewer-count persister together.

pub mod config;
pub mod events;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::SessionConfig;
pub use events::SessionEvent;
pub use session::{StreamSession, ViewerIdentity};

/// Install the global tracing subscriber.  `RUST_LOG` overrides the
/// default filter.  Call once, from the embedding shell.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("lumiere_client=debug,lumiere_sync=debug,lumiere_backend=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();
}
