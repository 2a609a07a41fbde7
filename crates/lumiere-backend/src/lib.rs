//! # lumiere-backend
//!
//! Capability contracts the synchronization core consumes, plus the two
//! concrete implementations this repo ships: an in-process backend + feed
//! hub used by tests and local development shells, and an HTTP status probe
//! against the broadcast provider.
//!
//! The actual hosted backend (database, chat fan-out, auth) lives behind
//! these traits and is not reimplemented here.

pub mod capabilities;
pub mod feed;
pub mod http;
pub mod memory;

pub use capabilities::{ChatBackend, ProfileResolver, StatusCheckResult, StatusProbe};
pub use feed::{ChangeFeed, FeedCommand, FeedEvent, FeedSubscription, LocalFeed, SubscribeOptions};
pub use http::HttpStatusProbe;
pub use memory::MemoryBackend;
