//! # lumiere-shared
//!
//! Identifiers, domain models, constants, and the error taxonomy shared by
//! every Lumière crate.  Nothing in here performs I/O; these are the plain
//! types that flow between the capability layer, the synchronization cores,
//! and the client session.

pub mod constants;
pub mod error;
pub mod models;
pub mod types;

pub use error::{PersistenceError, StatusError, SyncError, ValidationError};
pub use models::{ChatMessage, NewChatMessage, SenderProfile, StreamRecord, Tip};
pub use types::{ConnectionKey, MessageId, StreamId, UserId};
