//! State management module.
//!
//! This module provides persistent state storage for recorded resources,
//! stack exports and pass history, with locking for concurrent runs.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{HistoryEntry, InfraState, MAX_HISTORY, Operation, RecordedResource, STATE_VERSION};
