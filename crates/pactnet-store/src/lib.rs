//! pactnet-store
//!
//! Durable persistence: atomic JSON documents under the data directory and
//! the SQLite offline message queue.

pub mod fs;
pub mod offline_queue;
pub mod stores;

pub use fs::{read_json, write_json_atomic, write_json_with_retry, FileLocks};
pub use offline_queue::{OfflineQueue, QueueStatus, QueuedMessage};
pub use stores::{DataStore, RegistryDocument};
