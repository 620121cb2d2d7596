//! # Storage
//!
//! Collaborator interfaces the pipeline persists through, with in-memory and
//! filesystem implementations:
//!
//! - **ObjectStore**: `put(bytes, mime) -> ticket`, `get(ticket) -> bytes`
//! - **KeyValueStore**: revisioned `get` / `put` / `delete` keyed by `"<userId>:<key>"`
//! - **KeyedLocks**: per-key async locks closing read-then-write races

pub mod error;
pub mod fs;
pub mod kv;
pub mod lock;
pub mod object;

pub use error::{Result, StorageError};
pub use fs::{FsKvStore, FsObjectStore};
pub use kv::{ABSENT_REVISION, KeyValueStore, MemoryKvStore, Versioned, update_with_retry};
pub use lock::{KeyGuard, KeyedLocks};
pub use object::{MemoryObjectStore, ObjectStore, StoredObject};
