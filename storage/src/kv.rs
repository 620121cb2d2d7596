//! Revisioned key-value database.
//!
//! Keys are already user-scoped (`"<userId>:<key>"`) by the caller. Every
//! stored value carries a revision starting at 1; revision 0 stands for
//! "absent". A write that names a revision is rejected with
//! [`StorageError::Conflict`] unless that revision is still current.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Result, StorageError};

/// Revision of a key that holds no value.
pub const ABSENT_REVISION: u64 = 0;

/// A stored value together with its revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned {
    /// The stored value.
    pub value: serde_json::Value,

    /// Revision of this value.
    pub rev: u64,
}

/// Trait for the user key-value database.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a key.
    async fn get(&self, key: &str) -> Result<Option<Versioned>>;

    /// Write a key. With `rev = Some(r)` the write only succeeds if `r` is
    /// the current revision. Returns the new revision.
    async fn put(&self, key: &str, value: serde_json::Value, rev: Option<u64>) -> Result<u64>;

    /// Delete a key, optionally revision-checked. Returns whether a value
    /// was removed.
    async fn delete(&self, key: &str, rev: Option<u64>) -> Result<bool>;
}

fn check_revision(key: &str, expected: Option<u64>, current: u64) -> Result<()> {
    match expected {
        Some(expected) if expected != current => Err(StorageError::Conflict {
            key: key.to_string(),
            expected,
            current,
        }),
        _ => Ok(()),
    }
}

/// In-memory key-value store.
#[derive(Debug, Default, Clone)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<HashMap<String, Versioned>>>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// All keys starting with `prefix`.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: serde_json::Value, rev: Option<u64>) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let current = entries.get(key).map_or(ABSENT_REVISION, |v| v.rev);
        check_revision(key, rev, current)?;

        let next = current + 1;
        entries.insert(key.to_string(), Versioned { value, rev: next });
        debug!("Put {key} (rev {next})");
        Ok(next)
    }

    async fn delete(&self, key: &str, rev: Option<u64>) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let current = entries.get(key).map_or(ABSENT_REVISION, |v| v.rev);
        check_revision(key, rev, current)?;
        Ok(entries.remove(key).is_some())
    }
}

/// Read-modify-write a key, retrying with a fresh revision when another
/// writer got there first.
///
/// `update` receives the current value (if any) and returns the value to
/// store. Gives up after `max_attempts` conflicts and returns the last one.
pub async fn update_with_retry<F, Fut>(
    store: &dyn KeyValueStore,
    key: &str,
    max_attempts: usize,
    mut update: F,
) -> Result<u64>
where
    F: FnMut(Option<serde_json::Value>) -> Fut,
    Fut: Future<Output = Result<serde_json::Value>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let current = store.get(key).await?;
        let rev = current.as_ref().map_or(ABSENT_REVISION, |v| v.rev);
        let next = update(current.map(|v| v.value)).await?;

        match store.put(key, next, Some(rev)).await {
            Ok(new_rev) => return Ok(new_rev),
            Err(e) if e.is_conflict() && attempt < max_attempts.max(1) => {
                warn!("Stale revision writing {key} (attempt {attempt}), retrying");
            }
            Err(e) => return Err(e),
        }
    }
}
