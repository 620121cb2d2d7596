//! Filesystem-backed stores.
//!
//! Objects and key-value entries are written as individual files under a
//! root directory, atomically via a temp file and rename.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::kv::{ABSENT_REVISION, KeyValueStore, Versioned};
use crate::object::{ObjectStore, StoredObject, new_ticket};

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, bytes)
        .await
        .map_err(|e| StorageError::Write(format!("{}: {e}", temp_path.display())))?;
    fs::rename(&temp_path, path)
        .await
        .map_err(|e| StorageError::Write(format!("{}: {e}", path.display())))?;
    Ok(())
}

async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| StorageError::Write(format!("{}: {e}", path.display())))
}

/// Object store keeping one file per ticket.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open (and create if needed) an object store rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        ensure_dir(&root).await?;
        info!("Object store at {}", root.display());
        Ok(Self { root })
    }

    fn object_path(&self, ticket: &str) -> PathBuf {
        self.root.join(format!("{ticket}.blob"))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bytes: Vec<u8>, mime_type: &str) -> Result<StoredObject> {
        let ticket = new_ticket();
        let path = self.object_path(&ticket);
        write_atomic(&path, &bytes).await?;
        debug!("Stored {} bytes ({mime_type}) at {}", bytes.len(), path.display());

        Ok(StoredObject {
            fid: ticket.clone(),
            url: format!("file://{}", path.display()),
            ticket,
        })
    }

    async fn get(&self, ticket: &str) -> Result<Vec<u8>> {
        if ticket.is_empty() || !ticket.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StorageError::ObjectNotFound(ticket.to_string()));
        }
        let path = self.object_path(ticket);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::ObjectNotFound(ticket.to_string()))
            }
            Err(e) => Err(StorageError::Read(format!("{}: {e}", path.display()))),
        }
    }
}

/// Key-value store keeping one JSON file per key.
#[derive(Debug)]
pub struct FsKvStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsKvStore {
    /// Open (and create if needed) a key-value store rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        ensure_dir(&root).await?;
        info!("Key-value store at {}", root.display());
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", encode_key(key)))
    }

    async fn read_entry(&self, key: &str) -> Result<Option<Versioned>> {
        let path = self.key_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Read(format!("{}: {e}", path.display()))),
        }
    }
}

/// Percent-encode everything outside `[A-Za-z0-9_-]` so keys are safe
/// file names on every platform.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[async_trait]
impl KeyValueStore for FsKvStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        self.read_entry(key).await
    }

    async fn put(&self, key: &str, value: serde_json::Value, rev: Option<u64>) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .read_entry(key)
            .await?
            .map_or(ABSENT_REVISION, |v| v.rev);

        if let Some(expected) = rev
            && expected != current
        {
            return Err(StorageError::Conflict {
                key: key.to_string(),
                expected,
                current,
            });
        }

        let entry = Versioned {
            value,
            rev: current + 1,
        };
        write_atomic(&self.key_path(key), &serde_json::to_vec(&entry)?).await?;
        Ok(entry.rev)
    }

    async fn delete(&self, key: &str, rev: Option<u64>) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(current) = self.read_entry(key).await? else {
            return match rev {
                Some(expected) if expected != ABSENT_REVISION => Err(StorageError::Conflict {
                    key: key.to_string(),
                    expected,
                    current: ABSENT_REVISION,
                }),
                _ => Ok(false),
            };
        };

        if let Some(expected) = rev
            && expected != current.rev
        {
            return Err(StorageError::Conflict {
                key: key.to_string(),
                expected,
                current: current.rev,
            });
        }

        let path = self.key_path(key);
        fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::Write(format!("{}: {e}", path.display())))?;
        Ok(true)
    }
}
