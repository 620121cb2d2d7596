//! Persistent object storage addressed by ticket.
//!
//! Indexed document blobs and raw-text uploads live here. The ticket is the
//! only durable reference the rest of the pipeline keeps.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, StorageError};

/// Receipt for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Durable reference used to read the object back.
    pub ticket: String,

    /// Backend file id.
    pub fid: String,

    /// Location of the object, for display.
    pub url: String,
}

/// Trait for object storage backends.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes and return their ticket.
    async fn put(&self, bytes: Vec<u8>, mime_type: &str) -> Result<StoredObject>;

    /// Read the bytes stored under `ticket`.
    async fn get(&self, ticket: &str) -> Result<Vec<u8>>;
}

/// Generate a fresh ticket.
pub(crate) fn new_ticket() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone)]
struct MemoryObject {
    bytes: Vec<u8>,
    mime_type: String,
}

/// In-memory object store.
#[derive(Debug, Default, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, MemoryObject>>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Mime type recorded for a ticket.
    pub async fn mime_type(&self, ticket: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(ticket)
            .map(|o| o.mime_type.clone())
    }

    /// Drop an object, leaving any references to it dangling.
    pub async fn remove(&self, ticket: &str) -> bool {
        self.objects.write().await.remove(ticket).is_some()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bytes: Vec<u8>, mime_type: &str) -> Result<StoredObject> {
        let ticket = new_ticket();
        debug!("Storing {} bytes as {ticket} ({mime_type})", bytes.len());
        self.objects.write().await.insert(
            ticket.clone(),
            MemoryObject {
                bytes,
                mime_type: mime_type.to_string(),
            },
        );
        Ok(StoredObject {
            fid: ticket.clone(),
            url: format!("memory://{ticket}"),
            ticket,
        })
    }

    async fn get(&self, ticket: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(ticket)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StorageError::ObjectNotFound(ticket.to_string()))
    }
}
