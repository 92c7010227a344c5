//! Remote object storage seam.
//!
//! The records core never talks to a concrete store directly: commit,
//! rollback, and cascading deletion all go through [`ObjectStore`].
//! Deleting a reference that no longer exists must succeed, so a
//! retried sweep never fails on work already done.

pub mod filesystem;
pub mod memory;

pub use filesystem::FilesystemStore;
pub use memory::InMemoryObjectStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::AttachmentRef;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

/// Caller-supplied metadata for an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub file_name: String,
    pub content_type: String,
}

/// A successfully stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    pub reference: AttachmentRef,
    pub size_bytes: u64,
}

/// Remote object storage client.
///
/// `delete` is idempotent: deleting a key that is already gone is
/// success, not an error.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        data: &[u8],
        metadata: &UploadMetadata,
    ) -> Result<StoredObject, StorageError>;

    async fn delete(&self, reference: &AttachmentRef) -> Result<(), StorageError>;
}
