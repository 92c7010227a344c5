use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ObjectStore, StorageError, StoredObject, UploadMetadata};
use crate::models::AttachmentRef;

/// HashMap-backed object store for tests and local demos.
///
/// Keeps a log of every delete call and supports per-key fault
/// injection, so partial-failure sweeps can be exercised without a
/// real backend.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failing_keys: Mutex<HashSet<String>>,
    delete_calls: Mutex<Vec<String>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delete of `key` fail until cleared.
    pub async fn fail_deletes_for(&self, key: &str) {
        self.failing_keys.lock().await.insert(key.to_string());
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.lock().await.contains_key(key)
    }

    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// Every key a delete was attempted for, in call order.
    pub async fn delete_calls(&self) -> Vec<String> {
        self.delete_calls.lock().await.clone()
    }

    /// Seed an object under a fixed key, bypassing upload.
    pub async fn put(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .await
            .insert(key.to_string(), data.to_vec());
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload(
        &self,
        data: &[u8],
        metadata: &UploadMetadata,
    ) -> Result<StoredObject, StorageError> {
        let key = format!("attachments/{}", Uuid::new_v4());
        let url = format!("memory://{key}/{}", metadata.file_name);
        self.objects
            .lock()
            .await
            .insert(key.clone(), data.to_vec());
        Ok(StoredObject {
            reference: AttachmentRef::new(key, url),
            size_bytes: data.len() as u64,
        })
    }

    async fn delete(&self, reference: &AttachmentRef) -> Result<(), StorageError> {
        self.delete_calls
            .lock()
            .await
            .push(reference.key.clone());

        if self.failing_keys.lock().await.contains(&reference.key) {
            return Err(StorageError::Backend(format!(
                "injected failure for {}",
                reference.key
            )));
        }

        // Absent key: already deleted, still success.
        self.objects.lock().await.remove(&reference.key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> UploadMetadata {
        UploadMetadata {
            file_name: "scan.pdf".into(),
            content_type: "application/pdf".into(),
        }
    }

    #[tokio::test]
    async fn upload_then_delete() {
        let store = InMemoryObjectStore::new();
        let stored = store.upload(b"content", &metadata()).await.unwrap();
        assert_eq!(stored.size_bytes, 7);
        assert!(store.contains(&stored.reference.key).await);

        store.delete(&stored.reference).await.unwrap();
        assert!(!store.contains(&stored.reference.key).await);
    }

    #[tokio::test]
    async fn delete_of_absent_key_is_success() {
        let store = InMemoryObjectStore::new();
        let reference = AttachmentRef::new("attachments/gone", "memory://attachments/gone");
        store.delete(&reference).await.unwrap();
        store.delete(&reference).await.unwrap();
        assert_eq!(store.delete_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn injected_failure_keeps_object() {
        let store = InMemoryObjectStore::new();
        let stored = store.upload(b"content", &metadata()).await.unwrap();
        store.fail_deletes_for(&stored.reference.key).await;

        let result = store.delete(&stored.reference).await;
        assert!(result.is_err());
        assert!(store.contains(&stored.reference.key).await);
    }
}
