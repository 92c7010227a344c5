use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{ObjectStore, StorageError, StoredObject, UploadMetadata};
use crate::models::AttachmentRef;

/// Object store backed by a local directory.
///
/// Keys are `objects/<uuid>`; the mapped path never leaves the base
/// directory.
pub struct FilesystemStore {
    base_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.contains("..") || Path::new(key).is_absolute() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.base_dir.join(key))
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn upload(
        &self,
        data: &[u8],
        metadata: &UploadMetadata,
    ) -> Result<StoredObject, StorageError> {
        let key = format!("objects/{}", Uuid::new_v4());
        let path = self.path_for(&key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;

        tracing::debug!(key, file_name = %metadata.file_name, size = data.len(), "Object stored");
        Ok(StoredObject {
            reference: AttachmentRef::new(key, path.to_string_lossy().into_owned()),
            size_bytes: data.len() as u64,
        })
    }

    async fn delete(&self, reference: &AttachmentRef) -> Result<(), StorageError> {
        let path = self.path_for(&reference.key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Already gone: repeated delete of the same ref is success.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> UploadMetadata {
        UploadMetadata {
            file_name: "photo.jpg".into(),
            content_type: "image/jpeg".into(),
        }
    }

    #[tokio::test]
    async fn upload_writes_under_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        let stored = store.upload(b"jpeg bytes", &metadata()).await.unwrap();
        let path = dir.path().join(&stored.reference.key);
        assert_eq!(fs::read(&path).await.unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn delete_removes_file_and_tolerates_repeat() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        let stored = store.upload(b"jpeg bytes", &metadata()).await.unwrap();
        store.delete(&stored.reference).await.unwrap();
        assert!(!dir.path().join(&stored.reference.key).exists());

        // Second delete of the same reference is a no-op success.
        store.delete(&stored.reference).await.unwrap();
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        let reference = AttachmentRef::new("../escape", "unused");
        let result = store.delete(&reference).await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }
}
