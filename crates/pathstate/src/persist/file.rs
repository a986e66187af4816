use super::SessionStorage;
use crate::error::PersistenceError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Session storage backed by a directory, one `<key>.json` file per item.
pub struct FileSessionStorage {
    base_path: PathBuf,
}

impl FileSessionStorage {
    /// Create a file storage rooted at `base_path`. The directory is created
    /// on first write.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }

    pub(crate) fn item_path(&self, key: &str) -> Result<PathBuf, PersistenceError> {
        Self::validate_key(key)?;
        Ok(self.base_path.join(format!("{key}.json")))
    }

    /// Validate that a key is safe for use as a filename.
    /// Rejects path separators, `..`, and control characters.
    fn validate_key(key: &str) -> Result<(), PersistenceError> {
        if key.is_empty() {
            return Err(PersistenceError::InvalidKey(
                "storage key cannot be empty".to_string(),
            ));
        }
        if key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(PersistenceError::InvalidKey(format!(
                "storage key contains invalid characters: {key:?}"
            )));
        }
        if key.chars().any(|c| c.is_control()) {
            return Err(PersistenceError::InvalidKey(format!(
                "storage key contains control characters: {key:?}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for FileSessionStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.item_path(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write atomically: temp file in the same directory, then rename.
    async fn set_item(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let path = self.item_path(key)?;
        if !self.base_path.exists() {
            tokio::fs::create_dir_all(&self.base_path).await?;
        }

        let tmp_path = self
            .base_path
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));

        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(value.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            match tokio::fs::rename(&tmp_path, &path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tokio::fs::remove_file(&path).await?;
                    tokio::fs::rename(&tmp_path, &path).await?;
                }
                Err(e) => return Err(e),
            }
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(PersistenceError::Io(e));
        }
        Ok(())
    }
}
