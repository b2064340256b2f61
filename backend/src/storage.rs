//! Local filesystem storage for uploaded media

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{AppError, AppResult};

const PROBE_CONTENT: &[u8] = b"storage health check";

/// Media files stored under a single root directory
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a path relative to the media root
    pub fn resolve(&self, relative: &str) -> AppResult<PathBuf> {
        let relative = Path::new(relative);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(AppError::StorageError(format!(
                "refusing path outside media root: {}",
                relative.display()
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Write bytes at a relative path, creating parent directories
    pub async fn save(&self, relative: &str, bytes: &[u8]) -> AppResult<PathBuf> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::StorageError(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;
        tracing::debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(path)
    }

    pub async fn exists(&self, relative: &str) -> bool {
        match self.resolve(relative) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Remove a stored file; a file that is already gone is not an error
    pub async fn delete(&self, relative: &str) -> AppResult<()> {
        let path = self.resolve(relative)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::StorageError(e.to_string())),
        }
    }

    /// Best-effort delete used on cleanup paths
    pub async fn delete_quietly(&self, relative: &str) {
        if let Err(e) = self.delete(relative).await {
            tracing::warn!("Could not remove stored file {}: {}", relative, e);
        }
    }

    /// Write, read back and delete a sentinel file
    pub async fn probe(&self) -> bool {
        let relative = format!("health_check_{}.txt", Uuid::new_v4());
        let Ok(path) = self.save(&relative, PROBE_CONTENT).await else {
            return false;
        };
        let round_trip = tokio::fs::read(&path)
            .await
            .map(|content| content == PROBE_CONTENT)
            .unwrap_or(false);
        let removed = self.delete(&relative).await.is_ok();
        round_trip && removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_exists_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path());

        let rel = "media_uploads/user/file.mp3";
        storage.save(rel, b"abc").await.unwrap();
        assert!(storage.exists(rel).await);

        storage.delete(rel).await.unwrap();
        assert!(!storage.exists(rel).await);

        // deleting again is fine
        storage.delete(rel).await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path());
        assert!(storage.probe().await);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_probe_fails_on_unwritable_root() {
        let dir = tempfile::tempdir().unwrap();
        let file_root = dir.path().join("not-a-dir");
        std::fs::write(&file_root, b"x").unwrap();
        let storage = MediaStorage::new(&file_root);
        assert!(!storage.probe().await);
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let storage = MediaStorage::new("/srv/media");
        assert!(storage.resolve("../etc/passwd").is_err());
        assert!(storage.resolve("/etc/passwd").is_err());
        assert_eq!(
            storage.resolve("media_uploads/a.mp3").unwrap(),
            PathBuf::from("/srv/media/media_uploads/a.mp3")
        );
    }
}
