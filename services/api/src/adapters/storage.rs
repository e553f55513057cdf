//! services/api/src/adapters/storage.rs
//!
//! Local filesystem implementation of the `ObjectStorage` port. Objects live
//! under `{base_path}/{key}`; keys are relative, `/`-separated paths.

use async_trait::async_trait;
use bytes::Bytes;
use claims_core::ports::{ObjectStorage, PortError, PortResult};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

pub struct LocalStorageAdapter {
    base_path: PathBuf,
}

impl LocalStorageAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Resolves a key to a path inside the base directory, rejecting keys that would
    /// escape it.
    fn key_path(&self, key: &str) -> PortResult<PathBuf> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain {
            return Err(PortError::Invalid(format!("Invalid storage key '{}'", key)));
        }
        Ok(self.base_path.join(relative))
    }
}

fn io_error(key: &str, error: std::io::Error) -> PortError {
    if error.kind() == std::io::ErrorKind::NotFound {
        PortError::NotFound(format!("Object {} not found", key))
    } else {
        PortError::Unexpected(format!("Storage failure for {}: {}", key, error))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorageAdapter {
    async fn put(&self, key: &str, data: Bytes) -> PortResult<()> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }
        fs::write(&path, &data).await.map_err(|e| io_error(key, e))
    }

    async fn get(&self, key: &str) -> PortResult<Bytes> {
        let path = self.key_path(key)?;
        let data = fs::read(&path).await.map_err(|e| io_error(key, e))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> PortResult<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }
}
