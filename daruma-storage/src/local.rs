//! Local filesystem provider
//!
//! Stores each object as a file directly under a root directory.

use crate::failure::{ProviderFailure, ProviderResult};
use crate::provider::{Provider, ProviderId};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[cfg(unix)]
const DIRECTORY_MODE: u32 = 0o700;

/// Provider backed by a directory on the local filesystem
#[derive(Debug)]
pub struct LocalFilesystemProvider {
    id: ProviderId,
    root: PathBuf,
}

impl LocalFilesystemProvider {
    /// Open a provider rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> ProviderResult<Self> {
        let root = root.into();
        let id = ProviderId::new("local", root.to_string_lossy());
        let provider = Self { id, root };
        provider.create_root().await?;
        Ok(provider)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn create_root(&self) -> ProviderResult<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(DIRECTORY_MODE);
        builder
            .create(&self.root)
            .await
            .map_err(|e| ProviderFailure::from_io(&self.id, &e))
    }

    /// Path of an object; names may not escape the root directory
    fn object_path(&self, name: &str) -> ProviderResult<PathBuf> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(ProviderFailure::operation(
                &self.id,
                format!("invalid object name {:?}", name),
            ));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl Provider for LocalFilesystemProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn get(&self, name: &str) -> ProviderResult<Bytes> {
        let path = self.object_path(name)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| ProviderFailure::from_io(&self.id, &e))
    }

    async fn put(&self, name: &str, data: Bytes) -> ProviderResult<()> {
        let path = self.object_path(name)?;
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| ProviderFailure::from_io(&self.id, &e))
    }

    async fn delete(&self, name: &str) -> ProviderResult<()> {
        let path = self.object_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProviderFailure::from_io(&self.id, &e)),
        }
    }

    async fn wipe(&self) -> ProviderResult<()> {
        debug!(provider = %self.id, "Wiping provider directory");
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ProviderFailure::from_io(&self.id, &e)),
        }
        self.create_root().await
    }
}
