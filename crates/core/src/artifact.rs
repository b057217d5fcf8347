//! Storage collaborator for document files and signed artifacts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("artifact key is not allowed: {0}")]
    InvalidKey(String),
    #[error("artifact io failed: {0}")]
    Io(String),
}

#[async_trait]
pub trait ArtifactStorage: Send + Sync + 'static {
    /// Store `bytes` under `key` and return the URL it can be fetched from.
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ArtifactError>;

    async fn download(&self, url: &str) -> Result<Vec<u8>, ArtifactError>;
}

/// Keys are relative, slash-separated and may not climb out of the root.
fn check_key(key: &str) -> Result<(), ArtifactError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(ArtifactError::InvalidKey(key.to_string()));
    }
    Ok(())
}

const MEMORY_SCHEME: &str = "mem://";

#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStorage {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryArtifactStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, returning its URL.
    pub async fn put(&self, key: &str, bytes: Vec<u8>) -> String {
        let url = format!("{MEMORY_SCHEME}{key}");
        self.objects.write().await.insert(url.clone(), bytes);
        url
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStorage for MemoryArtifactStorage {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, ArtifactError> {
        check_key(key)?;
        Ok(self.put(key, bytes).await)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ArtifactError> {
        self.objects
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(url.to_string()))
    }
}

/// Files under a root directory, addressed as `{public_base}/{key}`.
#[derive(Debug, Clone)]
pub struct FsArtifactStorage {
    root: PathBuf,
    public_base: String,
}

impl FsArtifactStorage {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for_url(&self, url: &str) -> Result<PathBuf, ArtifactError> {
        let key = url
            .strip_prefix(&self.public_base)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| ArtifactError::NotFound(url.to_string()))?;
        check_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ArtifactStorage for FsArtifactStorage {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ArtifactError> {
        check_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ArtifactError::Io(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ArtifactError::Io(e.to_string()))?;
        tracing::debug!(key, content_type, "stored artifact");
        Ok(format!("{}/{key}", self.public_base))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path_for_url(url)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ArtifactError::NotFound(url.to_string()),
            _ => ArtifactError::Io(e.to_string()),
        })
    }
}
