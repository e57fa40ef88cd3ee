//! Path-addressable blob storage
//!
//! The pipeline only needs `put`, `get` and a URI the graph database can
//! read from. Keys are `/`-separated and relative to the store root (the
//! bucket).

use crate::error::StorageError;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

pub trait BlobStore: Send + Sync {
    /// Write an object, replacing any previous content. The object is only
    /// visible once completely written.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    fn exists(&self, key: &str) -> bool;

    /// Location of an object (or key prefix) as seen by external readers.
    fn uri(&self, key: &str) -> String;
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Blob store backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    uri_prefix: Option<String>,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            uri_prefix: None,
        }
    }

    /// Report URIs under `prefix` (e.g. `s3://bucket`) instead of `file://`,
    /// for a root that is mirrored to object storage.
    pub fn with_uri_prefix(mut self, prefix: &str) -> Self {
        self.uri_prefix = Some(prefix.trim_end_matches('/').to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl BlobStore for LocalBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let io_err = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, bytes).map_err(io_err)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(e));
        }

        tracing::debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        std::fs::read(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io {
                    key: key.to_string(),
                    source,
                }
            }
        })
    }

    fn exists(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.exists()).unwrap_or(false)
    }

    fn uri(&self, key: &str) -> String {
        if let Some(prefix) = &self.uri_prefix {
            return format!("{}/{}", prefix, key);
        }
        let path = self.root.join(key);
        let absolute = std::path::absolute(&path).unwrap_or(path);
        match url::Url::from_file_path(&absolute) {
            Ok(url) => url.to_string(),
            Err(()) => absolute.display().to_string(),
        }
    }
}

/// In-memory blob store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn exists(&self, key: &str) -> bool {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    fn uri(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}
