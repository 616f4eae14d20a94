//! Proof-of-delivery file storage.
//!
//! Confirmation of Output, Return and WriteOff documents needs a proof file.
//! The workflow saves it under `<project_id>/<delivery_code>` before taking any
//! ledger lock; the returned [`ProofRef`] is stored on the document.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use stockyard_core::ProjectId;
use stockyard_invoicing::ProofRef;

#[derive(Debug, Error)]
pub enum ProofStorageError {
    #[error("invalid proof key: {0}")]
    InvalidKey(String),

    #[error("proof file is empty")]
    Empty,

    #[error("proof not found: {0}")]
    NotFound(String),

    #[error("proof storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("proof storage lock poisoned")]
    Poisoned,
}

/// Where proof files live.
#[async_trait]
pub trait ProofStorage: Send + Sync {
    /// Store `bytes` under `key`, replacing any earlier file with the same key.
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<ProofRef, ProofStorageError>;

    async fn load(&self, key: &str) -> Result<Vec<u8>, ProofStorageError>;
}

#[async_trait]
impl<P> ProofStorage for Arc<P>
where
    P: ProofStorage + ?Sized,
{
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<ProofRef, ProofStorageError> {
        (**self).save(key, bytes).await
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>, ProofStorageError> {
        (**self).load(key).await
    }
}

/// Storage key of a document's proof.
pub fn proof_key(project_id: ProjectId, delivery_code: &str) -> String {
    format!("{project_id}/{delivery_code}")
}

/// Keys are `/`-separated segments of non-empty, non-dot names without
/// backslashes, so they can be used as relative paths.
fn validate_key(key: &str) -> Result<(), ProofStorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|segment| {
            segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\')
        });
    if bad {
        return Err(ProofStorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Proofs kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryProofStorage {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryProofStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProofStorage for InMemoryProofStorage {
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<ProofRef, ProofStorageError> {
        validate_key(key)?;
        if bytes.is_empty() {
            return Err(ProofStorageError::Empty);
        }
        let size = bytes.len() as u64;
        self.files
            .write()
            .map_err(|_| ProofStorageError::Poisoned)?
            .insert(key.to_string(), bytes);
        Ok(ProofRef {
            key: key.to_string(),
            uri: format!("memory://{key}"),
            size,
        })
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>, ProofStorageError> {
        validate_key(key)?;
        self.files
            .read()
            .map_err(|_| ProofStorageError::Poisoned)?
            .get(key)
            .cloned()
            .ok_or_else(|| ProofStorageError::NotFound(key.to_string()))
    }
}

/// Proofs stored as files under a root directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never sees a half-written proof.
#[derive(Debug, Clone)]
pub struct FsProofStorage {
    root: PathBuf,
}

impl FsProofStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

#[async_trait]
impl ProofStorage for FsProofStorage {
    #[instrument(skip(self, bytes), fields(size = bytes.len()), err)]
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<ProofRef, ProofStorageError> {
        validate_key(key)?;
        if bytes.is_empty() {
            return Err(ProofStorageError::Empty);
        }
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("partial");
        let size = bytes.len() as u64;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "proof stored");
        Ok(ProofRef {
            key: key.to_string(),
            uri: format!("file://{}", path.display()),
            size,
        })
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>, ProofStorageError> {
        validate_key(key)?;
        match tokio::fs::read(self.path_of(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ProofStorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
