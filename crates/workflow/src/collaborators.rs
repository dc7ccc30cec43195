//! Services the workflow calls but does not own.
//!
//! Each seam is a small async trait with an in-memory implementation used by
//! tests and local runs.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

/// A collaborator call failed.
#[derive(Error, Debug)]
#[error("{service} failed: {message}")]
pub struct CollaboratorError {
    /// Which collaborator.
    pub service: &'static str,
    /// What went wrong.
    pub message: String,
}

/// Resolves user ids to display names.
#[async_trait]
pub trait IdentityLookup: Send + Sync + Debug {
    /// Display name of `user_id`, `None` if the user is unknown.
    async fn resolve(&self, user_id: &str) -> Result<Option<String>, CollaboratorError>;
}

/// Stores the DICOM files of studies.
#[async_trait]
pub trait ArchiveStore: Send + Sync + Debug {
    /// Deletes every file of the study with key `<project_id>.<StudyInstanceUID>`.
    async fn delete_by_study_key(&self, key: &str) -> Result<(), CollaboratorError>;
}

/// Stores opaque blobs such as export payloads.
#[async_trait]
pub trait BlobStore: Send + Sync + Debug {
    /// Writes `bytes` under `key`, replacing any previous blob.
    async fn store(&self, key: &str, bytes: Vec<u8>) -> Result<(), CollaboratorError>;
}

/// Fixed user directory.
#[derive(Debug, Default)]
pub struct InMemoryIdentity {
    names: RwLock<HashMap<String, String>>,
    failing: RwLock<Vec<String>>,
    lookups: AtomicUsize,
}

impl InMemoryIdentity {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user.
    pub fn insert(&self, user_id: impl Into<String>, name: impl Into<String>) {
        self.names.write().insert(user_id.into(), name.into());
    }

    /// Makes lookups of `user_id` fail.
    pub fn fail_for(&self, user_id: impl Into<String>) {
        self.failing.write().push(user_id.into());
    }

    /// Number of lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityLookup for InMemoryIdentity {
    async fn resolve(&self, user_id: &str) -> Result<Option<String>, CollaboratorError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.read().iter().any(|id| id == user_id) {
            return Err(CollaboratorError {
                service: "identity",
                message: format!("lookup of {} failed", user_id),
            });
        }
        Ok(self.names.read().get(user_id).cloned())
    }
}

/// Records the study keys it was asked to delete.
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    deleted: Mutex<Vec<String>>,
}

impl InMemoryArchive {
    /// Creates an archive with nothing deleted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys deleted so far, in call order.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchive {
    async fn delete_by_study_key(&self, key: &str) -> Result<(), CollaboratorError> {
        self.deleted.lock().push(key.to_string());
        Ok(())
    }
}

/// Blobs kept in a map.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    failing: AtomicBool,
}

impl InMemoryBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The blob stored under `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.read().get(key).cloned()
    }

    /// Every key, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.blobs.read().keys().cloned().collect()
    }

    /// Makes every following write fail, or succeed again.
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn store(&self, key: &str, bytes: Vec<u8>) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError {
                service: "blob store",
                message: format!("write of {} failed", key),
            });
        }
        self.blobs.write().insert(key.to_string(), bytes);
        Ok(())
    }
}
