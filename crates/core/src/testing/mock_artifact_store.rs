//! Mock artifact store for testing.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::asset::{Artifact, AssetRequest};
use crate::storage::{ArtifactStore, StorageError};

/// In-memory `ArtifactStore`.
///
/// Hashes the artifact location instead of its content and reports a
/// `mock://` stored path. Expired artifacts are rejected like the real store.
#[derive(Debug, Default)]
pub struct MockArtifactStore {
    persisted: Arc<RwLock<Vec<Artifact>>>,
    next_error: Arc<RwLock<Option<StorageError>>>,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `persist` call with this error.
    pub async fn set_next_error(&self, error: StorageError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn persisted(&self) -> Vec<Artifact> {
        self.persisted.read().await.clone()
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn persist(
        &self,
        request: &AssetRequest,
        artifact: &Artifact,
    ) -> Result<Artifact, StorageError> {
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }
        if let Some(expired_at) = artifact.expires_at {
            if artifact.is_expired(chrono::Utc::now()) {
                return Err(StorageError::Expired {
                    location: artifact.location.clone(),
                    expired_at,
                });
            }
        }

        let hash = format!("{:x}", Sha256::digest(artifact.location.as_bytes()));
        let mut stored = artifact.clone();
        stored.stored_path = Some(format!("mock://{}/{}", request.storage_key(), &hash[..16]));
        stored.content_hash = Some(hash);
        self.persisted.write().await.push(stored.clone());
        Ok(stored)
    }
}
