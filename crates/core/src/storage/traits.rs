//! Trait definitions for the storage module.

use async_trait::async_trait;

use crate::asset::{Artifact, AssetRequest};

use super::StorageError;

/// Durable home for generated artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Copy the artifact's output into durable storage.
    ///
    /// Returns the artifact with `stored_path` and `content_hash` set.
    /// Persisting the same content twice yields the same stored path.
    async fn persist(
        &self,
        request: &AssetRequest,
        artifact: &Artifact,
    ) -> Result<Artifact, StorageError>;
}
