//! Durable, write-once artifact storage.

mod error;
mod fs_store;
mod traits;

pub use error::StorageError;
pub use fs_store::FsArtifactStore;
pub use traits::ArtifactStore;
