//! Asset data model: requests, artifacts, episode plans and manifests.

mod manifest;
mod plan;
mod types;

pub use manifest::{EpisodeManifest, ManifestEntry};
pub use plan::{AssetSpec, EpisodePlan, PlanError, Product};
pub use types::{
    validate_slug, Artifact, AssetError, AssetRequest, AssetType, Capability, DedupKey, Priority,
    MAX_RANK,
};
