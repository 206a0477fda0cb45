//! Core asset data types.

use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

static SLUG_PATTERN: Lazy<regex_lite::Regex> =
    Lazy::new(|| regex_lite::Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("valid slug regex"));

/// Highest product rank in a ranking episode.
pub const MAX_RANK: u8 = 5;

/// Errors raised while validating asset requests and plans.
///
/// These are configuration mistakes, not runtime failures: a run must not
/// start against a plan that fails validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("invalid episode slug '{0}': expected lowercase letters, digits and dashes")]
    InvalidSlug(String),

    #[error("invalid product rank {0}: expected 1..={MAX_RANK}")]
    InvalidRank(u8),

    #[error("{asset_type} requires a product rank")]
    MissingRank { asset_type: AssetType },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("duplicate product rank {0}")]
    DuplicateRank(u8),

    #[error("asset references rank {0} which is not in the product list")]
    UnknownRank(u8),
}

// ============================================================================
// Enumerations
// ============================================================================

/// Kind of media asset an episode needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetType {
    Thumbnail,
    ProductHero,
    ProductDetail,
    Lifestyle,
    Background,
    AvatarFrame,
    VideoClip,
}

impl AssetType {
    pub const ALL: [AssetType; 7] = [
        AssetType::Thumbnail,
        AssetType::ProductHero,
        AssetType::ProductDetail,
        AssetType::Lifestyle,
        AssetType::Background,
        AssetType::AvatarFrame,
        AssetType::VideoClip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Thumbnail => "thumbnail",
            AssetType::ProductHero => "product-hero",
            AssetType::ProductDetail => "product-detail",
            AssetType::Lifestyle => "lifestyle",
            AssetType::Background => "background",
            AssetType::AvatarFrame => "avatar-frame",
            AssetType::VideoClip => "video-clip",
        }
    }

    /// Shared assets belong to the whole episode rather than one product.
    pub fn is_shared(&self) -> bool {
        matches!(
            self,
            AssetType::Thumbnail | AssetType::Background | AssetType::AvatarFrame
        )
    }

    /// Whether an asset of this type can be published as a visual.
    pub fn is_visual(&self) -> bool {
        // Backgrounds are compositing plates, never shown on their own.
        !matches!(self, AssetType::Background)
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation capability a backend offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    TextToImage,
    ImageToImage,
    ImageToVideo,
    LipSync,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::TextToImage => "text-to-image",
            Capability::ImageToImage => "image-to-image",
            Capability::ImageToVideo => "image-to-video",
            Capability::LipSync => "lip-sync",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue priority class. Blocking work preempts normal work.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    Blocking,
}

impl Priority {
    pub fn as_i64(&self) -> i64 {
        match self {
            Priority::Normal => 0,
            Priority::Blocking => 1,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        if value > 0 {
            Priority::Blocking
        } else {
            Priority::Normal
        }
    }
}

// ============================================================================
// Asset Request
// ============================================================================

/// Derived identifier for one logical asset.
///
/// Two requests with the same episode, rank, asset type and prompt are the
/// same asset, regardless of which backend or model is asked to render it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DedupKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A unit of generation work. Immutable once admitted to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRequest {
    /// Episode slug (e.g. "best-air-fryers-2026").
    pub episode: String,
    /// Product rank (1-5), or None for shared assets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u8>,
    pub asset_type: AssetType,
    /// Name of the configured backend that renders this asset.
    pub backend: String,
    /// Backend model identifier.
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<String>,
    /// Explicit capability; derived from the asset type when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<Capability>,
    #[serde(default)]
    pub priority: Priority,
}

impl AssetRequest {
    pub fn new(
        episode: impl Into<String>,
        rank: Option<u8>,
        asset_type: AssetType,
        backend: impl Into<String>,
        model: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            episode: episode.into(),
            rank,
            asset_type,
            backend: backend.into(),
            model: model.into(),
            prompt: prompt.into(),
            reference_image: None,
            capability: None,
            priority: Priority::Normal,
        }
    }

    pub fn with_reference_image(mut self, reference: impl Into<String>) -> Self {
        self.reference_image = Some(reference.into());
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Capability the chosen backend must offer to render this request.
    pub fn required_capability(&self) -> Capability {
        if let Some(capability) = self.capability {
            return capability;
        }
        match self.asset_type {
            AssetType::VideoClip => Capability::ImageToVideo,
            _ if self.reference_image.is_some() => Capability::ImageToImage,
            _ => Capability::TextToImage,
        }
    }

    /// First 16 hex chars of the SHA-256 of the prompt.
    pub fn prompt_hash(&self) -> String {
        let digest = Sha256::digest(self.prompt.as_bytes());
        format!("{:x}", digest)[..16].to_string()
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey(format!(
            "{}:{}:{}:{}",
            self.episode,
            self.rank_segment(),
            self.asset_type,
            self.prompt_hash()
        ))
    }

    /// Relative storage location: `{episode}/{asset_type}/{rank|shared}`.
    pub fn storage_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.episode,
            self.asset_type,
            self.rank_segment()
        )
    }

    fn rank_segment(&self) -> String {
        match self.rank {
            Some(rank) => rank.to_string(),
            None => "shared".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), AssetError> {
        validate_slug(&self.episode)?;
        if let Some(rank) = self.rank {
            if rank == 0 || rank > MAX_RANK {
                return Err(AssetError::InvalidRank(rank));
            }
        } else if !self.asset_type.is_shared() {
            return Err(AssetError::MissingRank {
                asset_type: self.asset_type,
            });
        }
        if self.backend.trim().is_empty() {
            return Err(AssetError::MissingField("backend"));
        }
        if self.model.trim().is_empty() {
            return Err(AssetError::MissingField("model"));
        }
        if self.prompt.trim().is_empty() {
            return Err(AssetError::MissingField("prompt"));
        }
        Ok(())
    }
}

pub fn validate_slug(slug: &str) -> Result<(), AssetError> {
    if SLUG_PATTERN.is_match(slug) {
        Ok(())
    } else {
        Err(AssetError::InvalidSlug(slug.to_string()))
    }
}

// ============================================================================
// Artifact
// ============================================================================

/// A successful generation output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Where the backend left the output (URL or file path).
    pub location: String,
    /// Local path after persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_path: Option<String>,
    /// SHA-256 of the persisted bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Credits the backend reported for this output.
    #[serde(default)]
    pub credits: u32,
    pub backend: String,
    pub produced_at: DateTime<Utc>,
    /// After this instant the remote location is no longer downloadable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Artifact {
    pub fn new(location: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            stored_path: None,
            content_hash: None,
            credits: 0,
            backend: backend.into(),
            produced_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_credits(mut self, credits: u32) -> Self {
        self.credits = credits;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_persisted(&self) -> bool {
        self.stored_path.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hero(prompt: &str) -> AssetRequest {
        AssetRequest::new(
            "best-air-fryers",
            Some(1),
            AssetType::ProductHero,
            "dzine",
            "flux-pro",
            prompt,
        )
    }

    #[test]
    fn test_dedup_key_ignores_backend_and_model() {
        let a = hero("air fryer on marble counter");
        let mut b = a.clone();
        b.backend = "fallback-api".to_string();
        b.model = "other".to_string();
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_dedup_key_changes_with_prompt() {
        assert_ne!(
            hero("air fryer on marble").dedup_key(),
            hero("air fryer on wood").dedup_key()
        );
    }

    #[test]
    fn test_dedup_key_format() {
        let key = hero("x").dedup_key();
        let parts: Vec<&str> = key.as_str().split(':').collect();
        assert_eq!(parts[0], "best-air-fryers");
        assert_eq!(parts[1], "1");
        assert_eq!(parts[2], "product-hero");
        assert_eq!(parts[3].len(), 16);
    }

    #[test]
    fn test_storage_key_for_shared_asset() {
        let request = AssetRequest::new(
            "best-air-fryers",
            None,
            AssetType::Thumbnail,
            "dzine",
            "m",
            "p",
        );
        assert_eq!(request.storage_key(), "best-air-fryers/thumbnail/shared");
    }

    #[test]
    fn test_required_capability() {
        assert_eq!(hero("p").required_capability(), Capability::TextToImage);
        assert_eq!(
            hero("p")
                .with_reference_image("ref.png")
                .required_capability(),
            Capability::ImageToImage
        );
        let clip = AssetRequest::new("ep", Some(2), AssetType::VideoClip, "b", "m", "p");
        assert_eq!(clip.required_capability(), Capability::ImageToVideo);
        assert_eq!(
            clip.with_capability(Capability::LipSync).required_capability(),
            Capability::LipSync
        );
    }

    #[test]
    fn test_validate_rejects_bad_slug() {
        let mut request = hero("p");
        request.episode = "Best Air Fryers".to_string();
        assert!(matches!(
            request.validate(),
            Err(AssetError::InvalidSlug(_))
        ));
    }

    #[test]
    fn test_validate_rank_bounds() {
        let mut request = hero("p");
        request.rank = Some(6);
        assert_eq!(request.validate(), Err(AssetError::InvalidRank(6)));
        request.rank = Some(0);
        assert_eq!(request.validate(), Err(AssetError::InvalidRank(0)));
        request.rank = None;
        assert!(matches!(
            request.validate(),
            Err(AssetError::MissingRank { .. })
        ));
    }

    #[test]
    fn test_validate_empty_prompt() {
        assert_eq!(
            hero("  ").validate(),
            Err(AssetError::MissingField("prompt"))
        );
    }

    #[test]
    fn test_asset_type_serde_is_kebab_case() {
        let json = serde_json::to_string(&AssetType::ProductHero).unwrap();
        assert_eq!(json, "\"product-hero\"");
        let parsed: AssetType = serde_json::from_str("\"avatar-frame\"").unwrap();
        assert_eq!(parsed, AssetType::AvatarFrame);
        assert!(serde_json::from_str::<AssetType>("\"hologram\"").is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Blocking > Priority::Normal);
        assert_eq!(Priority::from_i64(Priority::Blocking.as_i64()), Priority::Blocking);
    }

    #[test]
    fn test_artifact_expiry() {
        let now = Utc::now();
        let artifact = Artifact::new("https://cdn/x.png", "api")
            .with_expiry(now - chrono::Duration::seconds(1));
        assert!(artifact.is_expired(now));
        assert!(!Artifact::new("https://cdn/x.png", "api").is_expired(now));
    }
}
