//! Episode plans: the operator-authored list of assets one episode needs.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::{validate_slug, AssetError, AssetRequest, AssetType, Capability, Priority};

/// A ranked product featured in the episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub rank: u8,
    pub name: String,
}

/// One asset to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSpec {
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u8>,
    pub backend: String,
    pub model: String,
    /// Prompt text. `{product}` expands to the product name of `rank`.
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<Capability>,
    #[serde(default)]
    pub priority: Priority,
}

/// Full asset plan for one episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodePlan {
    pub slug: String,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub assets: Vec<AssetSpec>,
}

/// Errors loading or expanding a plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("failed to read plan {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse plan: {0}")]
    Parse(String),

    #[error("invalid plan: {0}")]
    Invalid(#[from] AssetError),

    #[error("plan for '{0}' has no assets")]
    Empty(String),
}

impl EpisodePlan {
    pub fn from_toml_str(content: &str) -> Result<Self, PlanError> {
        toml::from_str(content).map_err(|e| PlanError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Expand the plan into validated asset requests, in plan order.
    pub fn requests(&self) -> Result<Vec<AssetRequest>, PlanError> {
        validate_slug(&self.slug)?;
        if self.assets.is_empty() {
            return Err(PlanError::Empty(self.slug.clone()));
        }

        let mut seen = HashSet::new();
        for product in &self.products {
            if !seen.insert(product.rank) {
                return Err(AssetError::DuplicateRank(product.rank).into());
            }
        }
        let names: HashMap<u8, &str> = self
            .products
            .iter()
            .map(|p| (p.rank, p.name.as_str()))
            .collect();

        let mut requests = Vec::with_capacity(self.assets.len());
        for spec in &self.assets {
            let prompt = match spec.rank {
                Some(rank) => {
                    let name = names.get(&rank).ok_or(AssetError::UnknownRank(rank))?;
                    spec.prompt.replace("{product}", name)
                }
                None => spec.prompt.clone(),
            };

            let request = AssetRequest {
                episode: self.slug.clone(),
                rank: spec.rank,
                asset_type: spec.asset_type,
                backend: spec.backend.clone(),
                model: spec.model.clone(),
                prompt,
                reference_image: spec.reference_image.clone(),
                capability: spec.capability,
                priority: spec.priority,
            };
            request.validate()?;
            requests.push(request);
        }
        Ok(requests)
    }
}
