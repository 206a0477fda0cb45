//! Episode manifests: required assets joined with their generation jobs.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobState};

use super::types::{Artifact, AssetRequest, AssetType};

/// One required asset and the job that best represents it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub dedup_key: String,
    pub asset_type: AssetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// State type of the job ("missing" when never enqueued).
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
}

impl ManifestEntry {
    pub fn is_succeeded(&self) -> bool {
        self.artifact.is_some()
    }
}

/// All assets an episode requires, with their current outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeManifest {
    pub episode: String,
    pub entries: Vec<ManifestEntry>,
}

impl EpisodeManifest {
    /// Join required requests with the episode's jobs.
    ///
    /// For each dedup key the succeeded job wins; otherwise the most recently
    /// created job is reported.
    pub fn build(episode: &str, required: &[AssetRequest], jobs: &[Job]) -> Self {
        let entries = required
            .iter()
            .map(|request| {
                let key = request.dedup_key();
                let mut candidates: Vec<&Job> =
                    jobs.iter().filter(|j| j.dedup_key == key.as_str()).collect();
                candidates.sort_by_key(|j| j.queue_seq);

                let succeeded = candidates
                    .iter()
                    .rev()
                    .find(|j| matches!(j.state, JobState::Succeeded { .. }));
                let chosen = succeeded.or(candidates.last());

                match chosen {
                    Some(job) => ManifestEntry {
                        dedup_key: key.to_string(),
                        asset_type: request.asset_type,
                        rank: request.rank,
                        job_id: Some(job.id.clone()),
                        state: job.state.state_type().to_string(),
                        artifact: match &job.state {
                            JobState::Succeeded { artifact, .. } => Some(artifact.clone()),
                            _ => None,
                        },
                    },
                    None => ManifestEntry {
                        dedup_key: key.to_string(),
                        asset_type: request.asset_type,
                        rank: request.rank,
                        job_id: None,
                        state: "missing".to_string(),
                        artifact: None,
                    },
                }
            })
            .collect();

        Self {
            episode: episode.to_string(),
            entries,
        }
    }

    /// True only when every required asset has a succeeded job.
    pub fn is_asset_complete(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(ManifestEntry::is_succeeded)
    }

    /// True when at least one visual asset has a persisted artifact.
    pub fn has_publishable_visual(&self) -> bool {
        self.entries.iter().any(|entry| {
            entry.asset_type.is_visual()
                && entry
                    .artifact
                    .as_ref()
                    .map(Artifact::is_persisted)
                    .unwrap_or(false)
        })
    }

    pub fn missing(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| !e.is_succeeded())
    }

    pub fn succeeded_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_succeeded()).count()
    }
}
