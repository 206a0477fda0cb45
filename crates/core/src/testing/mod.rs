//! Testing utilities and mock implementations.
//!
//! Mocks stand in for every external collaborator so the orchestrator can
//! be exercised end to end without a browser, a generation API or a disk.
//!
//! ```rust,ignore
//! use reelforge_core::testing::{fixtures, MockArtifactStore, MockBackend};
//!
//! let backend = MockBackend::new("dzine");
//! backend.push_error(AdapterError::rate_limited(None)).await;
//! ```

mod mock_artifact_store;
mod mock_backend;
mod mock_browser_driver;

pub use mock_artifact_store::MockArtifactStore;
pub use mock_backend::{MockBackend, RecordedInvocation};
pub use mock_browser_driver::MockBrowserDriver;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;
    use serde_json::json;

    use crate::asset::{AssetRequest, AssetSpec, AssetType, EpisodePlan, Priority, Product};
    use crate::backend::BackendKind;
    use crate::config::{
        ApiBackendConfig, BackendConfig, BrowserBackendConfig, Config, DatabaseConfig,
        ServerConfig, StorageConfig,
    };
    use crate::gate::{GateConfig, ScoreInputs};
    use crate::job::{Job, JobState};
    use crate::orchestrator::OrchestratorConfig;
    use crate::retry::{CircuitBreakerConfig, RetryConfig};

    /// A product-hero request for `rank`, or a thumbnail when `rank` is None.
    /// Both target the "dzine" backend.
    pub fn asset_request(episode: &str, rank: Option<u8>) -> AssetRequest {
        match rank {
            Some(rank) => AssetRequest::new(
                episode,
                Some(rank),
                AssetType::ProductHero,
                "dzine",
                "flux-pro",
                format!("studio hero shot of product #{}", rank),
            ),
            None => AssetRequest::new(
                episode,
                None,
                AssetType::Thumbnail,
                "dzine",
                "flux-pro",
                "bold thumbnail with the top pick",
            ),
        }
    }

    /// A queued job for `request` at queue position `seq`.
    pub fn job(request: AssetRequest, seq: i64) -> Job {
        let now = Utc::now();
        Job {
            id: uuid::Uuid::new_v4().to_string(),
            dedup_key: request.dedup_key().to_string(),
            request,
            state: JobState::Queued,
            attempts: 0,
            last_attempt_at: None,
            queue_seq: seq,
            retry_of: None,
            cancel_requested: false,
            attempt_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A job dispatched for its `attempt`-th attempt.
    pub fn dispatched_job(request: AssetRequest, attempt: u32) -> Job {
        let mut job = job(request, 1);
        job.attempts = attempt;
        job.last_attempt_at = Some(Utc::now());
        job.state = JobState::Dispatched {
            dispatched_at: Utc::now(),
            submission_key: job.submission_key(),
        };
        job
    }

    pub fn browser_backend_config(name: &str) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            kind: BackendKind::Browser,
            capabilities: vec![
                crate::asset::Capability::TextToImage,
                crate::asset::Capability::ImageToImage,
            ],
            timeout_secs: 600,
            credits_per_call: 4,
            browser: Some(BrowserBackendConfig {
                driver_url: "http://127.0.0.1:9333".to_string(),
                target_url: "https://studio.example.com/canvas".to_string(),
                actions: vec![
                    json!({"op": "fill", "selector": "#prompt", "value": "{prompt}"}),
                    json!({"op": "select", "selector": "#model", "value": "{model}"}),
                    json!({"op": "click", "selector": "#generate"}),
                    json!({"op": "wait_download", "timeout_secs": 300}),
                ],
                request_timeout_secs: 30,
            }),
            api: None,
        }
    }

    pub fn api_backend_config(name: &str, base_url: &str) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            kind: BackendKind::Api,
            capabilities: vec![
                crate::asset::Capability::TextToImage,
                crate::asset::Capability::ImageToVideo,
            ],
            timeout_secs: 900,
            credits_per_call: 10,
            browser: None,
            api: Some(ApiBackendConfig {
                base_url: base_url.to_string(),
                api_key: "test-key".to_string(),
                style_code: Some("product-photo".to_string()),
                structure_match: 0.7,
                seed: None,
                poll_interval_ms: 10,
            }),
        }
    }

    /// A valid configuration with one browser backend named "dzine".
    pub fn test_config() -> Config {
        Config {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            quality_gate: GateConfig::default(),
            backends: vec![browser_backend_config("dzine")],
        }
    }

    /// A two-product plan: a hero per product plus a blocking thumbnail.
    pub fn episode_plan(slug: &str) -> EpisodePlan {
        EpisodePlan {
            slug: slug.to_string(),
            products: vec![
                Product {
                    rank: 1,
                    name: "Crispwave XL".to_string(),
                },
                Product {
                    rank: 2,
                    name: "AirChef Mini".to_string(),
                },
            ],
            assets: vec![
                AssetSpec {
                    asset_type: AssetType::ProductHero,
                    rank: Some(1),
                    backend: "dzine".to_string(),
                    model: "flux-pro".to_string(),
                    prompt: "hero shot of {product}".to_string(),
                    reference_image: None,
                    capability: None,
                    priority: Priority::Normal,
                },
                AssetSpec {
                    asset_type: AssetType::ProductHero,
                    rank: Some(2),
                    backend: "dzine".to_string(),
                    model: "flux-pro".to_string(),
                    prompt: "hero shot of {product}".to_string(),
                    reference_image: None,
                    capability: None,
                    priority: Priority::Normal,
                },
                AssetSpec {
                    asset_type: AssetType::Thumbnail,
                    rank: None,
                    backend: "dzine".to_string(),
                    model: "flux-pro".to_string(),
                    prompt: "thumbnail ranking the best picks".to_string(),
                    reference_image: None,
                    capability: None,
                    priority: Priority::Blocking,
                },
            ],
        }
    }

    /// Scores with every sub-score at `score` and no hard-fail.
    pub fn score_inputs(score: f64) -> ScoreInputs {
        ScoreInputs {
            revision: 1,
            content_accuracy: score,
            compliance: score,
            asset_completeness: score,
            disclosure_present: true,
            affiliate_links_resolved: true,
            unsourced_claims: 0,
        }
    }
}
