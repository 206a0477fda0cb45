use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::asset::Capability;
use crate::backend::BackendKind;
use crate::gate::GateConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::retry::{CircuitBreakerConfig, RetryConfig};

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub quality_gate: GateConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

impl Config {
    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("reelforge.db")
}

/// Artifact storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory for persisted artifacts.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// How long backend-hosted outputs stay downloadable (default: 7 days).
    #[serde(default = "default_artifact_ttl_hours")]
    pub artifact_ttl_hours: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            artifact_ttl_hours: default_artifact_ttl_hours(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_artifact_ttl_hours() -> u64 {
    168
}

/// One generation backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Name referenced by asset requests.
    pub name: String,
    pub kind: BackendKind,
    pub capabilities: Vec<Capability>,
    /// Maximum duration of one invocation in seconds (default: 600)
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
    /// Credits charged per successful call when the backend does not report them.
    #[serde(default)]
    pub credits_per_call: u32,
    /// Browser automation settings (required when kind = "browser")
    #[serde(default)]
    pub browser: Option<BrowserBackendConfig>,
    /// REST API settings (required when kind = "api")
    #[serde(default)]
    pub api: Option<ApiBackendConfig>,
}

fn default_backend_timeout() -> u64 {
    600
}

/// Browser automation backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserBackendConfig {
    /// Automation driver sidecar URL (e.g., "http://localhost:9333")
    pub driver_url: String,
    /// Page the driver opens before running the actions.
    pub target_url: String,
    /// Opaque action script; string values may contain `{prompt}`, `{model}`,
    /// `{reference_image}` and `{submission_key}` placeholders.
    #[serde(default)]
    pub actions: Vec<serde_json::Value>,
    /// Request timeout for driver lookups in seconds (default: 30)
    #[serde(default = "default_driver_timeout")]
    pub request_timeout_secs: u64,
}

fn default_driver_timeout() -> u64 {
    30
}

/// REST generation API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiBackendConfig {
    /// API base URL (e.g., "https://api.example.com/v1")
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub style_code: Option<String>,
    /// How closely outputs follow the reference image (0.0-1.0, default: 0.7)
    #[serde(default = "default_structure_match")]
    pub structure_match: f32,
    /// Fixed seed; derived from the dedup key when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Task status poll interval in milliseconds (default: 2000)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_structure_match() -> f32 {
    0.7
}

fn default_poll_interval() -> u64 {
    2000
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub orchestrator: OrchestratorConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub quality_gate: GateConfig,
    pub backends: Vec<SanitizedBackendConfig>,
}

/// Sanitized backend config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedBackendConfig {
    pub name: String,
    pub kind: String,
    pub capabilities: Vec<Capability>,
    pub timeout_secs: u64,
    pub credits_per_call: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub api_key_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            storage: config.storage.clone(),
            orchestrator: config.orchestrator.clone(),
            retry: config.retry.clone(),
            circuit_breaker: config.circuit_breaker.clone(),
            quality_gate: config.quality_gate.clone(),
            backends: config
                .backends
                .iter()
                .map(|b| SanitizedBackendConfig {
                    name: b.name.clone(),
                    kind: b.kind.as_str().to_string(),
                    capabilities: b.capabilities.clone(),
                    timeout_secs: b.timeout_secs,
                    credits_per_call: b.credits_per_call,
                    driver_url: b.browser.as_ref().map(|br| br.driver_url.clone()),
                    base_url: b.api.as_ref().map(|api| api.base_url.clone()),
                    api_key_configured: b
                        .api
                        .as_ref()
                        .map(|api| !api.api_key.is_empty())
                        .unwrap_or(false),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r##"
[server]
host = "0.0.0.0"
port = 9000

[storage]
root = "/srv/artifacts"

[retry]
max_attempts = 5

[[backends]]
name = "dzine"
kind = "browser"
capabilities = ["text-to-image", "image-to-image"]

[backends.browser]
driver_url = "http://localhost:9333"
target_url = "https://www.dzine.ai/canvas"
actions = [{ op = "fill", selector = "#prompt", value = "{prompt}" }]

[[backends]]
name = "kling"
kind = "api"
capabilities = ["image-to-video"]
timeout_secs = 900

[backends.api]
base_url = "https://api.example.com/v1"
api_key = "sk-secret"
style_code = "Style-7"
"##;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.database.path.to_str().unwrap(), "reelforge.db");
        assert_eq!(config.storage.artifact_ttl_hours, 168);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.backends.is_empty());
    }

    #[test]
    fn test_deserialize_backends() {
        let config: Config = toml::from_str(FULL).unwrap();
        assert_eq!(config.backends.len(), 2);

        let dzine = config.backend("dzine").unwrap();
        assert_eq!(dzine.kind, BackendKind::Browser);
        assert_eq!(dzine.timeout_secs, 600);
        let browser = dzine.browser.as_ref().unwrap();
        assert_eq!(browser.actions.len(), 1);
        assert_eq!(browser.actions[0]["value"], "{prompt}");

        let kling = config.backend("kling").unwrap();
        assert_eq!(kling.capabilities, vec![Capability::ImageToVideo]);
        let api = kling.api.as_ref().unwrap();
        assert_eq!(api.poll_interval_ms, 2000);
        assert_eq!(api.structure_match, 0.7);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_sanitized_config_hides_api_key() {
        let config: Config = toml::from_str(FULL).unwrap();
        let sanitized = SanitizedConfig::from(&config);

        let kling = &sanitized.backends[1];
        assert!(kling.api_key_configured);
        assert_eq!(kling.base_url.as_deref(), Some("https://api.example.com/v1"));

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn test_unknown_backend_kind_fails() {
        let toml = r#"
[[backends]]
name = "x"
kind = "carrier-pigeon"
capabilities = []
"#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }
}
