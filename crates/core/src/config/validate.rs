use std::collections::HashSet;

use super::{types::Config, ConfigError};
use crate::backend::BackendKind;

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Retry and circuit breaker bounds
/// - Quality gate threshold and weights
/// - Backends: unique names, capabilities, kind-specific section, credentials
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be at least 1"));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(invalid(format!(
            "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
            retry.base_delay_ms, retry.max_delay_ms
        )));
    }

    if config.circuit_breaker.failure_threshold == 0 {
        return Err(invalid("circuit_breaker.failure_threshold must be at least 1"));
    }

    config
        .quality_gate
        .validate()
        .map_err(|e| invalid(format!("quality_gate: {}", e)))?;

    let mut names = HashSet::new();
    for backend in &config.backends {
        let name = backend.name.trim();
        if name.is_empty() {
            return Err(invalid("backends[].name cannot be empty"));
        }
        if !names.insert(name) {
            return Err(invalid(format!("duplicate backend name '{}'", name)));
        }
        if backend.capabilities.is_empty() {
            return Err(invalid(format!("backend '{}' declares no capabilities", name)));
        }
        if backend.timeout_secs == 0 {
            return Err(invalid(format!("backend '{}' timeout_secs cannot be 0", name)));
        }

        match backend.kind {
            BackendKind::Browser => {
                let browser = backend.browser.as_ref().ok_or_else(|| {
                    invalid(format!("backend '{}' is kind browser but has no [browser] section", name))
                })?;
                if browser.driver_url.trim().is_empty() {
                    return Err(invalid(format!("backend '{}' browser.driver_url is empty", name)));
                }
            }
            BackendKind::Api => {
                let api = backend.api.as_ref().ok_or_else(|| {
                    invalid(format!("backend '{}' is kind api but has no [api] section", name))
                })?;
                if api.base_url.trim().is_empty() {
                    return Err(invalid(format!("backend '{}' api.base_url is empty", name)));
                }
                if api.api_key.trim().is_empty() {
                    return Err(invalid(format!("backend '{}' api.api_key is empty", name)));
                }
                if !(0.0..=1.0).contains(&api.structure_match) {
                    return Err(invalid(format!(
                        "backend '{}' api.structure_match must be within 0.0-1.0",
                        name
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn config(toml: &str) -> Config {
        load_config_from_str(toml).unwrap()
    }

    const API_BACKEND: &str = r#"
[[backends]]
name = "kling"
kind = "api"
capabilities = ["image-to-video"]

[backends.api]
base_url = "https://api.example.com/v1"
api_key = "sk-test"
"#;

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&config(API_BACKEND)).is_ok());
        assert!(validate_config(&config("")).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let result = validate_config(&config("[server]\nport = 0\n"));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_missing_api_key() {
        let toml = API_BACKEND.replace("sk-test", "");
        let err = validate_config(&config(&toml)).unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn test_validate_missing_kind_section() {
        let toml = r#"
[[backends]]
name = "dzine"
kind = "browser"
capabilities = ["text-to-image"]
"#;
        let err = validate_config(&config(toml)).unwrap_err();
        assert!(err.to_string().contains("[browser]"));
    }

    #[test]
    fn test_validate_duplicate_backend_names() {
        let toml = format!("{}{}", API_BACKEND, API_BACKEND);
        let err = validate_config(&config(&toml)).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validate_retry_bounds() {
        let err = validate_config(&config("[retry]\nmax_attempts = 0\n")).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));

        let err = validate_config(&config(
            "[retry]\nbase_delay_ms = 10000\nmax_delay_ms = 1000\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("base_delay_ms"));
    }

    #[test]
    fn test_validate_gate_weights() {
        let toml = r#"
[quality_gate.weights]
content_accuracy = 0.5
compliance = 0.5
asset_completeness = 0.5
"#;
        assert!(validate_config(&config(toml)).is_err());
    }
}
