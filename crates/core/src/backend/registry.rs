//! Name-indexed set of configured backends.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::asset::Capability;
use crate::config::{BackendConfig, Config};

use super::{
    AdapterError, ApiBackend, BackendKind, BrowserBackend, GenerationBackend, HttpBrowserDriver,
};

/// All backends available to the orchestrator.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn GenerationBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every backend in the configuration.
    ///
    /// Missing sections or credentials are reported as `Misconfigured`.
    pub fn from_config(config: &Config) -> Result<Self, AdapterError> {
        let mut registry = Self::new();
        for backend in &config.backends {
            registry.register(build_backend(backend, config.storage.artifact_ttl_hours)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, backend: Arc<dyn GenerationBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn with_backend(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerationBackend>> {
        self.backends.get(name).cloned()
    }

    /// Backend names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Check that `name` exists and offers `capability`.
    pub fn check(&self, name: &str, capability: Capability) -> Result<(), AdapterError> {
        let backend = self
            .get(name)
            .ok_or_else(|| AdapterError::misconfigured(format!("unknown backend '{}'", name)))?;
        if !backend.supports(capability) {
            return Err(AdapterError::misconfigured(format!(
                "backend '{}' does not offer {}",
                name, capability
            )));
        }
        Ok(())
    }
}

fn build_backend(
    config: &BackendConfig,
    artifact_ttl_hours: u64,
) -> Result<Arc<dyn GenerationBackend>, AdapterError> {
    match config.kind {
        BackendKind::Browser => {
            let browser = config.browser.as_ref().ok_or_else(|| {
                AdapterError::misconfigured(format!(
                    "backend '{}' has no [browser] section",
                    config.name
                ))
            })?;
            let driver = Arc::new(HttpBrowserDriver::new(browser)?);
            Ok(Arc::new(BrowserBackend::new(config, driver)?))
        }
        BackendKind::Api => Ok(Arc::new(ApiBackend::new(config, artifact_ttl_hours)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockBackend};

    #[test]
    fn test_from_config_builds_each_kind() {
        let config = Config {
            backends: vec![
                fixtures::browser_backend_config("dzine"),
                fixtures::api_backend_config("kling", "https://api.example.com"),
            ],
            ..fixtures::test_config()
        };
        let registry = BackendRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["dzine", "kling"]);
        assert_eq!(registry.get("kling").unwrap().kind(), BackendKind::Api);
    }

    #[test]
    fn test_from_config_missing_section() {
        let mut backend = fixtures::browser_backend_config("dzine");
        backend.browser = None;
        let config = Config {
            backends: vec![backend],
            ..fixtures::test_config()
        };
        assert!(matches!(
            BackendRegistry::from_config(&config),
            Err(AdapterError::Misconfigured { .. })
        ));
    }

    #[test]
    fn test_check_capability() {
        let registry = BackendRegistry::new().with_backend(Arc::new(
            MockBackend::new("dzine").with_capabilities(vec![Capability::TextToImage]),
        ));
        assert!(registry.check("dzine", Capability::TextToImage).is_ok());
        assert!(registry.check("dzine", Capability::LipSync).is_err());
        assert!(registry.check("nope", Capability::TextToImage).is_err());
    }
}
