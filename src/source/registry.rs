//! Provider lookup by URL.

use super::Provider;
use crate::error::{Error, Result};
use regex::Regex;
use std::sync::Arc;

struct Registered {
    pattern: Regex,
    provider: Arc<dyn Provider>,
}

/// Ordered set of providers; the first whose pattern matches a URL wins
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Registered>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider after the already registered ones
    ///
    /// Fails with [`Error::Config`] if the provider's URL pattern is not a valid regex.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Result<()> {
        let pattern = Regex::new(provider.url_pattern()).map_err(|e| Error::Config {
            message: format!("invalid URL pattern for provider {}: {}", provider.name(), e),
            key: Some("url_pattern".to_string()),
        })?;

        tracing::debug!(provider = provider.name(), pattern = %pattern, "Provider registered");
        self.providers.push(Registered { pattern, provider });
        Ok(())
    }

    /// Builder form of [`Self::register`]
    pub fn with(mut self, provider: Arc<dyn Provider>) -> Result<Self> {
        self.register(provider)?;
        Ok(self)
    }

    /// Provider responsible for `url`
    pub fn provider_for(&self, url: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|r| r.pattern.is_match(url))
            .map(|r| Arc::clone(&r.provider))
            .ok_or_else(|| Error::UnsupportedSource(url.to_string()))
    }

    /// Names of the registered providers, in lookup order
    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|r| r.provider.name()).collect()
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider is registered
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
