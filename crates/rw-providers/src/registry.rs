use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use rw_core::config::{Config, CredentialProvider, ProviderSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapter::ProviderAdapter;
use crate::anthropic::AnthropicAdapter;
use crate::gemini::GeminiAdapter;
use crate::ollama::OllamaAdapter;
use crate::openai::OpenAiAdapter;
use crate::pricing::{CostCalculator, ModelPrice};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("provider not found: `{0}`")]
    ProviderNotFound(String),
    #[error("provider `{0}` requires a credential")]
    MissingCredential(String),
}

// ---------------------------------------------------------------------------
// ProviderKind
// ---------------------------------------------------------------------------

/// The built-in backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::Ollama,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "gemini" | "google" => Some(Self::Gemini),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    /// Registry name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => crate::openai::NAME,
            Self::Anthropic => crate::anthropic::NAME,
            Self::Gemini => crate::gemini::NAME,
            Self::Ollama => crate::ollama::NAME,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => crate::openai::DEFAULT_BASE_URL,
            Self::Anthropic => crate::anthropic::DEFAULT_BASE_URL,
            Self::Gemini => crate::gemini::DEFAULT_BASE_URL,
            Self::Ollama => crate::ollama::DEFAULT_BASE_URL,
        }
    }

    /// Local servers run without auth.
    pub fn requires_credential(&self) -> bool {
        !matches!(self, Self::Ollama)
    }

    /// Construct an adapter. An empty credential is only accepted for
    /// backends that do not require one.
    pub fn build(
        &self,
        credential: &str,
        endpoint_override: Option<&str>,
    ) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        if credential.is_empty() && self.requires_credential() {
            return Err(RegistryError::MissingCredential(self.as_str().to_string()));
        }
        let endpoint = endpoint_override
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| self.default_base_url());
        let adapter: Arc<dyn ProviderAdapter> = match self {
            Self::OpenAi => Arc::new(OpenAiAdapter::new(credential).with_base_url(endpoint)),
            Self::Anthropic => Arc::new(AnthropicAdapter::new(credential).with_base_url(endpoint)),
            Self::Gemini => Arc::new(GeminiAdapter::new(credential).with_base_url(endpoint)),
            Self::Ollama => Arc::new(
                OllamaAdapter::new(Some(credential.to_string())).with_base_url(endpoint),
            ),
        };
        Ok(adapter)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ProviderRegistry
// ---------------------------------------------------------------------------

/// Name-keyed adapters plus the shared price table.
///
/// Populated at startup and read concurrently afterwards. Registering an
/// adapter merges its catalog pricing into the [`CostCalculator`];
/// re-registering a name replaces the previous adapter.
pub struct ProviderRegistry {
    adapters: DashMap<String, Arc<dyn ProviderAdapter>>,
    pricing: Arc<CostCalculator>,
}

impl ProviderRegistry {
    /// Empty registry with the built-in price table.
    pub fn new() -> Self {
        Self::with_pricing(Arc::new(CostCalculator::with_defaults()))
    }

    pub fn with_pricing(pricing: Arc<CostCalculator>) -> Self {
        Self {
            adapters: DashMap::new(),
            pricing,
        }
    }

    /// Register every enabled backend from config. Backends that need a key
    /// are skipped when their env var is unset. `[[pricing]]` overrides are
    /// applied last.
    pub fn from_config(config: &Config) -> Self {
        let registry = Self::new();
        for (name, settings) in config.providers.entries() {
            if !settings.enabled {
                debug!(provider = name, "provider disabled in config");
                continue;
            }
            let Some(kind) = ProviderKind::from_name(name) else {
                continue;
            };
            match Self::adapter_from_settings(kind, settings) {
                Ok(adapter) => registry.register(adapter),
                Err(e) => warn!(provider = name, error = %e, "provider not registered"),
            }
        }
        for p in &config.pricing {
            registry
                .pricing
                .set_price(p.model.clone(), ModelPrice::new(p.input_per_1k, p.output_per_1k));
        }
        info!(providers = ?registry.list(), "provider registry ready");
        registry
    }

    fn adapter_from_settings(
        kind: ProviderKind,
        settings: &ProviderSettings,
    ) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        let key = CredentialProvider::api_key(settings).unwrap_or_default();
        kind.build(&key, settings.base_url.as_deref())
    }

    pub fn register(&self, adapter: Arc<dyn ProviderAdapter>) {
        let name = adapter.name().to_string();
        self.pricing.merge_catalog(&adapter.catalog());
        if self.adapters.insert(name.clone(), adapter).is_some() {
            debug!(provider = %name, "replaced provider adapter");
        } else {
            debug!(provider = %name, "registered provider adapter");
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        self.adapters
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::ProviderNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    /// Registered names, in no particular order.
    pub fn list(&self) -> Vec<String> {
        self.adapters.iter().map(|e| e.key().clone()).collect()
    }

    /// Build an unregistered adapter bound to a caller-supplied credential.
    /// The credential lives only as long as the returned adapter.
    pub fn create_provider_with_key(
        &self,
        provider_id: &str,
        credential: &str,
        endpoint_override: Option<&str>,
    ) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        let kind = ProviderKind::from_name(provider_id)
            .ok_or_else(|| RegistryError::ProviderNotFound(provider_id.to_string()))?;
        kind.build(credential, endpoint_override)
    }

    pub fn pricing(&self) -> &Arc<CostCalculator> {
        &self.pricing
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
