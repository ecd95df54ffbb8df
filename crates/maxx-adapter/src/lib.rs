//! Adapter registry: one client per provider type, encapsulating wire
//! dialect, payload translation, streaming parse, failure classification,
//! and credential lifecycle.

pub mod adapters;
pub mod canonical;
pub mod classify;
pub mod http;
pub mod oauth;
pub mod translate;

pub use canonical::{CanonicalRequest, Dialect, Payload};
pub use classify::{Disposition, UpstreamFailure, default_classify, parse_retry_after};
pub use http::{HttpClient, UpstreamBody, UpstreamRequest, UpstreamResponse};
pub use translate::{NonStreamOutput, ResponseTranslator, translate_nonstream};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use maxx_common::{ClientType, ProviderConfig, ProviderType, QuotaSnapshot};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("invalid provider config: {0}")]
    InvalidConfig(String),
    #[error("credential expired or missing: {0}")]
    Credential(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("translation error: {0}")]
    Translate(String),
    #[error("{0}")]
    Other(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

impl From<maxx_transform::TransformError> for AdapterError {
    fn from(err: maxx_transform::TransformError) -> Self {
        AdapterError::Translate(err.to_string())
    }
}

/// Upstream HTTP call plus the dialect its response will speak.
#[derive(Debug)]
pub struct PreparedRequest {
    pub http: UpstreamRequest,
    pub upstream_dialect: Dialect,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Whether this provider can serve a client type at all (before any
    /// per-route configuration).
    fn accepts(&self, config: &ProviderConfig, client_type: ClientType) -> bool;

    /// Build the signed upstream request, translating the payload when
    /// the provider's native dialect differs from the client's.
    fn prepare_upstream_request(
        &self,
        config: &ProviderConfig,
        req: &CanonicalRequest,
    ) -> AdapterResult<PreparedRequest>;

    /// Classify an upstream failure into a routing decision.
    fn classify_error(&self, failure: &UpstreamFailure) -> Disposition {
        default_classify(failure)
    }

    /// Exchange the refresh token; a returned config must be persisted by
    /// the caller (the refresh token itself may have rotated).
    async fn refresh_credentials(
        &self,
        _http: &HttpClient,
        _config: &ProviderConfig,
    ) -> AdapterResult<Option<ProviderConfig>> {
        Ok(None)
    }

    async fn fetch_quota(
        &self,
        _http: &HttpClient,
        _config: &ProviderConfig,
    ) -> AdapterResult<QuotaSnapshot> {
        Err(AdapterError::Unsupported("quota"))
    }
}

/// Adapter choice is fixed per provider type and cached here.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: Arc<HashMap<ProviderType, Arc<dyn Adapter>>>,
}

impl AdapterRegistry {
    pub fn with_defaults() -> Self {
        let mut adapters: HashMap<ProviderType, Arc<dyn Adapter>> = HashMap::new();
        adapters.insert(
            ProviderType::Antigravity,
            Arc::new(adapters::antigravity::AntigravityAdapter::new()),
        );
        adapters.insert(
            ProviderType::Codex,
            Arc::new(adapters::codex::CodexAdapter::new()),
        );
        adapters.insert(ProviderType::Kiro, Arc::new(adapters::kiro::KiroAdapter::new()));
        adapters.insert(
            ProviderType::Custom,
            Arc::new(adapters::custom::CustomAdapter::new()),
        );
        Self {
            adapters: Arc::new(adapters),
        }
    }

    pub fn get(&self, provider_type: ProviderType) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(&provider_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_provider_type() {
        let registry = AdapterRegistry::with_defaults();
        for provider_type in [
            ProviderType::Antigravity,
            ProviderType::Codex,
            ProviderType::Kiro,
            ProviderType::Custom,
        ] {
            assert!(registry.get(provider_type).is_some());
        }
    }
}
