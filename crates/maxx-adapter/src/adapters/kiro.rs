//! Kiro: AWS-account-backed provider that accepts only the Claude
//! dialect.

use async_trait::async_trait;
use bytes::Bytes;

use maxx_common::{ClientType, KiroConfig, ProviderConfig, ProviderType};

use super::{token_is_fresh, unix_now};
use crate::canonical::{CanonicalRequest, Dialect, Payload};
use crate::http::{HttpClient, UpstreamBody, UpstreamRequest};
use crate::{Adapter, AdapterError, AdapterResult, PreparedRequest};

const DEFAULT_REGION: &str = "us-east-1";

pub struct KiroAdapter;

impl KiroAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KiroAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn base_url(config: &KiroConfig) -> String {
    let region = config.region.as_deref().unwrap_or(DEFAULT_REGION);
    format!("https://codewhisperer.{region}.amazonaws.com")
}

fn refresh_url(config: &KiroConfig) -> String {
    let region = config.region.as_deref().unwrap_or(DEFAULT_REGION);
    format!("https://prod.{region}.auth.desktop.kiro.dev/refreshToken")
}

#[async_trait]
impl Adapter for KiroAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Kiro
    }

    fn accepts(&self, _config: &ProviderConfig, client_type: ClientType) -> bool {
        client_type == ClientType::Claude
    }

    fn prepare_upstream_request(
        &self,
        config: &ProviderConfig,
        req: &CanonicalRequest,
    ) -> AdapterResult<PreparedRequest> {
        let ProviderConfig::Kiro(config) = config else {
            return Err(AdapterError::InvalidConfig("not a kiro config".into()));
        };
        let access_token = config
            .access_token
            .as_deref()
            .ok_or_else(|| AdapterError::Credential("no access token".into()))?;

        let (path, body) = match &req.payload {
            Payload::ClaudeMessages(claude_req) => (
                "/v1/messages",
                serde_json::to_vec(claude_req)
                    .map_err(|err| AdapterError::Translate(err.to_string()))?,
            ),
            Payload::ClaudeCountTokens(count_req) => (
                "/v1/messages/count_tokens",
                serde_json::to_vec(count_req)
                    .map_err(|err| AdapterError::Translate(err.to_string()))?,
            ),
            _ => return Err(AdapterError::Unsupported("kiro accepts only claude dialect")),
        };

        let http = UpstreamRequest::post_json(
            format!("{}{path}", base_url(config)),
            Bytes::from(body),
            req.stream,
        )
        .bearer(access_token)
        .header("anthropic-version", "2023-06-01");

        Ok(PreparedRequest {
            http,
            upstream_dialect: Dialect::Claude,
        })
    }

    async fn refresh_credentials(
        &self,
        http: &HttpClient,
        config: &ProviderConfig,
    ) -> AdapterResult<Option<ProviderConfig>> {
        let ProviderConfig::Kiro(config) = config else {
            return Err(AdapterError::InvalidConfig("not a kiro config".into()));
        };
        let now = unix_now();
        if token_is_fresh(config.access_token_expires_at, now) {
            return Ok(None);
        }

        let body = serde_json::json!({"refreshToken": config.refresh_token});
        let request = UpstreamRequest::post_json(
            refresh_url(config),
            Bytes::from(serde_json::to_vec(&body).unwrap_or_default()),
            false,
        );
        let response = http.execute(request).await?;
        let UpstreamBody::Bytes(bytes) = response.body else {
            return Err(AdapterError::Other("unexpected streaming token response".into()));
        };
        if !(200..300).contains(&response.status) {
            return Err(AdapterError::Credential(format!(
                "refresh failed with status {}",
                response.status
            )));
        }
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|err| AdapterError::Credential(err.to_string()))?;
        let access_token = value
            .get("accessToken")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::Credential("no accessToken in response".into()))?;

        let mut updated = KiroConfig {
            access_token: Some(access_token.to_string()),
            access_token_expires_at: Some(
                now + value.get("expiresIn").and_then(|v| v.as_i64()).unwrap_or(3_600),
            ),
            ..config.clone()
        };
        if let Some(rotated) = value.get("refreshToken").and_then(|v| v.as_str()) {
            updated.refresh_token = rotated.to_string();
        }
        Ok(Some(ProviderConfig::Kiro(updated)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_only() {
        let adapter = KiroAdapter::new();
        let config = ProviderConfig::Kiro(KiroConfig::default());
        assert!(adapter.accepts(&config, ClientType::Claude));
        assert!(!adapter.accepts(&config, ClientType::OpenAI));
        assert!(!adapter.accepts(&config, ClientType::Gemini));
        assert!(!adapter.accepts(&config, ClientType::Codex));
    }

    #[test]
    fn region_shapes_urls() {
        let config = KiroConfig {
            region: Some("eu-west-1".into()),
            ..Default::default()
        };
        assert_eq!(base_url(&config), "https://codewhisperer.eu-west-1.amazonaws.com");
        assert!(refresh_url(&config).contains("prod.eu-west-1"));
    }
}
