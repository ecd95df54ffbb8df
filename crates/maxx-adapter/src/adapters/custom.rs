//! Custom: a plain HTTP endpoint that speaks the client's dialect
//! natively for whichever client types it declares.

use async_trait::async_trait;
use bytes::Bytes;

use maxx_common::{ClientType, CustomConfig, ProviderConfig, ProviderType};

use crate::canonical::{CanonicalRequest, Dialect, Payload};
use crate::{Adapter, AdapterError, AdapterResult, PreparedRequest};

pub struct CustomAdapter;

impl CustomAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CustomAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for CustomAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Custom
    }

    fn accepts(&self, config: &ProviderConfig, client_type: ClientType) -> bool {
        match config {
            ProviderConfig::Custom(config) => config.base_url_for(client_type).is_some(),
            _ => false,
        }
    }

    fn prepare_upstream_request(
        &self,
        config: &ProviderConfig,
        req: &CanonicalRequest,
    ) -> AdapterResult<PreparedRequest> {
        let ProviderConfig::Custom(config) = config else {
            return Err(AdapterError::InvalidConfig("not a custom config".into()));
        };
        if !config.allows_model(&req.model) {
            return Err(AdapterError::Other(format!(
                "model {} not in allow-list",
                req.model
            )));
        }
        let base = config
            .base_url_for(req.client_type)
            .ok_or(AdapterError::Unsupported("client type has no base url"))?
            .trim_end_matches('/')
            .to_string();

        let (url, body, dialect) = match &req.payload {
            Payload::ClaudeMessages(claude_req) => (
                format!("{base}/v1/messages"),
                encode(claude_req)?,
                Dialect::Claude,
            ),
            Payload::ClaudeCountTokens(count_req) => (
                format!("{base}/v1/messages/count_tokens"),
                encode(count_req)?,
                Dialect::Claude,
            ),
            Payload::OpenAIChat(chat_req) => (
                format!("{base}/v1/chat/completions"),
                encode(chat_req)?,
                Dialect::OpenAIChat,
            ),
            Payload::Codex(codex_req) => (
                format!("{base}/responses"),
                encode(codex_req)?,
                Dialect::Codex,
            ),
            Payload::GeminiGenerate(gemini_req) => {
                let method = if req.stream {
                    "streamGenerateContent"
                } else {
                    "generateContent"
                };
                (
                    format!("{base}/v1beta/models/{}:{method}", req.model),
                    encode(gemini_req)?,
                    Dialect::Gemini,
                )
            }
        };

        let mut http = crate::http::UpstreamRequest::post_json(url, body, req.stream);
        if let (Some(name), Some(value)) = (&config.auth_header, &config.auth_value) {
            http = http.header(name, value.clone());
        }
        if req.client_type == ClientType::Claude {
            http = http.header("anthropic-version", "2023-06-01");
        }

        Ok(PreparedRequest {
            http,
            upstream_dialect: dialect,
        })
    }
}

fn encode<T: serde::Serialize>(value: &T) -> AdapterResult<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|err| AdapterError::Translate(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use maxx_common::ClientBaseUrl;

    fn config() -> ProviderConfig {
        ProviderConfig::Custom(CustomConfig {
            base_url: Some("https://llm.internal.example".into()),
            client_base_urls: vec![ClientBaseUrl {
                client_type: ClientType::Gemini,
                base_url: "https://gemini.internal.example".into(),
            }],
            auth_header: Some("x-api-key".into()),
            auth_value: Some("sekrit".into()),
            model_allowlist: vec!["claude-sonnet-4-5".into()],
        })
    }

    #[test]
    fn per_client_base_url_and_auth_header_applied() {
        let adapter = CustomAdapter::new();
        let req: maxx_protocol::gemini::GenerateContentRequest =
            serde_json::from_value(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
            }))
            .unwrap();
        let canonical = CanonicalRequest::from_gemini(req, "claude-sonnet-4-5", true, None);
        let prepared = adapter.prepare_upstream_request(&config(), &canonical).unwrap();
        assert!(prepared
            .http
            .url
            .starts_with("https://gemini.internal.example/v1beta/models/"));
        assert!(prepared.http.url.ends_with(":streamGenerateContent"));
        assert!(prepared
            .http
            .headers
            .iter()
            .any(|(name, value)| name == "x-api-key" && value == "sekrit"));
    }

    #[test]
    fn allowlist_blocks_unlisted_models() {
        let adapter = CustomAdapter::new();
        let req: maxx_protocol::claude::CreateMessageRequest =
            serde_json::from_value(serde_json::json!({
                "model": "claude-opus-4",
                "max_tokens": 16,
                "messages": [{"role": "user", "content": "hi"}]
            }))
            .unwrap();
        let canonical = CanonicalRequest::from_claude(req, None);
        assert!(adapter.prepare_upstream_request(&config(), &canonical).is_err());
    }
}
