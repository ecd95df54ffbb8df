//! Codex: ChatGPT-account-backed provider speaking only the Codex
//! (Responses) dialect.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use maxx_common::{ClientType, CodexConfig, ProviderConfig, ProviderType, QuotaSnapshot};

use super::{token_is_fresh, unix_now};
use crate::canonical::{CanonicalRequest, Dialect, Payload};
use crate::classify::{Disposition, UpstreamFailure, default_classify};
use crate::http::{HttpClient, UpstreamBody, UpstreamRequest};
use crate::oauth::{jwt_claim, refresh_openai_token};
use crate::{Adapter, AdapterError, AdapterResult, PreparedRequest};

const DEFAULT_BASE_URL: &str = "https://chatgpt.com/backend-api/codex";
const TOKEN_URL: &str = "https://auth.openai.com/oauth/token";
const CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
const CLIENT_VERSION: &str = "0.99.0";
/// Fallback cooldown when a 429 carries no Retry-After: the primary
/// usage window is 5 hours; half an hour keeps probes cheap.
const RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(30 * 60);

pub struct CodexAdapter;

impl CodexAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for CodexAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Codex
    }

    fn accepts(&self, _config: &ProviderConfig, client_type: ClientType) -> bool {
        client_type == ClientType::Codex
    }

    fn prepare_upstream_request(
        &self,
        config: &ProviderConfig,
        req: &CanonicalRequest,
    ) -> AdapterResult<PreparedRequest> {
        let ProviderConfig::Codex(config) = config else {
            return Err(AdapterError::InvalidConfig("not a codex config".into()));
        };
        let Payload::Codex(codex_req) = &req.payload else {
            return Err(AdapterError::Unsupported("codex accepts only codex dialect"));
        };
        let access_token = config
            .access_token
            .as_deref()
            .ok_or_else(|| AdapterError::Credential("no access token".into()))?;
        let account_id = config
            .account_id
            .as_deref()
            .ok_or_else(|| AdapterError::Credential("no account id".into()))?;

        let body = serde_json::to_vec(codex_req)
            .map_err(|err| AdapterError::Translate(err.to_string()))?;
        let http = UpstreamRequest::post_json(
            format!("{DEFAULT_BASE_URL}/responses"),
            Bytes::from(body),
            req.stream,
        )
        .bearer(access_token)
        .header("chatgpt-account-id", account_id.to_string())
        .header("originator", "codex_cli_rs")
        .header("version", CLIENT_VERSION)
        .header("accept", "text/event-stream");

        Ok(PreparedRequest {
            http,
            upstream_dialect: Dialect::Codex,
        })
    }

    fn classify_error(&self, failure: &UpstreamFailure) -> Disposition {
        if let UpstreamFailure::Http {
            status: 429,
            retry_after: None,
            ..
        } = failure
        {
            return Disposition::Cooldown {
                reason: "rate_limit",
                duration: RATE_LIMIT_FALLBACK,
            };
        }
        default_classify(failure)
    }

    async fn refresh_credentials(
        &self,
        http: &HttpClient,
        config: &ProviderConfig,
    ) -> AdapterResult<Option<ProviderConfig>> {
        let ProviderConfig::Codex(config) = config else {
            return Err(AdapterError::InvalidConfig("not a codex config".into()));
        };
        let now = unix_now();
        if token_is_fresh(config.access_token_expires_at, now) {
            return Ok(None);
        }

        let token = refresh_openai_token(http, TOKEN_URL, CLIENT_ID, &config.refresh_token).await?;

        let mut updated = CodexConfig {
            access_token: Some(token.access_token.clone()),
            access_token_expires_at: Some(now + token.expires_in.unwrap_or(3_600)),
            ..config.clone()
        };
        if let Some(rotated) = token.refresh_token {
            updated.refresh_token = rotated;
        }
        if let Some(id_token) = &token.id_token {
            if updated.account_id.is_none() {
                updated.account_id = jwt_claim(id_token, "chatgpt_account_id");
            }
            if let Some(plan) = jwt_claim(id_token, "chatgpt_plan_type") {
                updated.plan_tier = Some(plan);
            }
        }
        Ok(Some(ProviderConfig::Codex(updated)))
    }

    async fn fetch_quota(
        &self,
        http: &HttpClient,
        config: &ProviderConfig,
    ) -> AdapterResult<QuotaSnapshot> {
        let ProviderConfig::Codex(config) = config else {
            return Err(AdapterError::InvalidConfig("not a codex config".into()));
        };
        let access_token = config
            .access_token
            .as_deref()
            .ok_or_else(|| AdapterError::Credential("no access token".into()))?;

        let mut request = UpstreamRequest::get(format!("{DEFAULT_BASE_URL}/usage"))
            .bearer(access_token)
            .header("version", CLIENT_VERSION);
        if let Some(account_id) = &config.account_id {
            request = request.header("chatgpt-account-id", account_id.clone());
        }

        let response = http.execute(request).await?;
        let UpstreamBody::Bytes(bytes) = response.body else {
            return Err(AdapterError::Other("unexpected streaming quota response".into()));
        };
        if response.status == 403 {
            return Ok(QuotaSnapshot {
                is_forbidden: true,
                ..Default::default()
            });
        }
        if !(200..300).contains(&response.status) {
            return Err(AdapterError::Other(format!(
                "quota fetch failed with status {}",
                response.status
            )));
        }
        Ok(parse_quota(&bytes))
    }
}

fn parse_quota(bytes: &[u8]) -> QuotaSnapshot {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) else {
        return QuotaSnapshot::default();
    };
    let primary = value
        .get("rate_limits")
        .and_then(|limits| limits.get("primary_window"))
        .or_else(|| value.get("primary_window"));
    let Some(window) = primary else {
        return QuotaSnapshot::default();
    };
    let used = window.get("used_percent").and_then(|v| v.as_f64());
    QuotaSnapshot {
        used_percent: used,
        remaining_percent: used.map(|used| 100.0 - used),
        window_seconds: window
            .get("window_minutes")
            .and_then(|v| v.as_i64())
            .map(|minutes| minutes * 60),
        reset_after_seconds: window.get("resets_in_seconds").and_then(|v| v.as_i64()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_codex_dialect_accepted() {
        let adapter = CodexAdapter::new();
        let config = ProviderConfig::Codex(CodexConfig::default());
        assert!(adapter.accepts(&config, ClientType::Codex));
        assert!(!adapter.accepts(&config, ClientType::Claude));
        assert!(!adapter.accepts(&config, ClientType::OpenAI));
        assert!(!adapter.accepts(&config, ClientType::Gemini));
    }

    #[test]
    fn rate_limit_without_header_uses_window_fallback() {
        let adapter = CodexAdapter::new();
        let disposition = adapter.classify_error(&UpstreamFailure::Http {
            status: 429,
            retry_after: None,
            body_snippet: String::new(),
        });
        assert_eq!(
            disposition,
            Disposition::Cooldown {
                reason: "rate_limit",
                duration: RATE_LIMIT_FALLBACK,
            }
        );
    }

    #[test]
    fn quota_parse_reads_primary_window() {
        let snapshot = parse_quota(
            serde_json::json!({
                "rate_limits": {
                    "primary_window": {
                        "used_percent": 62.5,
                        "window_minutes": 300,
                        "resets_in_seconds": 1800
                    }
                }
            })
            .to_string()
            .as_bytes(),
        );
        assert_eq!(snapshot.used_percent, Some(62.5));
        assert_eq!(snapshot.remaining_percent, Some(37.5));
        assert_eq!(snapshot.window_seconds, Some(18_000));
        assert_eq!(snapshot.effective_reset_at(100), Some(1_900));
    }

    #[test]
    fn request_carries_account_headers() {
        let adapter = CodexAdapter::new();
        let config = ProviderConfig::Codex(CodexConfig {
            refresh_token: "rt".into(),
            access_token: Some("at".into()),
            account_id: Some("acct_1".into()),
            ..Default::default()
        });
        let req: maxx_protocol::openai::CreateResponseRequest =
            serde_json::from_value(serde_json::json!({
                "model": "gpt-5",
                "input": "hello",
                "stream": true
            }))
            .unwrap();
        let canonical = CanonicalRequest::from_codex(req, None);
        let prepared = adapter.prepare_upstream_request(&config, &canonical).unwrap();
        assert!(prepared
            .http
            .headers
            .iter()
            .any(|(name, value)| name == "chatgpt-account-id" && value == "acct_1"));
        assert!(prepared.http.url.ends_with("/responses"));
    }
}
