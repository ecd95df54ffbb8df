//! Antigravity: a Google-account-backed provider that serves both Claude
//! and Gemini models. Claude and Gemini client dialects pass through
//! natively; OpenAI dialect is translated to Claude first.

use async_trait::async_trait;
use bytes::Bytes;

use maxx_common::{
    AntigravityConfig, ClientType, ModelQuota, ProviderConfig, ProviderType, QuotaSnapshot,
};
use maxx_transform::openai2claude::chat_request_to_claude;

use super::{token_is_fresh, unix_now};
use crate::canonical::{CanonicalRequest, Dialect, Payload};
use crate::http::{HttpClient, UpstreamBody, UpstreamRequest};
use crate::oauth::refresh_google_token;
use crate::{Adapter, AdapterError, AdapterResult, PreparedRequest};

const DEFAULT_BASE_URL: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const CLIENT_ID: &str = "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
const CLIENT_SECRET: &str = "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";
const USER_AGENT: &str = "antigravity/1.15.8 (Windows; AMD64)";

pub struct AntigravityAdapter;

impl AntigravityAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AntigravityAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for AntigravityAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Antigravity
    }

    fn accepts(&self, _config: &ProviderConfig, client_type: ClientType) -> bool {
        matches!(
            client_type,
            ClientType::Claude | ClientType::Gemini | ClientType::OpenAI
        )
    }

    fn prepare_upstream_request(
        &self,
        config: &ProviderConfig,
        req: &CanonicalRequest,
    ) -> AdapterResult<PreparedRequest> {
        let ProviderConfig::Antigravity(config) = config else {
            return Err(AdapterError::InvalidConfig("not an antigravity config".into()));
        };
        let access_token = config
            .access_token
            .as_deref()
            .ok_or_else(|| AdapterError::Credential("no access token".into()))?;

        let (url, body, dialect) = match &req.payload {
            Payload::ClaudeMessages(claude_req) => {
                let body = serde_json::to_vec(claude_req)
                    .map_err(|err| AdapterError::Translate(err.to_string()))?;
                (
                    claude_url(req.stream),
                    Bytes::from(body),
                    Dialect::Claude,
                )
            }
            Payload::ClaudeCountTokens(count_req) => {
                let body = serde_json::to_vec(count_req)
                    .map_err(|err| AdapterError::Translate(err.to_string()))?;
                (
                    format!("{DEFAULT_BASE_URL}/v1internal:countClaudeTokens"),
                    Bytes::from(body),
                    Dialect::Claude,
                )
            }
            Payload::OpenAIChat(chat_req) => {
                let mut claude_req = chat_request_to_claude(chat_req)?;
                claude_req.model = req.model.clone();
                claude_req.stream = Some(req.stream);
                let body = serde_json::to_vec(&claude_req)
                    .map_err(|err| AdapterError::Translate(err.to_string()))?;
                (
                    claude_url(req.stream),
                    Bytes::from(body),
                    Dialect::Claude,
                )
            }
            Payload::GeminiGenerate(gemini_req) => {
                let wrapped = serde_json::json!({
                    "model": req.model,
                    "project": config.gcp_project_id,
                    "request": gemini_req,
                });
                let body = serde_json::to_vec(&wrapped)
                    .map_err(|err| AdapterError::Translate(err.to_string()))?;
                let method = if req.stream {
                    "streamGenerateContent"
                } else {
                    "generateContent"
                };
                (
                    format!("{DEFAULT_BASE_URL}/v1internal:{method}"),
                    Bytes::from(body),
                    Dialect::Gemini,
                )
            }
            Payload::Codex(_) => return Err(AdapterError::Unsupported("codex dialect")),
        };

        let mut http = UpstreamRequest::post_json(url, body, req.stream)
            .bearer(access_token)
            .header("user-agent", USER_AGENT);
        if let Some(project) = &config.gcp_project_id {
            http = http.header("x-goog-user-project", project.clone());
        }
        Ok(PreparedRequest {
            http,
            upstream_dialect: dialect,
        })
    }

    async fn refresh_credentials(
        &self,
        http: &HttpClient,
        config: &ProviderConfig,
    ) -> AdapterResult<Option<ProviderConfig>> {
        let ProviderConfig::Antigravity(config) = config else {
            return Err(AdapterError::InvalidConfig("not an antigravity config".into()));
        };
        let now = unix_now();
        if token_is_fresh(config.access_token_expires_at, now) {
            return Ok(None);
        }

        let token = refresh_google_token(
            http,
            TOKEN_URL,
            CLIENT_ID,
            CLIENT_SECRET,
            &config.refresh_token,
        )
        .await?;

        let mut updated = AntigravityConfig {
            access_token: Some(token.access_token.clone()),
            access_token_expires_at: Some(now + token.expires_in.unwrap_or(3_600)),
            ..config.clone()
        };
        if let Some(rotated) = token.refresh_token {
            updated.refresh_token = rotated;
        }
        fill_user_info(http, &mut updated, &token.access_token).await;
        Ok(Some(ProviderConfig::Antigravity(updated)))
    }

    async fn fetch_quota(
        &self,
        http: &HttpClient,
        config: &ProviderConfig,
    ) -> AdapterResult<QuotaSnapshot> {
        let ProviderConfig::Antigravity(config) = config else {
            return Err(AdapterError::InvalidConfig("not an antigravity config".into()));
        };
        let access_token = config
            .access_token
            .as_deref()
            .ok_or_else(|| AdapterError::Credential("no access token".into()))?;
        let body = serde_json::json!({"project": config.gcp_project_id});
        let request = UpstreamRequest::post_json(
            format!("{DEFAULT_BASE_URL}/v1internal:fetchUsageLimits"),
            Bytes::from(serde_json::to_vec(&body).unwrap_or_default()),
            false,
        )
        .bearer(access_token)
        .header("user-agent", USER_AGENT);

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

fn claude_url(stream: bool) -> String {
    let method = if stream {
        "streamClaudeMessage"
    } else {
        "generateClaudeMessage"
    };
    format!("{DEFAULT_BASE_URL}/v1internal:{method}")
}

async fn fill_user_info(http: &HttpClient, config: &mut AntigravityConfig, access_token: &str) {
    let request = UpstreamRequest::get(USERINFO_URL.to_string()).bearer(access_token);
    let Ok(response) = http.execute(request).await else {
        return;
    };
    let UpstreamBody::Bytes(bytes) = response.body else {
        return;
    };
    let Ok(info) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return;
    };
    config.user_email = info
        .get("email")
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .or(config.user_email.take());
    config.user_name = info
        .get("name")
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .or(config.user_name.take());
    config.user_picture = info
        .get("picture")
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .or(config.user_picture.take());
}

fn parse_quota(bytes: &[u8]) -> QuotaSnapshot {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) else {
        return QuotaSnapshot::default();
    };
    let mut snapshot = QuotaSnapshot {
        window_seconds: value.get("windowSeconds").and_then(|v| v.as_i64()),
        ..Default::default()
    };
    if let Some(limits) = value.get("limits").and_then(|v| v.as_array()) {
        for limit in limits {
            let Some(model) = limit.get("model").and_then(|v| v.as_str()) else {
                continue;
            };
            snapshot.models.push(ModelQuota {
                model: model.to_string(),
                remaining_percent: limit.get("remainingPercent").and_then(|v| v.as_f64()),
                reset_at: limit.get("resetTimeUnixSeconds").and_then(|v| v.as_i64()),
            });
        }
    }
    // Headline numbers mirror the tightest model window.
    if let Some(min) = snapshot
        .models
        .iter()
        .filter_map(|model| model.remaining_percent)
        .min_by(|a, b| a.total_cmp(b))
    {
        snapshot.remaining_percent = Some(min);
        snapshot.used_percent = Some(100.0 - min);
    }
    snapshot.reset_at = snapshot.models.iter().filter_map(|model| model.reset_at).min();
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_token() -> ProviderConfig {
        ProviderConfig::Antigravity(AntigravityConfig {
            refresh_token: "rt".into(),
            gcp_project_id: Some("proj-1".into()),
            access_token: Some("at".into()),
            access_token_expires_at: Some(unix_now() + 3_600),
            ..Default::default()
        })
    }

    #[test]
    fn openai_dialect_translates_to_claude_endpoint() {
        let adapter = AntigravityAdapter::new();
        let req: maxx_protocol::openai::ChatCompletionRequest =
            serde_json::from_value(serde_json::json!({
                "model": "gemini-2.5-flash",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true
            }))
            .unwrap();
        let canonical = CanonicalRequest::from_openai_chat(req, None);
        let prepared = adapter
            .prepare_upstream_request(&config_with_token(), &canonical)
            .unwrap();
        assert!(prepared.http.url.ends_with(":streamClaudeMessage"));
        assert_eq!(prepared.upstream_dialect, Dialect::Claude);
        let body: serde_json::Value =
            serde_json::from_slice(prepared.http.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["model"], "gemini-2.5-flash");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn gemini_dialect_wraps_project_envelope() {
        let adapter = AntigravityAdapter::new();
        let req: maxx_protocol::gemini::GenerateContentRequest =
            serde_json::from_value(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
            }))
            .unwrap();
        let canonical = CanonicalRequest::from_gemini(req, "gemini-2.5-pro", false, None);
        let prepared = adapter
            .prepare_upstream_request(&config_with_token(), &canonical)
            .unwrap();
        assert!(prepared.http.url.ends_with(":generateContent"));
        let body: serde_json::Value =
            serde_json::from_slice(prepared.http.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["model"], "gemini-2.5-pro");
        assert_eq!(body["project"], "proj-1");
        assert!(body["request"]["contents"].is_array());
    }

    #[test]
    fn codex_dialect_is_rejected() {
        let adapter = AntigravityAdapter::new();
        assert!(!adapter.accepts(&config_with_token(), ClientType::Codex));
    }

    #[test]
    fn quota_parse_takes_tightest_window() {
        let snapshot = parse_quota(
            serde_json::json!({
                "windowSeconds": 18000,
                "limits": [
                    {"model": "claude-sonnet-4-5", "remainingPercent": 40.0, "resetTimeUnixSeconds": 1000},
                    {"model": "gemini-2.5-pro", "remainingPercent": 80.0, "resetTimeUnixSeconds": 2000}
                ]
            })
            .to_string()
            .as_bytes(),
        );
        assert_eq!(snapshot.remaining_percent, Some(40.0));
        assert_eq!(snapshot.reset_at, Some(1000));
        assert_eq!(snapshot.claude_model_reset_at(), Some(1000));
    }
}
