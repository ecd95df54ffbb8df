use serde::{Deserialize, Serialize};

use crate::ClientType;

/// Typed provider configuration, persisted as the JSON `config` column of
/// a provider row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Antigravity(AntigravityConfig),
    Codex(CodexConfig),
    Kiro(KiroConfig),
    Custom(CustomConfig),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AntigravityConfig {
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<i64>,
    /// Cached user info refreshed alongside the access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_picture: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodexConfig {
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_end: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KiroConfig {
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomConfig {
    /// Global base URL; per-client-type overrides win when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub client_base_urls: Vec<ClientBaseUrl>,
    /// Header name and value sent upstream, e.g. ("authorization",
    /// "Bearer sk-…") or ("x-api-key", "…").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_value: Option<String>,
    /// Empty list means every model is allowed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_allowlist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientBaseUrl {
    pub client_type: ClientType,
    pub base_url: String,
}

impl CustomConfig {
    pub fn base_url_for(&self, client_type: ClientType) -> Option<&str> {
        self.client_base_urls
            .iter()
            .find(|entry| entry.client_type == client_type)
            .map(|entry| entry.base_url.as_str())
            .or(self.base_url.as_deref())
    }

    pub fn allows_model(&self, model: &str) -> bool {
        self.model_allowlist.is_empty()
            || self.model_allowlist.iter().any(|allowed| allowed == model)
    }
}

/// Cached answer from a provider-family quota endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_seconds: Option<i64>,
    /// Unix seconds at which the window resets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_after_seconds: Option<i64>,
    #[serde(default)]
    pub is_forbidden: bool,
    /// Per-model windows for families that report them (antigravity
    /// reports the claude model's window separately).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelQuota>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelQuota {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<i64>,
}

impl QuotaSnapshot {
    /// Effective reset instant, folding `reset_after_seconds` relative to
    /// `observed_at` (unix seconds).
    pub fn effective_reset_at(&self, observed_at: i64) -> Option<i64> {
        self.reset_at
            .or_else(|| self.reset_after_seconds.map(|after| observed_at + after))
    }

    pub fn claude_model_reset_at(&self) -> Option<i64> {
        self.models
            .iter()
            .find(|model| model.model.contains("claude"))
            .and_then(|model| model.reset_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_base_url_override_wins() {
        let config = CustomConfig {
            base_url: Some("https://api.example.com".into()),
            client_base_urls: vec![ClientBaseUrl {
                client_type: ClientType::Gemini,
                base_url: "https://gemini.example.com".into(),
            }],
            ..Default::default()
        };
        assert_eq!(
            config.base_url_for(ClientType::Gemini),
            Some("https://gemini.example.com")
        );
        assert_eq!(
            config.base_url_for(ClientType::Claude),
            Some("https://api.example.com")
        );
    }

    #[test]
    fn quota_reset_folds_relative_seconds() {
        let quota = QuotaSnapshot {
            reset_after_seconds: Some(300),
            ..Default::default()
        };
        assert_eq!(quota.effective_reset_at(1_000), Some(1_300));
        let fixed = QuotaSnapshot {
            reset_at: Some(5_000),
            reset_after_seconds: Some(300),
            ..Default::default()
        };
        assert_eq!(fixed.effective_reset_at(1_000), Some(5_000));
    }

    #[test]
    fn config_json_round_trip() {
        let config = ProviderConfig::Codex(CodexConfig {
            refresh_token: "rt".into(),
            account_id: Some("acct_1".into()),
            ..Default::default()
        });
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "codex");
        let back: ProviderConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
