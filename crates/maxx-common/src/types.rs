use serde::{Deserialize, Serialize};

/// Dialect an inbound HTTP request speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Claude,
    OpenAI,
    Codex,
    Gemini,
}

impl ClientType {
    pub const ALL: [ClientType; 4] = [
        ClientType::Claude,
        ClientType::OpenAI,
        ClientType::Codex,
        ClientType::Gemini,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Claude => "claude",
            ClientType::OpenAI => "openai",
            ClientType::Codex => "codex",
            ClientType::Gemini => "gemini",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "claude" => Some(ClientType::Claude),
            "openai" => Some(ClientType::OpenAI),
            "codex" => Some(ClientType::Codex),
            "gemini" => Some(ClientType::Gemini),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream account family. The adapter registry selects an adapter by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Antigravity,
    Codex,
    Kiro,
    Custom,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Antigravity => "antigravity",
            ProviderType::Codex => "codex",
            ProviderType::Kiro => "kiro",
            ProviderType::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "antigravity" => Some(ProviderType::Antigravity),
            "codex" => Some(ProviderType::Codex),
            "kiro" => Some(ProviderType::Kiro),
            "custom" => Some(ProviderType::Custom),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal and in-flight states for proxy requests and upstream attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::InProgress => "IN_PROGRESS",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Failed => "FAILED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(RequestStatus::Pending),
            "IN_PROGRESS" => Some(RequestStatus::InProgress),
            "COMPLETED" => Some(RequestStatus::Completed),
            "FAILED" => Some(RequestStatus::Failed),
            "CANCELLED" => Some(RequestStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }
}

/// Scope of a model-mapping rule. `specificity()` breaks priority ties:
/// higher wins (route beats global).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingScope {
    Global,
    Provider,
    Project,
    ApiToken,
    Route,
}

impl MappingScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingScope::Global => "global",
            MappingScope::Provider => "provider",
            MappingScope::Project => "project",
            MappingScope::ApiToken => "api_token",
            MappingScope::Route => "route",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "global" => Some(MappingScope::Global),
            "provider" => Some(MappingScope::Provider),
            "project" => Some(MappingScope::Project),
            "api_token" => Some(MappingScope::ApiToken),
            "route" => Some(MappingScope::Route),
            _ => None,
        }
    }

    pub fn specificity(&self) -> u8 {
        match self {
            MappingScope::Global => 0,
            MappingScope::Provider => 1,
            MappingScope::Project => 2,
            MappingScope::ApiToken => 3,
            MappingScope::Route => 4,
        }
    }
}

/// Per-dimension token counts observed on one attempt.
///
/// `cache_creation_total` is set when the upstream only reports an
/// undifferentiated cache-write figure; pricing then bills it at the
/// 5-minute write rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetrics {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_5m_write_tokens: i64,
    pub cache_1h_write_tokens: i64,
    pub cache_creation_total: i64,
}

impl TokenMetrics {
    pub fn merge(&mut self, other: &TokenMetrics) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_5m_write_tokens += other.cache_5m_write_tokens;
        self.cache_1h_write_tokens += other.cache_1h_write_tokens;
        self.cache_creation_total += other.cache_creation_total;
    }

    pub fn is_empty(&self) -> bool {
        *self == TokenMetrics::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_type_round_trip() {
        for ct in ClientType::ALL {
            assert_eq!(ClientType::parse(ct.as_str()), Some(ct));
        }
        assert_eq!(ClientType::parse("grok"), None);
    }

    #[test]
    fn status_terminality() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(!RequestStatus::InProgress.is_terminal());
        assert_eq!(RequestStatus::parse("IN_PROGRESS"), Some(RequestStatus::InProgress));
    }

    #[test]
    fn scope_ordering() {
        assert!(MappingScope::Route.specificity() > MappingScope::ApiToken.specificity());
        assert!(MappingScope::ApiToken.specificity() > MappingScope::Project.specificity());
        assert!(MappingScope::Project.specificity() > MappingScope::Provider.specificity());
        assert!(MappingScope::Provider.specificity() > MappingScope::Global.specificity());
    }
}
