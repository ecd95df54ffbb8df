//! Token-auth service: vendor-specific credential extraction, cached
//! validation, and an asynchronous usage counter.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use maxx_common::{ClientType, ErrorKind, TOKEN_PREFIX};
use maxx_storage::entities::api_tokens;
use maxx_storage::store::settings::API_TOKEN_AUTH_ENABLED;
use maxx_storage::{SnapshotCache, Store};

/// Simple name/value view of inbound headers, decoupled from the HTTP
/// framework.
pub type HeaderView<'a> = &'a [(String, String)];

const BUMP_QUEUE_CAPACITY: usize = 4_096;

pub struct TokenAuth {
    cache: Arc<SnapshotCache>,
    store: Store,
    bump_tx: mpsc::Sender<(i64, OffsetDateTime)>,
}

impl TokenAuth {
    /// Spawns the usage-bump worker; overflow drops the bump rather than
    /// blocking or failing the request path.
    pub fn new(cache: Arc<SnapshotCache>, store: Store) -> Self {
        let (bump_tx, mut bump_rx) = mpsc::channel::<(i64, OffsetDateTime)>(BUMP_QUEUE_CAPACITY);
        let worker_store = store.clone();
        tokio::spawn(async move {
            while let Some((token_id, at)) = bump_rx.recv().await {
                if let Err(err) = worker_store.bump_api_token_usage(token_id, at).await {
                    warn!(token_id, error = %err, "token usage bump failed");
                }
            }
        });
        Self {
            cache,
            store,
            bump_tx,
        }
    }

    /// Validate the inbound credential for `client_type`. Returns the
    /// full token record so the router can scope later decisions, or
    /// `None` when token auth is disabled.
    pub async fn authenticate(
        &self,
        client_type: ClientType,
        headers: HeaderView<'_>,
    ) -> Result<Option<api_tokens::Model>, ErrorKind> {
        let enabled = self
            .store
            .setting_bool(API_TOKEN_AUTH_ENABLED, true)
            .await
            .map_err(crate::store_error_kind)?;
        if !enabled {
            return Ok(None);
        }

        let token = extract_credential(client_type, headers)?;
        if !token.starts_with(TOKEN_PREFIX) {
            return Err(ErrorKind::InvalidToken);
        }

        let snapshot = self.cache.current();
        let record = snapshot
            .tokens_by_value
            .get(&token)
            .ok_or(ErrorKind::InvalidToken)?;
        if !record.is_enabled {
            return Err(ErrorKind::TokenDisabled);
        }
        let now = OffsetDateTime::now_utc();
        if let Some(expires_at) = record.expires_at
            && expires_at <= now
        {
            return Err(ErrorKind::TokenExpired);
        }

        if self.bump_tx.try_send((record.id, now)).is_err() {
            debug!(token_id = record.id, "usage bump queue full, dropping");
        }
        Ok(Some(record.clone()))
    }
}

/// Credential location is dialect-specific: Claude uses `x-api-key`,
/// OpenAI/Codex use a bearer Authorization (strict prefix), Gemini uses
/// `x-goog-api-key`.
pub fn extract_credential(
    client_type: ClientType,
    headers: HeaderView<'_>,
) -> Result<String, ErrorKind> {
    let header_value = |name: &str| {
        headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
    };

    let token = match client_type {
        ClientType::Claude => header_value("x-api-key").unwrap_or(""),
        ClientType::Gemini => header_value("x-goog-api-key").unwrap_or(""),
        ClientType::OpenAI | ClientType::Codex => {
            let auth = header_value("authorization").unwrap_or("");
            if auth.is_empty() {
                return Err(ErrorKind::MissingToken);
            }
            auth.strip_prefix("Bearer ")
                .or_else(|| auth.strip_prefix("bearer "))
                .ok_or(ErrorKind::InvalidToken)?
                .trim()
        }
    };
    if token.is_empty() {
        return Err(ErrorKind::MissingToken);
    }
    Ok(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn claude_uses_x_api_key() {
        let headers = headers(&[("x-api-key", "maxx_abc")]);
        assert_eq!(
            extract_credential(ClientType::Claude, &headers).unwrap(),
            "maxx_abc"
        );
    }

    #[test]
    fn gemini_uses_goog_header() {
        let headers = headers(&[("X-Goog-Api-Key", "maxx_def")]);
        assert_eq!(
            extract_credential(ClientType::Gemini, &headers).unwrap(),
            "maxx_def"
        );
    }

    #[test]
    fn bearer_prefix_is_mandatory() {
        // A bare token without the Bearer prefix must not authenticate.
        let bare = headers(&[("authorization", "maxx_abc")]);
        assert_eq!(
            extract_credential(ClientType::OpenAI, &bare),
            Err(ErrorKind::InvalidToken)
        );

        let proper = headers(&[("authorization", "Bearer maxx_abc")]);
        assert_eq!(
            extract_credential(ClientType::Codex, &proper).unwrap(),
            "maxx_abc"
        );
    }

    #[test]
    fn missing_header_is_missing_token() {
        assert_eq!(
            extract_credential(ClientType::Claude, &[]),
            Err(ErrorKind::MissingToken)
        );
        assert_eq!(
            extract_credential(ClientType::OpenAI, &[]),
            Err(ErrorKind::MissingToken)
        );
    }
}
