//! Shared OAuth token-exchange helpers for the account-backed providers.

use serde::Deserialize;

use crate::http::{HttpClient, UpstreamBody, UpstreamRequest};
use crate::{AdapterError, AdapterResult};

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Exchange a Google refresh token (Antigravity accounts).
pub async fn refresh_google_token(
    http: &HttpClient,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> AdapterResult<TokenResponse> {
    let body = form_encode(&[
        ("grant_type", "refresh_token"),
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("refresh_token", refresh_token),
    ]);
    let request = UpstreamRequest {
        method: crate::http::HttpMethod::Post,
        url: token_url.to_string(),
        headers: vec![(
            "content-type".into(),
            "application/x-www-form-urlencoded".into(),
        )],
        body: Some(body.into()),
        is_stream: false,
    };
    exchange(http, request).await
}

/// Exchange an OpenAI refresh token (Codex accounts).
pub async fn refresh_openai_token(
    http: &HttpClient,
    token_url: &str,
    client_id: &str,
    refresh_token: &str,
) -> AdapterResult<TokenResponse> {
    let body = serde_json::json!({
        "grant_type": "refresh_token",
        "client_id": client_id,
        "refresh_token": refresh_token,
        "scope": "openid profile email",
    });
    let request = UpstreamRequest::post_json(
        token_url.to_string(),
        serde_json::to_vec(&body)
            .map_err(|err| AdapterError::Other(err.to_string()))?
            .into(),
        false,
    );
    exchange(http, request).await
}

async fn exchange(http: &HttpClient, request: UpstreamRequest) -> AdapterResult<TokenResponse> {
    let response = http.execute(request).await?;
    let UpstreamBody::Bytes(bytes) = response.body else {
        return Err(AdapterError::Other("unexpected streaming token response".into()));
    };
    if !(200..300).contains(&response.status) {
        return Err(AdapterError::Credential(format!(
            "token exchange failed with status {}",
            response.status
        )));
    }
    serde_json::from_slice(&bytes).map_err(|err| AdapterError::Credential(err.to_string()))
}

/// Unverified read of a JWT payload claim. Tokens come straight from the
/// vendor's token endpoint over TLS; we only mine profile fields.
pub fn jwt_claim(token: &str, claim: &str) -> Option<String> {
    use base64::Engine;
    let payload = token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    let value: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    value
        .get(claim)
        .and_then(|claim| claim.as_str())
        .map(str::to_string)
}

fn form_encode(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_encoding_escapes_values() {
        let body = form_encode(&[("a", "x y"), ("b", "1/2")]);
        assert_eq!(body, "a=x%20y&b=1%2F2");
    }

    #[test]
    fn jwt_claim_reads_payload() {
        use base64::Engine;
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(b"{\"https://api.openai.com/auth\":\"x\",\"chatgpt_account_id\":\"acct_9\"}");
        let token = format!("eyJh.{payload}.sig");
        assert_eq!(jwt_claim(&token, "chatgpt_account_id").as_deref(), Some("acct_9"));
        assert_eq!(jwt_claim(&token, "missing"), None);
    }
}
