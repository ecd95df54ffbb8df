use rand::RngCore;

pub const TOKEN_PREFIX: &str = "maxx_";

/// Length of a full credential: prefix + 64 hex chars (32 random bytes).
pub const TOKEN_LEN: usize = TOKEN_PREFIX.len() + 64;

/// Generate a fresh client credential.
pub fn generate_api_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(TOKEN_LEN);
    out.push_str(TOKEN_PREFIX);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Display form stored alongside the token: first 12 chars + ellipsis.
pub fn display_prefix(token: &str) -> String {
    let head: String = token.chars().take(12).collect();
    format!("{head}…")
}

/// Whether a presented credential has the shape of one of ours.
pub fn looks_like_token(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token.starts_with(TOKEN_PREFIX)
        && token[TOKEN_PREFIX.len()..]
            .bytes()
            .all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_validate() {
        let token = generate_api_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(looks_like_token(&token));
        assert!(display_prefix(&token).starts_with("maxx_"));
        assert!(display_prefix(&token).ends_with('…'));
    }

    #[test]
    fn two_tokens_differ() {
        assert_ne!(generate_api_token(), generate_api_token());
    }

    #[test]
    fn rejects_foreign_shapes() {
        assert!(!looks_like_token("sk-ant-abc"));
        assert!(!looks_like_token("maxx_short"));
        assert!(!looks_like_token(&format!("maxx_{}", "g".repeat(64))));
    }
}
