pub mod antigravity;
pub mod codex;
pub mod custom;
pub mod kiro;

/// Access token freshness margin shared by the OAuth-backed adapters: a
/// token within this many seconds of expiry is refreshed before use.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

pub(crate) fn token_is_fresh(expires_at: Option<i64>, now: i64) -> bool {
    matches!(expires_at, Some(expiry) if expiry - now > TOKEN_REFRESH_MARGIN_SECS)
}

#[cfg(test)]
mod tests {
    use super::token_is_fresh;

    #[test]
    fn freshness_margin_is_sixty_seconds() {
        assert!(token_is_fresh(Some(1_000), 900));
        assert!(!token_is_fresh(Some(1_000), 941));
        assert!(!token_is_fresh(Some(1_000), 1_100));
        assert!(!token_is_fresh(None, 0));
    }
}
