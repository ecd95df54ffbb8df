pub mod config;
pub mod error;
pub mod glob;
pub mod token;
pub mod types;

pub use config::{
    AntigravityConfig, ClientBaseUrl, CodexConfig, CustomConfig, KiroConfig, ModelQuota,
    ProviderConfig, QuotaSnapshot,
};
pub use error::ErrorKind;
pub use glob::glob_match;
pub use token::{display_prefix, generate_api_token, TOKEN_PREFIX};
pub use types::{
    ClientType, MappingScope, ProviderType, RequestStatus, TokenMetrics,
};

/// Process-unique identifier stamped onto every request row this instance
/// creates, so a restarted instance can recognize rows orphaned by a crash.
pub fn new_instance_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// URL-safe slug derived from a display name: lowercase alphanumerics with
/// single dashes, trimmed at both ends.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("My  Cool Project!"), "my-cool-project");
        assert_eq!(slugify("--a--"), "a");
        assert_eq!(slugify(""), "");
    }
}
