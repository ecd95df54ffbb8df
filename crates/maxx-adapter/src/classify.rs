use std::time::Duration;

/// Upstream failure as observed by the executor, before classification.
#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    /// No HTTP response at all (dial, TLS, read timeout).
    Transport { message: String },
    /// Non-2xx response captured before any byte reached the client.
    Http {
        status: u16,
        retry_after: Option<Duration>,
        body_snippet: String,
    },
}

/// Routing decision for one classified failure. The router never inspects
/// free-form messages; `reason` is a stable slug used for failure
/// accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Try again on the same route (subject to its retry policy).
    Retryable { reason: &'static str },
    /// Put the provider on cooldown for this client type, move on.
    Cooldown {
        reason: &'static str,
        duration: Duration,
    },
    /// Abandon this route without cooldown.
    Fatal { reason: &'static str },
}

pub const RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(60);
const AUTH_COOLDOWN: Duration = Duration::from_secs(30 * 60);
const FORBIDDEN_COOLDOWN: Duration = Duration::from_secs(6 * 60 * 60);

pub fn default_classify(failure: &UpstreamFailure) -> Disposition {
    match failure {
        UpstreamFailure::Transport { .. } => Disposition::Retryable { reason: "transport" },
        UpstreamFailure::Http {
            status, retry_after, ..
        } => match status {
            429 => Disposition::Cooldown {
                reason: "rate_limit",
                duration: retry_after.unwrap_or(RATE_LIMIT_FALLBACK),
            },
            401 => Disposition::Cooldown {
                reason: "auth_invalid",
                duration: AUTH_COOLDOWN,
            },
            403 => Disposition::Cooldown {
                reason: "forbidden",
                duration: FORBIDDEN_COOLDOWN,
            },
            500..=599 => Disposition::Retryable { reason: "upstream_5xx" },
            408 => Disposition::Retryable { reason: "timeout" },
            _ => Disposition::Fatal { reason: "upstream_error" },
        },
    }
}

/// Parse a `Retry-After` header value (delta-seconds form only; HTTP
/// dates are rare on these APIs and fall back to the default).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_honours_retry_after() {
        let disposition = default_classify(&UpstreamFailure::Http {
            status: 429,
            retry_after: Some(Duration::from_secs(3_600)),
            body_snippet: String::new(),
        });
        assert_eq!(
            disposition,
            Disposition::Cooldown {
                reason: "rate_limit",
                duration: Duration::from_secs(3_600),
            }
        );
    }

    #[test]
    fn five_xx_is_retryable() {
        let disposition = default_classify(&UpstreamFailure::Http {
            status: 502,
            retry_after: None,
            body_snippet: String::new(),
        });
        assert!(matches!(disposition, Disposition::Retryable { .. }));
    }

    #[test]
    fn bad_request_is_fatal() {
        let disposition = default_classify(&UpstreamFailure::Http {
            status: 400,
            retry_after: None,
            body_snippet: String::new(),
        });
        assert!(matches!(disposition, Disposition::Fatal { .. }));
    }

    #[test]
    fn retry_after_parses_delta_seconds() {
        assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("  "), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct"), None);
    }
}
