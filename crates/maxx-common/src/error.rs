use thiserror::Error;

/// Stable error kinds crossing component boundaries.
///
/// Upstream variants never leak the upstream body verbatim; the `reason`
/// strings are produced by adapter classification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("token disabled")]
    TokenDisabled,
    #[error("token expired")]
    TokenExpired,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("upstream retryable: {0}")]
    UpstreamRetryable(String),
    #[error("upstream fatal: {0}")]
    UpstreamFatal(String),
    #[error("upstream forbidden: {0}")]
    UpstreamForbidden(String),
    #[error("client cancelled")]
    ClientCancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// HTTP status a user-visible surface maps this kind to. Internal
    /// variants (upstream/cancelled) never reach a response body directly.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::NotFound(_) => 404,
            ErrorKind::InvalidInput(_) => 400,
            ErrorKind::Unauthorized
            | ErrorKind::MissingToken
            | ErrorKind::InvalidToken
            | ErrorKind::TokenDisabled
            | ErrorKind::TokenExpired => 401,
            ErrorKind::Conflict(_) => 409,
            ErrorKind::UpstreamRetryable(_)
            | ErrorKind::UpstreamFatal(_)
            | ErrorKind::UpstreamForbidden(_) => 502,
            ErrorKind::ClientCancelled => 499,
            ErrorKind::Internal(_) => 500,
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        ErrorKind::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_errors_are_401() {
        for kind in [
            ErrorKind::MissingToken,
            ErrorKind::InvalidToken,
            ErrorKind::TokenDisabled,
            ErrorKind::TokenExpired,
        ] {
            assert_eq!(kind.http_status(), 401);
        }
    }

    #[test]
    fn conflict_is_409() {
        assert_eq!(ErrorKind::Conflict("slug".into()).http_status(), 409);
    }
}
