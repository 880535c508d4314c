use std::time::Duration;

/// Typed failures of a completion backend call.
/// Classifies errors as fatal (don't retry), retryable, or operational.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BackendError {
    // Fatal: never retried
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("provider overloaded")]
    ProviderOverloaded,
    #[error("network error: {0}")]
    NetworkError(String),

    // Operational
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::ProviderOverloaded
                | Self::NetworkError(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::InvalidRequest(_) | Self::InvalidResponse(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidResponse(_) => "invalid_response",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::ProviderOverloaded => "provider_overloaded",
            Self::NetworkError(_) => "network_error",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            503 => Self::ProviderOverloaded,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(BackendError::RateLimited { retry_after: None }.is_retryable());
        assert!(BackendError::ServerError { status: 500, body: "err".into() }.is_retryable());
        assert!(BackendError::ProviderOverloaded.is_retryable());
        assert!(BackendError::NetworkError("reset".into()).is_retryable());
    }

    #[test]
    fn fatal_classification() {
        assert!(BackendError::AuthenticationFailed("bad key".into()).is_fatal());
        assert!(BackendError::InvalidRequest("bad".into()).is_fatal());
        assert!(BackendError::InvalidResponse("no choices".into()).is_fatal());
    }

    #[test]
    fn timeout_is_neither() {
        let timeout = BackendError::Timeout(Duration::from_secs(100));
        assert!(!timeout.is_retryable());
        assert!(!timeout.is_fatal());
    }

    #[test]
    fn suggested_delay_only_for_rate_limit() {
        let rl = BackendError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(rl.suggested_delay(), Some(Duration::from_secs(5)));
        assert_eq!(BackendError::ProviderOverloaded.suggested_delay(), None);
    }

    #[test]
    fn from_status_mapping() {
        assert!(BackendError::from_status(401, "unauthorized".into()).is_fatal());
        assert!(BackendError::from_status(404, "no such model".into()).is_fatal());
        assert!(BackendError::from_status(429, "slow down".into()).is_retryable());
        assert!(matches!(
            BackendError::from_status(503, "busy".into()),
            BackendError::ProviderOverloaded
        ));
        assert!(matches!(
            BackendError::from_status(502, "bad gateway".into()),
            BackendError::ServerError { status: 502, .. }
        ));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(BackendError::ProviderOverloaded.error_kind(), "provider_overloaded");
        assert_eq!(
            BackendError::Timeout(Duration::from_secs(1)).error_kind(),
            "timeout"
        );
    }
}
