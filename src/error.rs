use thiserror::Error;

/// Errors surfaced by the external providers (embedding endpoint, chat
/// endpoint) and the store boundary. Rate limiting is kept distinct so retry
/// call sites can tell it apart from permanent failures.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Classify an HTTP error status. 429 and bodies that mention rate
    /// limiting map to `RateLimited`; everything else stays a plain API error.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.as_u16() == 429 || body.to_ascii_lowercase().contains("rate limit") {
            ProviderError::RateLimited(body)
        } else {
            ProviderError::Api {
                status: status.as_u16(),
                body,
            }
        }
    }

    /// Whether a retry with backoff has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited(_) => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::Transport(e) => e.is_timeout() || e.is_connect(),
            ProviderError::Malformed(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_maps_to_rate_limited() {
        let err = ProviderError::from_status(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "slow down".to_string(),
        );
        assert!(matches!(err, ProviderError::RateLimited(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn rate_limit_mentioned_in_body_is_detected() {
        let err = ProviderError::from_status(
            reqwest::StatusCode::BAD_REQUEST,
            "Rate limit exceeded for requests".to_string(),
        );
        assert!(matches!(err, ProviderError::RateLimited(_)));
    }

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        let server = ProviderError::from_status(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "oops".to_string(),
        );
        assert!(server.is_retryable());

        let client =
            ProviderError::from_status(reqwest::StatusCode::UNAUTHORIZED, "bad key".to_string());
        assert!(!client.is_retryable());
    }

    #[test]
    fn malformed_is_never_retryable() {
        assert!(!ProviderError::Malformed("truncated json".to_string()).is_retryable());
    }
}
