//! Routing errors
//!
//! Configuration and empty-region conditions surface immediately.
//! Transport failures are retried by the executor until the budget runs out.

/// Failure of a single attempt at the network layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("proxy setup failed: {0}")]
    Proxy(String),
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Error surfaced by `RequestExecutor::request`.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// A pinned endpoint is unknown or disabled.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("no healthy endpoint available in region {region}")]
    NoHealthyEndpoint { region: String },
    #[error("no region has an enabled endpoint")]
    NoRegionAvailable,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("all {attempts} attempts in region {region} failed")]
    ExhaustedRetries {
        region: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

impl RouteError {
    /// Whether a higher layer may reasonably try the same route again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouteError::Transport(_) | RouteError::ExhaustedRetries { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_exhausted_retries_wraps_cause() {
        let err = RouteError::ExhaustedRetries {
            region: "us-east".to_string(),
            attempts: 3,
            source: TransportError::Connect("refused".to_string()),
        };

        assert_eq!(err.to_string(), "all 3 attempts in region us-east failed");
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "connection failed: refused");
    }

    #[test]
    fn test_transport_error_is_transparent() {
        let err: RouteError = TransportError::Timeout.into();
        assert_eq!(err.to_string(), "request timed out");
    }

    #[test]
    fn test_is_retryable() {
        assert!(!RouteError::Configuration("x".to_string()).is_retryable());
        assert!(!RouteError::NoHealthyEndpoint {
            region: "eu".to_string()
        }
        .is_retryable());
        assert!(!RouteError::NoRegionAvailable.is_retryable());
        assert!(RouteError::Transport(TransportError::Connect("x".to_string())).is_retryable());
    }
}
