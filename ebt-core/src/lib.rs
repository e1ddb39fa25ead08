pub mod identity;
pub mod notify;
pub mod payment;
pub mod retry;
pub mod supplier;
pub mod vault;
pub mod voucher;

pub use identity::{Actor, ActorRole};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    Network,
    Timeout,
    Server(u16),
    Rejected,
}

/// Failure reported by a processor, inventory provider, rate source or bus.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub message: String,
}

impl UpstreamError {
    pub fn new(kind: UpstreamErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Timeout, message)
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Server(status), message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Rejected, message)
    }

    /// Network resets, timeouts and 5xx responses may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            UpstreamErrorKind::Network | UpstreamErrorKind::Timeout => true,
            UpstreamErrorKind::Server(status) => status >= 500,
            UpstreamErrorKind::Rejected => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Concurrent modification: {0}")]
    Conflict(String),
    #[error("{service} failure: {source}")]
    Upstream {
        service: &'static str,
        #[source]
        source: UpstreamError,
    },
    #[error("{0}")]
    Crypto(&'static str),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    pub fn upstream(service: &'static str, source: UpstreamError) -> Self {
        CoreError::Upstream { service, source }
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        CoreError::NotFound(format!("{} {}", what, id))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(UpstreamError::network("reset").is_retryable());
        assert!(UpstreamError::timeout("slow").is_retryable());
        assert!(UpstreamError::server(503, "down").is_retryable());
        assert!(!UpstreamError::server(429, "busy").is_retryable());
        assert!(!UpstreamError::rejected("card declined").is_retryable());
    }
}
