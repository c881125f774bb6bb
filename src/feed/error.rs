use thiserror::Error;

/// Broad class of a fetch failure; decides how the fetcher reacts to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Worth retrying on the same candidate URL
    Transient,
    /// The response arrived but is unusable; move on to the next candidate
    Structural,
    /// Retrying cannot help; abort the whole fetch
    Configuration,
}

/// Errors that can occur while fetching one feed through the relay.
///
/// `Clone` because a single in-flight result is handed to every caller that
/// joined the request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// No relay base URL configured
    #[error("No fetch proxy configured")]
    NoProxy,
    /// Relay base URL could not be parsed
    #[error("Invalid proxy base URL: {0}")]
    InvalidProxyBase(String),
    /// URL produced no candidates to try
    #[error("No candidate URLs for feed")]
    NoCandidates,
    /// Network-level error (DNS, connection, TLS, body read)
    #[error("Request failed: {0}")]
    Network(String),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request (including body read) exceeded the timeout, in milliseconds
    #[error("Request timed out after {0} ms")]
    Timeout(u64),
    /// Relay answered with an HTML page instead of feed data
    #[error("Expected feed data but received HTML")]
    WrongContent,
    /// Body is not valid feed JSON
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Network(_) | FetchError::HttpStatus(_) | FetchError::Timeout(_) => {
                ErrorKind::Transient
            }
            FetchError::WrongContent | FetchError::Parse(_) | FetchError::ResponseTooLarge => {
                ErrorKind::Structural
            }
            FetchError::NoProxy | FetchError::InvalidProxyBase(_) | FetchError::NoCandidates => {
                ErrorKind::Configuration
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(e.to_string())
    }
}

/// Failure of a whole feed sync: the fetch or the store.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Database error: {0}")]
    Database(String),
}

impl SyncError {
    pub(crate) fn database(e: impl std::fmt::Display) -> Self {
        SyncError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(FetchError::Timeout(10_000).kind(), ErrorKind::Transient);
        assert_eq!(FetchError::HttpStatus(404).kind(), ErrorKind::Transient);
        assert_eq!(FetchError::Network("reset".into()).kind(), ErrorKind::Transient);
        assert_eq!(FetchError::WrongContent.kind(), ErrorKind::Structural);
        assert_eq!(FetchError::Parse("eof".into()).kind(), ErrorKind::Structural);
        assert_eq!(FetchError::NoProxy.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(FetchError::HttpStatus(503).is_retryable());
        assert!(!FetchError::WrongContent.is_retryable());
        assert!(!FetchError::ResponseTooLarge.is_retryable());
        assert!(!FetchError::NoProxy.is_retryable());
    }

    #[test]
    fn test_sync_error_message_passes_through() {
        let err = SyncError::from(FetchError::HttpStatus(500));
        assert_eq!(err.to_string(), "HTTP error: status 500");
    }
}
