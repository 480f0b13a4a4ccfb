use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Platform not supported: {0}")]
    UnsupportedPlatform(String),

    #[error("Video not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Upstream rate limit exceeded")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Extraction library error: {0}")]
    Library(String),

    #[error("Parsing error: {0}")]
    Parsing(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cookie store error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ExtractorError {
    /// Network-level failures that another proxy or strategy may get past.
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractorError::Network(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            // Limits are per client address, so another proxy may get through
            ExtractorError::Proxy(_) | ExtractorError::Timeout(_) | ExtractorError::RateLimited => {
                true
            }
            ExtractorError::Library(message) => {
                let lower = message.to_lowercase();
                lower.contains("proxy") || lower.contains("timed out")
            }
            _ => false,
        }
    }

    /// Stable machine-readable name used in error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractorError::InvalidUrl(_) => "invalid_url",
            ExtractorError::InvalidRequest(_) => "invalid_request",
            ExtractorError::UnsupportedPlatform(_) => "unsupported_platform",
            ExtractorError::NotFound(_) => "not_found",
            ExtractorError::Forbidden(_) => "authentication_required",
            ExtractorError::RateLimited => "rate_limited",
            _ => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ExtractorError::InvalidUrl(_)
            | ExtractorError::InvalidRequest(_)
            | ExtractorError::UnsupportedPlatform(_) => StatusCode::BAD_REQUEST,
            ExtractorError::Forbidden(_) => StatusCode::FORBIDDEN,
            ExtractorError::NotFound(_) => StatusCode::NOT_FOUND,
            ExtractorError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ExtractorError::InvalidUrl("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ExtractorError::UnsupportedPlatform("vimeo.com".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ExtractorError::InvalidRequest("max_results".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ExtractorError::Forbidden("cookies".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ExtractorError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ExtractorError::RateLimited.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ExtractorError::Parsing("bad".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(ExtractorError::Proxy("refused".into()).is_transient());
        assert!(ExtractorError::Timeout(30).is_transient());
        assert!(ExtractorError::RateLimited.is_transient());
        assert!(ExtractorError::Library("Unable to connect to proxy".into()).is_transient());
        assert!(!ExtractorError::Library("Video unavailable".into()).is_transient());
        assert!(!ExtractorError::NotFound("x".into()).is_transient());
    }
}
