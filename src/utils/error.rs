//! Error types for fetching, parsing, crawling and the message bridge
//!
//! This module defines the domain error types used throughout the crate.

use crate::i18n::t;
use crate::models::Language;
use thiserror::Error;

/// Errors that can occur during authenticated HTTP fetching
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Session missing or expired (401 / 403)
    #[error("Authentication required (status {status})")]
    Auth { status: u16 },

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Server error with status code
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts exceeded")]
    MaxRetriesExceeded,

    /// Content decoding error
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Fetch relayed through the message bridge failed
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl FetchError {
    /// Map a non-success HTTP status to an error
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth { status },
            429 => Self::RateLimit,
            other => Self::ServerError(other),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimit | Self::Timeout | Self::MaxRetriesExceeded => true,
            Self::ServerError(status) => *status >= 500,
            Self::Bridge(e) => e.is_recoverable(),
            Self::Auth { .. } | Self::Decode(_) | Self::InvalidUrl(_) => false,
        }
    }

    pub fn localized_desc(&self, lang: Language) -> String {
        let locale = lang.locale();
        match self {
            Self::Http(e) => format!("{}: {e}", t!("errors.fetch.http", locale = locale)),
            Self::Auth { .. } => t!("errors.fetch.auth", locale = locale).to_string(),
            Self::RateLimit => t!("errors.fetch.rate_limit", locale = locale).to_string(),
            Self::ServerError(status) => {
                format!("{} ({status})", t!("errors.fetch.server", locale = locale))
            }
            Self::Timeout => t!("errors.fetch.timeout", locale = locale).to_string(),
            Self::MaxRetriesExceeded => t!("errors.fetch.max_retries", locale = locale).to_string(),
            Self::Decode(msg) => format!("{}: {msg}", t!("errors.fetch.decode", locale = locale)),
            Self::InvalidUrl(url) => {
                format!("{}: {url}", t!("errors.fetch.invalid_url", locale = locale))
            }
            Self::Bridge(e) => e.localized_desc(lang),
        }
    }
}

/// Errors raised when portal HTML does not have the expected shape
#[derive(Error, Debug)]
pub enum ParseError {
    /// A required element is missing from the page
    #[error("Missing element: {0}")]
    MissingElement(&'static str),

    /// The page was recognised but a value could not be read
    #[error("Unexpected page shape: {0}")]
    UnexpectedShape(String),

    /// JSON endpoint returned an unexpected document
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl ParseError {
    pub fn localized_desc(&self, lang: Language) -> String {
        format!("{}: {self}", t!("errors.parse.error", locale = lang.locale()))
    }
}

/// General crawler errors
#[derive(Error, Debug)]
pub enum CrawlerError {
    /// Fetch error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Folder reference is not a document-server URL
    #[error("Invalid folder URL: {0}")]
    InvalidFolderUrl(String),

    /// Subject lacks the identifiers needed for this request
    #[error("Subject {0} has no portal identifiers")]
    MissingIdentifiers(String),
}

impl CrawlerError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Fetch(e) if e.is_auth())
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Parse(_) | Self::InvalidFolderUrl(_) | Self::MissingIdentifiers(_) => false,
        }
    }

    pub fn localized_desc(&self, lang: Language) -> String {
        match self {
            Self::Fetch(e) => e.localized_desc(lang),
            Self::Parse(e) => e.localized_desc(lang),
            Self::InvalidFolderUrl(url) => format!(
                "{}: {url}",
                t!("errors.crawler.invalid_folder", locale = lang.locale())
            ),
            Self::MissingIdentifiers(code) => format!(
                "{}: {code}",
                t!("errors.crawler.missing_ids", locale = lang.locale())
            ),
        }
    }
}

/// Errors of the request/response message bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// No correlated response arrived in time
    #[error("Request timeout: {kind} {id} after {timeout_ms} ms")]
    Timeout {
        kind: &'static str,
        id: String,
        timeout_ms: u64,
    },

    /// The other side answered with `success: false`
    #[error("Remote error: {0}")]
    Remote(String),

    /// The channel was closed before the message could be delivered
    #[error("Channel closed")]
    ChannelClosed,

    /// Message could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Stream I/O failure on a framed channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Response payload had an unexpected type
    #[error("Unexpected payload: {0}")]
    UnexpectedPayload(String),
}

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Remote(_))
    }

    pub fn localized_desc(&self, lang: Language) -> String {
        let locale = lang.locale();
        match self {
            Self::Timeout { .. } => t!("errors.bridge.timeout", locale = locale).to_string(),
            Self::ChannelClosed => t!("errors.bridge.closed", locale = locale).to_string(),
            other => format!("{}: {other}", t!("errors.bridge.error", locale = locale)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(FetchError::from_status(401).is_auth());
        assert!(FetchError::from_status(403).is_auth());
        assert!(matches!(FetchError::from_status(429), FetchError::RateLimit));
        assert!(matches!(
            FetchError::from_status(502),
            FetchError::ServerError(502)
        ));
    }

    #[test]
    fn test_recoverability() {
        assert!(FetchError::Timeout.is_recoverable());
        assert!(FetchError::ServerError(503).is_recoverable());
        assert!(!FetchError::ServerError(404).is_recoverable());
        assert!(!FetchError::Auth { status: 401 }.is_recoverable());

        let crawl: CrawlerError = FetchError::Auth { status: 403 }.into();
        assert!(crawl.is_auth());
        assert!(!crawl.is_recoverable());
    }

    #[test]
    fn test_timeout_message_names_request() {
        let err = BridgeError::Timeout {
            kind: "FETCH",
            id: "abc".into(),
            timeout_ms: 30_000,
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Request timeout: FETCH abc after 30000 ms");
    }
}
