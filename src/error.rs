//! Unified error handling for the reis-sync crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`ReisErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use reis_sync::error::{Error, ReisErrorTrait};
//! use reis_sync::models::Language;
//!
//! fn report(err: &Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!("{}; retrying on the next sync", err.localized_desc(Language::En));
//!     } else {
//!         tracing::error!("{err}");
//!     }
//! }
//! ```

use crate::i18n::t;
use crate::models::Language;
use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::booking::BookingError;
pub use crate::cache::StoreError;
pub use crate::utils::error::{BridgeError, CrawlerError, FetchError, ParseError};

/// Common trait for all reis-sync error types
pub trait ReisErrorTrait: std::error::Error {
    /// Check if this error is recoverable (a later attempt may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get a localized description for user-facing messages
    fn localized_desc(&self, lang: Language) -> String;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, rate limit, server errors)
    Network,
    /// Missing or expired portal session (401 / 403)
    Auth,
    /// Correlated request timed out
    Timeout,
    /// Parsing and data extraction errors
    Parsing,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Exam booking errors
    Booking,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Get localized description for the category
    pub fn localized_desc(&self, lang: Language) -> String {
        let locale = lang.locale();
        match self {
            Self::Network => t!("errors.category.network", locale = locale).to_string(),
            Self::Auth => t!("errors.category.auth", locale = locale).to_string(),
            Self::Timeout => t!("errors.category.timeout", locale = locale).to_string(),
            Self::Parsing => t!("errors.category.parsing", locale = locale).to_string(),
            Self::Storage => t!("errors.category.storage", locale = locale).to_string(),
            Self::Config => t!("errors.category.config", locale = locale).to_string(),
            Self::Booking => t!("errors.category.booking", locale = locale).to_string(),
            Self::Other => t!("errors.category.other", locale = locale).to_string(),
        }
    }
}

/// Unified error type for the reis-sync crate
#[derive(Error, Debug)]
pub enum Error {
    /// Crawler-related errors (fetch, parse, crawl)
    #[error("Crawler error: {0}")]
    Crawler(#[from] CrawlerError),

    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Parse-specific errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Message bridge errors
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Cache store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Booking scheduler errors
    #[error("Booking error: {0}")]
    Booking(#[from] BookingError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ReisErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Crawler(e) => e.is_recoverable(),
            Self::Fetch(e) => e.is_recoverable(),
            Self::Parse(_) => false,
            Self::Bridge(e) => e.is_recoverable(),
            Self::Store(_) => false,
            Self::Booking(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn localized_desc(&self, lang: Language) -> String {
        let locale = lang.locale();
        match self {
            Self::Crawler(e) => e.localized_desc(lang),
            Self::Fetch(e) => e.localized_desc(lang),
            Self::Parse(e) => e.localized_desc(lang),
            Self::Bridge(e) => e.localized_desc(lang),
            Self::Store(e) => format!("{}: {e}", t!("errors.store.error", locale = locale)),
            Self::Booking(e) => e.localized_desc(lang),
            Self::Io(e) => format!("{}: {e}", t!("errors.io.error", locale = locale)),
            Self::Config(msg) => format!("{}: {msg}", t!("errors.config.error", locale = locale)),
            Self::Other { context, .. } => context.clone(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Crawler(CrawlerError::Parse(_)) | Self::Parse(_) => ErrorCategory::Parsing,
            Self::Crawler(e) if e.is_auth() => ErrorCategory::Auth,
            Self::Fetch(e) if e.is_auth() => ErrorCategory::Auth,
            Self::Crawler(_) | Self::Fetch(_) => ErrorCategory::Network,
            Self::Bridge(e) if e.is_timeout() => ErrorCategory::Timeout,
            Self::Bridge(_) => ErrorCategory::Network,
            Self::Store(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Booking(_) => ErrorCategory::Booking,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let fetch_err = Error::Fetch(FetchError::Timeout);
        assert_eq!(fetch_err.category(), ErrorCategory::Network);

        let auth_err = Error::Fetch(FetchError::Auth { status: 401 });
        assert_eq!(auth_err.category(), ErrorCategory::Auth);

        let crawl_auth: Error = CrawlerError::from(FetchError::Auth { status: 403 }).into();
        assert_eq!(crawl_auth.category(), ErrorCategory::Auth);

        let parse_err = Error::Parse(ParseError::MissingElement("#table_1"));
        assert_eq!(parse_err.category(), ErrorCategory::Parsing);

        let timeout = Error::Bridge(BridgeError::Timeout {
            kind: "FETCH",
            id: "1".into(),
            timeout_ms: 10,
        });
        assert_eq!(timeout.category(), ErrorCategory::Timeout);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::Fetch(FetchError::Timeout).is_recoverable());
        assert!(!Error::Parse(ParseError::MissingElement("table")).is_recoverable());
        assert!(!Error::Booking(BookingError::TermNotFound("1".into())).is_recoverable());
    }

    #[test]
    fn test_localized_desc_differs_by_language() {
        let err = Error::Fetch(FetchError::Auth { status: 401 });
        assert_ne!(err.localized_desc(Language::Cz), err.localized_desc(Language::En));
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing studium");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("Something went wrong");
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.localized_desc(Language::En), "Something went wrong");
    }

    #[test]
    fn test_category_descriptions() {
        assert_ne!(
            ErrorCategory::Network.localized_desc(Language::Cz),
            ErrorCategory::Network.localized_desc(Language::En)
        );
    }
}
