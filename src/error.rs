//! Error types for cursor-harvest
//!
//! Two layers live here:
//! - [`FetchError`] classifies the outcome of a single page request. Transient kinds are
//!   absorbed by the retry controller; fatal kinds stop a collection's harvest.
//! - [`Error`] is the crate-wide error returned by every public API.

use std::time::Duration;
use thiserror::Error;

/// Classified failure of a single page fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    // ============================================================================
    // Transient (retryable)
    // ============================================================================
    #[error("Network error: {reason}")]
    TransientNetwork { reason: String },

    #[error("Upstream server error (HTTP {status})")]
    TransientServer { status: u16 },

    #[error("Rate limited (HTTP 429)")]
    TransientRateLimited { retry_after: Option<Duration> },

    // ============================================================================
    // Fatal (not retryable)
    // ============================================================================
    #[error("Authentication failed (HTTP {status}): {body}")]
    FatalAuth { status: u16, body: String },

    #[error("Payment required (HTTP 402): {body}")]
    FatalPaymentRequired { body: String },

    #[error("Collection not found: {url}")]
    FatalNotFound { url: String },

    #[error("Client error (HTTP {status}): {body}")]
    FatalClient { status: u16, body: String },

    #[error("Malformed response: {reason}")]
    FatalSchema { reason: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    /// Create a network error
    pub fn network(reason: impl Into<String>) -> Self {
        Self::TransientNetwork {
            reason: reason.into(),
        }
    }

    /// Create a schema error
    pub fn schema(reason: impl Into<String>) -> Self {
        Self::FatalSchema {
            reason: reason.into(),
        }
    }

    /// Whether the retry controller may try again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork { .. }
                | Self::TransientServer { .. }
                | Self::TransientRateLimited { .. }
        )
    }

    /// Whether this is an account-level payment blocker
    pub fn is_payment_required(&self) -> bool {
        matches!(self, Self::FatalPaymentRequired { .. })
    }

    /// Server-provided wait hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TransientRateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short machine-readable name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientNetwork { .. } => "transient_network",
            Self::TransientServer { .. } => "transient_server",
            Self::TransientRateLimited { .. } => "transient_rate_limited",
            Self::FatalAuth { .. } => "fatal_auth",
            Self::FatalPaymentRequired { .. } => "fatal_payment_required",
            Self::FatalNotFound { .. } => "fatal_not_found",
            Self::FatalClient { .. } => "fatal_client",
            Self::FatalSchema { .. } => "fatal_schema",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

/// The main error type for cursor-harvest
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required config field: {field}")]
    MissingConfigField { field: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Fetch Errors
    // ============================================================================
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ============================================================================
    // Storage Errors
    // ============================================================================
    #[error("Checkpoint error: {message}")]
    Checkpoint { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    // ============================================================================
    // Harvest Errors
    // ============================================================================
    #[error("Harvest of collection '{collection_id}' failed: {source}")]
    Harvest {
        collection_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Collection '{collection_id}' exceeded the page cap of {max_pages} pages")]
    MaxPagesExceeded {
        collection_id: String,
        max_pages: usize,
    },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingConfigField {
            field: field.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a checkpoint error
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Wrap an error with the collection it aborted
    pub fn harvest(collection_id: impl Into<String>, source: Error) -> Self {
        Self::Harvest {
            collection_id: collection_id.into(),
            source: Box::new(source),
        }
    }

    /// The fetch failure at the root of this error, if any
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            Error::Fetch(e) => Some(e),
            Error::Harvest { source, .. } => source.fetch_error(),
            _ => None,
        }
    }

    /// Collection id this error was reported for, if any
    pub fn collection_id(&self) -> Option<&str> {
        match self {
            Error::Harvest { collection_id, .. } | Error::MaxPagesExceeded { collection_id, .. } => {
                Some(collection_id)
            }
            _ => None,
        }
    }

    /// Check if the root cause is an account-level payment blocker
    pub fn is_payment_required(&self) -> bool {
        self.fetch_error()
            .is_some_and(FetchError::is_payment_required)
    }
}

/// Result type alias for cursor-harvest
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("test message");
        assert_eq!(err.to_string(), "Configuration error: test message");

        let err = Error::missing_field("api.base_url");
        assert_eq!(err.to_string(), "Missing required config field: api.base_url");

        let err = Error::harvest("org-1", Error::Fetch(FetchError::FatalNotFound {
            url: "http://x/collection/org-1/items".to_string(),
        }));
        assert_eq!(
            err.to_string(),
            "Harvest of collection 'org-1' failed: Collection not found: http://x/collection/org-1/items"
        );
    }

    #[test]
    fn test_fetch_error_is_transient() {
        assert!(FetchError::network("reset").is_transient());
        assert!(FetchError::TransientServer { status: 503 }.is_transient());
        assert!(FetchError::TransientRateLimited { retry_after: None }.is_transient());

        assert!(!FetchError::FatalAuth {
            status: 401,
            body: String::new()
        }
        .is_transient());
        assert!(!FetchError::FatalPaymentRequired { body: String::new() }.is_transient());
        assert!(!FetchError::schema("bad").is_transient());
        assert!(!FetchError::RetriesExhausted {
            attempts: 5,
            last: Box::new(FetchError::network("reset")),
        }
        .is_transient());
    }

    #[test]
    fn test_payment_required_reported_through_harvest() {
        let err = Error::harvest(
            "org-9",
            Error::Fetch(FetchError::FatalPaymentRequired {
                body: "buy credits".to_string(),
            }),
        );
        assert!(err.is_payment_required());
        assert_eq!(err.collection_id(), Some("org-9"));

        let auth = Error::harvest(
            "org-9",
            Error::Fetch(FetchError::FatalAuth {
                status: 401,
                body: String::new(),
            }),
        );
        assert!(!auth.is_payment_required());
        assert_eq!(auth.fetch_error().map(FetchError::kind), Some("fatal_auth"));
    }

    #[test]
    fn test_retry_after_hint() {
        let err = FetchError::TransientRateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(FetchError::network("x").retry_after(), None);
    }

    #[test]
    fn test_result_context() {
        let result: Result<()> = Err(Error::config("inner"));
        let with_context = result.context("outer");
        assert!(with_context
            .unwrap_err()
            .to_string()
            .contains("outer: Configuration error: inner"));
    }
}
