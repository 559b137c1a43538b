//! Error types for fleetlink-client.
//!
//! Every failed request surfaces exactly one classified [`Error`]. The
//! classification is carried by [`ErrorKind`]; the request context (status,
//! endpoint, method, server detail payload) rides along on the error itself.

use crate::request::RequestMethod;

/// Result type alias for fleetlink-client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for fleetlink-client operations.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// HTTP status code, when the server answered.
    pub status: Option<u16>,
    /// Path of the request that failed.
    pub endpoint: Option<String>,
    /// Method of the request that failed.
    pub method: Option<RequestMethod>,
    /// Structured payload returned by the server alongside the error.
    pub details: Option<serde_json::Value>,
    /// Optional source error.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            status: None,
            endpoint: None,
            method: None,
            details: None,
            source: None,
        }
    }

    /// Create a new error with the given kind and source.
    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            source: Some(Box::new(source)),
            ..Self::new(kind)
        }
    }

    /// Attach the HTTP status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach the request method and endpoint.
    pub fn with_request(mut self, method: RequestMethod, endpoint: impl Into<String>) -> Self {
        self.method = Some(method);
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Attach the server's structured detail payload.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Human-readable message without the kind prefix.
    pub fn message(&self) -> &str {
        self.kind.message()
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns true if the server rejected the credentials (HTTP 401).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.kind, ErrorKind::Unauthorized(_))
    }

    /// Returns true for 403 responses, including suspended tenants.
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Forbidden(_) | ErrorKind::TenantSuspended(_)
        )
    }

    /// Returns true for transport failures and timeouts.
    pub fn is_network(&self) -> bool {
        matches!(self.kind, ErrorKind::Network(_))
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Request rejected as invalid (HTTP 400).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or expired credentials (HTTP 401).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed (HTTP 403).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The tenant behind the account has been suspended (HTTP 403).
    #[error("Tenant suspended: {0}")]
    TenantSuspended(String),

    /// Resource not found (HTTP 404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Server-side failure (HTTP 500, 502, 503).
    #[error("Server error: {status} {message}")]
    Server { status: u16, message: String },

    /// Timeout, connection failure or gateway timeout.
    #[error("Network error: {0}")]
    Network(String),

    /// Any other non-success response.
    #[error("API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The token store failed to load, save or clear the session.
    #[error("Token store error: {0}")]
    TokenStore(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl ErrorKind {
    /// Returns true if this error kind is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorKind::Network(_) => true,
            ErrorKind::Server { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// The message carried by this kind.
    pub fn message(&self) -> &str {
        match self {
            ErrorKind::Validation(m)
            | ErrorKind::Unauthorized(m)
            | ErrorKind::Forbidden(m)
            | ErrorKind::TenantSuspended(m)
            | ErrorKind::NotFound(m)
            | ErrorKind::Network(m)
            | ErrorKind::Api(m)
            | ErrorKind::Json(m)
            | ErrorKind::Config(m)
            | ErrorKind::TokenStore(m)
            | ErrorKind::Other(m) => m,
            ErrorKind::Server { message, .. } => message,
        }
    }
}

/// Statuses that are worth re-sending unchanged.
pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503 | 504)
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Network(format!("Request timed out: {}", err))
        } else if err.is_connect() || err.is_request() {
            ErrorKind::Network(err.to_string())
        } else if err.is_builder() {
            ErrorKind::Config(err.to_string())
        } else if err.is_decode() {
            ErrorKind::Json(err.to_string())
        } else {
            ErrorKind::Other(err.to_string())
        };

        let status = err.status().map(|s| s.as_u16());
        let mut error = Error::with_source(kind, err);
        error.status = status;
        error
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Json(err.to_string()), err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::with_source(ErrorKind::Config(format!("Invalid URL: {}", err)), err)
    }
}
