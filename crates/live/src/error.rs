//! Error types for fleetlink-live.

/// Result type alias for fleetlink-live operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for fleetlink-live operations.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional source error.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Create a new error with the given kind and source.
    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if the channel had no open socket.
    pub fn is_not_connected(&self) -> bool {
        matches!(self.kind, ErrorKind::NotConnected)
    }

    /// Returns true if the channel was disposed.
    pub fn is_disposed(&self) -> bool {
        matches!(self.kind, ErrorKind::Disposed)
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The base URL cannot be turned into a WebSocket URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The socket could not be opened.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The handshake did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// No socket is open.
    #[error("Not connected")]
    NotConnected,

    /// The channel was disposed.
    #[error("Channel disposed")]
    Disposed,

    /// A frame did not follow the wire protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Error reported by the WebSocket layer.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        let kind = match &err {
            WsError::Io(io) => ErrorKind::Connection(io.to_string()),
            WsError::Url(url) => ErrorKind::InvalidUrl(url.to_string()),
            WsError::Http(response) => {
                ErrorKind::Connection(format!("Handshake rejected with HTTP {}", response.status()))
            }
            other => ErrorKind::WebSocket(other.to_string()),
        };
        Error::with_source(kind, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Json(err.to_string()), err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::with_source(ErrorKind::InvalidUrl(err.to_string()), err)
    }
}
