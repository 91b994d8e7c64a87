//! Error types for the natural voice client library.

use thiserror::Error;

/// Error type for synthesis operations.
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket connection error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Socket or proxy I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Endpoint or proxy URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// No endpoint configured before `speak`.
    #[error("Synthesizer not configured")]
    NotConfigured,

    /// Connection timeout.
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// The proxy refused or failed the CONNECT tunnel.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// A frame did not follow the wire format.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The audio decoder rejected a chunk.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// An event handler or callback panicked.
    #[error("Handler panicked: {0}")]
    HandlerPanic(String),

    /// The connection closed with a transport error.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The pipeline shut down before the turn resolved.
    #[error("Synthesizer is shut down")]
    Shutdown,
}

/// Error reported by an [`AudioDecoder`](crate::AudioDecoder).
#[derive(Error, Debug)]
#[error("{message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    /// Creates a decode error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
