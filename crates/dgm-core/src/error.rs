//! Error types for the DGM event bus.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Connection errors
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection retry budget exhausted after {attempts} attempts: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: String },

    #[error("Not connected to broker")]
    NotConnected,

    // Publish errors
    #[error("Publish to {subject} failed: {reason}")]
    Publish { subject: String, reason: String },

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    // Subscribe errors
    #[error("Invalid subject pattern: {0}")]
    InvalidPattern(String),

    #[error("Subscribe to {subject} failed: {reason}")]
    Subscribe { subject: String, reason: String },

    // Handler errors
    #[error("Handler failed for event {event_id} on {subject}: {reason}")]
    Handler {
        subject: String,
        event_id: String,
        reason: String,
    },

    // Envelope errors
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Lifecycle
    #[error("Shutdown in progress")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
