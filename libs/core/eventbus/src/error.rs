//! Error types for the event bus.

use thiserror::Error;

/// Error that can occur in event bus operations.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// Invalid argument detected before any network activity
    #[error("validation error: {0}")]
    Validation(String),

    /// Credentials could not be applied to the connection
    #[error("authentication setup failed: {0}")]
    Auth(String),

    /// Initial connect failed
    #[error("NATS connection error: {0}")]
    Connection(String),

    /// Stream lookup failed for a reason other than "not found"
    #[error("failed to check stream {stream}: {message}")]
    StreamLookup { stream: String, message: String },

    /// Stream does not exist
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Stream was created concurrently by someone else
    #[error("stream already exists: {0}")]
    StreamAlreadyExists(String),

    /// Stream creation failed
    #[error("failed to create stream {stream}: {message}")]
    StreamCreate { stream: String, message: String },

    /// Publishing a single message failed
    #[error("publish message {index} failed: {message}")]
    Publish { index: usize, message: String },

    /// Connection flush failed
    #[error("flush NATS connection failed: {0}")]
    Flush(String),

    /// Subscription could not be created or released
    #[error("subscription error: {0}")]
    Subscribe(String),

    /// Fetching from a durable consumer failed
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Ack or nak could not be delivered
    #[error("acknowledge error: {0}")]
    Acknowledge(String),

    /// Draining the connection failed
    #[error("drain NATS connection failed: {0}")]
    Drain(String),

    /// The producer has been closed
    #[error("producer is closed")]
    ProducerClosed,

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl EventBusError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a publish error for the message at `index` in its batch.
    pub fn publish(index: usize, error: impl std::fmt::Display) -> Self {
        Self::Publish {
            index,
            message: error.to_string(),
        }
    }

    /// Check if this is a caller mistake (never retried).
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::ProducerClosed)
    }

    /// Check if this is an initial connect or auth failure.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Auth(_))
    }

    /// Check if this means the stream is absent.
    pub fn is_stream_not_found(&self) -> bool {
        matches!(self, Self::StreamNotFound(_))
    }
}
