//! Error types for wadesk.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Send rejected: {0}")]
    Send(#[from] SendError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by the messaging transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport {name} is not connected")]
    NotConnected { name: String },

    #[error("Failed to send on transport {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid frame from transport: {0}")]
    InvalidFrame(String),

    #[error("Transport {name} disconnected: {reason}")]
    Disconnected { name: String, reason: String },
}

/// Synchronous rejections of an outbound send, raised before anything is queued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("recipient required")]
    MissingRecipient,

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("text required")]
    EmptyText,

    #[error("recipient {0} is not in the send allowlist")]
    NotAllowed(String),

    #[error("transport not ready ({status})")]
    NotReady { status: String },
}

/// Inbound processing errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid inbound message: {0}")]
    InvalidMessage(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
