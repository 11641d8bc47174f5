use thiserror::Error;

/// Errors surfaced by the client.
///
/// Errors that abort a caller-initiated operation are returned from that
/// operation. Errors raised while processing unsolicited inbound traffic
/// (`Decode`, handler panics) and automatic reconnect failures are only
/// logged.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The transport failed to establish, was rejected, or the attempt was
    /// abandoned by a concurrent `close()`.
    #[error("connect failed: {0}")]
    Connect(String),

    /// An outbound operation was attempted while the connection was not open.
    #[error("not connected")]
    NotConnected,

    /// An inbound frame was not a valid envelope.
    #[error("invalid inbound envelope: {0}")]
    Decode(String),

    /// A correlated wait exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The transport rejected a write.
    #[error("send failed: {0}")]
    Send(String),

    /// The connection closed while a correlated wait was outstanding.
    #[error("connection lost")]
    ConnectionLost,

    /// A `Link` from an earlier connection was used after a reconnect.
    #[error("stale connection handle")]
    StaleConnection,

    /// An outbound envelope could not be built.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required configuration value was not provided.
    #[error("missing required configuration: {0}")]
    MissingConfig(String),

    /// Configuration values contradict each other or are out of range.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// Transport construction or I/O failure outside the other categories.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, RpcError>;
