//! Common error types for Keyline.
//!
//! The variants follow how far a failure reaches: transport, framing and
//! protocol violations end the affected connection, authentication and
//! payload failures only drop the offending message, and configuration
//! errors are fatal at construction.

use thiserror::Error;

/// Result type alias using Keyline's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Keyline operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connect/accept/read/write failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Invalid length prefix or truncated frame
    #[error("framing error: {0}")]
    Framing(String),

    /// Message type not allowed in the current session state
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Authentication tag missing or mismatched
    #[error("authentication failure: {0}")]
    Authentication(String),

    /// Payload could not be parsed or had a mis-typed field
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Connection registry is full
    #[error("capacity exceeded: {0} connections")]
    CapacityExceeded(usize),

    /// Invalid construction parameters
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Diffie-Hellman parameters or exponents out of range
    #[error("key agreement error: {0}")]
    KeyAgreement(String),

    /// Operation requires an established session
    #[error("no active session; run a handshake first")]
    NoActiveSession,

    /// Operation requires an open transport connection
    #[error("not connected")]
    NotConnected,

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation timed out
    #[error("timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Create a framing error from any displayable type.
    pub fn framing(msg: impl std::fmt::Display) -> Self {
        Self::Framing(msg.to_string())
    }

    /// Create a protocol violation from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::ProtocolViolation(msg.to_string())
    }

    /// Create an authentication error from any displayable type.
    pub fn auth(msg: impl std::fmt::Display) -> Self {
        Self::Authentication(msg.to_string())
    }

    /// Create a malformed payload error from any displayable type.
    pub fn malformed(msg: impl std::fmt::Display) -> Self {
        Self::MalformedPayload(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Configuration(msg.to_string())
    }

    /// Create a not found error from any displayable type.
    pub fn not_found(msg: impl std::fmt::Display) -> Self {
        Self::NotFound(msg.to_string())
    }

    /// Create a timeout error from any displayable type.
    pub fn timeout(msg: impl std::fmt::Display) -> Self {
        Self::Timeout(msg.to_string())
    }

    /// Whether this error ends the connection it occurred on.
    ///
    /// Authentication and payload failures only drop the message.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Authentication(_) | Self::MalformedPayload(_) | Self::NoActiveSession
        )
    }
}
