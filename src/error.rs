//! Error types for the Kinetic client
//!
//! Provides a unified error type for all operations.
//!
//! Device-reported outcomes (not found, version mismatch, ...) are NOT errors
//! here: they travel to the caller as a [`Status`](crate::Status) inside a
//! completion. This type covers local and transport failures only.

use thiserror::Error;

use crate::network::SequenceNumber;
use crate::protocol::OperationKind;

/// Result type alias using KineticError
pub type Result<T> = std::result::Result<T, KineticError>;

/// Unified error type for Kinetic client operations
#[derive(Debug, Error)]
pub enum KineticError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Connect Errors
    // -------------------------------------------------------------------------
    #[error("Connection refused by {0}")]
    ConnectionRefused(String),

    #[error("Cluster version mismatch: expected {expected}, device reports {actual}")]
    ClusterVersionMismatch { expected: i64, actual: i64 },

    #[error("Timed out waiting for handshake from {0}")]
    HandshakeTimeout(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    // -------------------------------------------------------------------------
    // Connection Errors (fatal to the connection)
    // -------------------------------------------------------------------------
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    // -------------------------------------------------------------------------
    // Submission Errors
    // -------------------------------------------------------------------------
    #[error("Not connected")]
    NotConnected,

    #[error("Too many outstanding operations (limit {limit})")]
    BackpressureExceeded { limit: usize },

    // -------------------------------------------------------------------------
    // Dispatch Errors
    // -------------------------------------------------------------------------
    #[error("Unsolicited response for sequence {0}")]
    UnsolicitedResponse(SequenceNumber),

    #[error("Response for sequence {sequence} is a {actual:?} response, expected {expected:?}")]
    MismatchedResponse {
        sequence: SequenceNumber,
        expected: OperationKind,
        actual: OperationKind,
    },

    #[error("Duplicate sequence number {0} in operation table")]
    DuplicateSequence(SequenceNumber),

    #[error("No pending operation for sequence {0}")]
    OperationNotFound(SequenceNumber),

    // -------------------------------------------------------------------------
    // Data Errors
    // -------------------------------------------------------------------------
    #[error("Buffer overrun: need {needed} bytes, {remaining} remaining")]
    BufferOverrun { needed: usize, remaining: usize },

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl KineticError {
    /// Whether this error leaves the connection unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KineticError::Io(_)
                | KineticError::Framing(_)
                | KineticError::Authentication(_)
                | KineticError::ConnectionClosed
                | KineticError::DuplicateSequence(_)
        )
    }
}

impl From<bincode::Error> for KineticError {
    fn from(e: bincode::Error) -> Self {
        KineticError::Serialization(e.to_string())
    }
}
