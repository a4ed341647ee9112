//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the device
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The serial link failed mid-operation
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// The serial port could not be opened or configured
    #[error("Cannot open transport: {0}")]
    TransportUnavailable(String),

    /// The device sent nothing within the reply timeout
    #[error("Device reply timed out")]
    Timeout,

    /// An operation was attempted without an established connection
    #[error("Not connected to device")]
    NotConnected,

    /// The device answered with a Nack
    #[error("Device declined the request")]
    Declined,

    /// A reply had the wrong length, prefix, opcode tag or marker
    #[error("Framing error: {0}")]
    FramingError(String),

    /// The negotiated stream shape violates its invariants
    #[error("Malformed stream descriptor: {0}")]
    MalformedDescriptor(String),

    /// A request was rejected locally before touching the transport
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller interrupted a long-running operation
    #[error("Operation cancelled")]
    Cancelled,

    /// An underlying I/O operation failed
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
