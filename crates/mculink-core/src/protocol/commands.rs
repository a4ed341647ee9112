//! Protocol commands
//!
//! Defines the request opcodes understood by the device firmware.

use serde::{Deserialize, Serialize};

use super::frame;

/// Commands the host can send over the debug link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Establish a debug connection (must be the first exchange)
    EstablishConnection,

    /// Close an established connection
    CloseConnection,

    /// Keep an established connection alive
    KeepAlive,

    /// Read the device error log
    ReadErrorLog,

    /// Read debug-buffer count and record count per buffer
    ReadBufferProperties,

    /// Read one debug buffer; the 1-based index is folded into the opcode
    ReadBuffer(u8),

    /// Start the active telemetry stream
    StartStream,

    /// Tag carried by every stream data message
    StreamData,

    /// Stop the active telemetry stream
    StopStream,

    /// Fire a user-defined generic request, numbered 1..=16
    GenericRequest(u8),
}

impl Command {
    /// Get the opcode byte for this command
    pub fn opcode(&self) -> u8 {
        match self {
            Command::EstablishConnection => 0x01,
            Command::CloseConnection => 0x02,
            Command::KeepAlive => 0x03,
            Command::ReadErrorLog => 0x08,
            Command::ReadBufferProperties => 0x10,
            // Callers range-check sub-indices before building a frame;
            // the arithmetic itself must stay total.
            Command::ReadBuffer(i) => 0x10u8.wrapping_add(*i),
            Command::StartStream => 0x31,
            Command::StreamData => 0x32,
            Command::StopStream => 0x33,
            Command::GenericRequest(n) => 0x3Fu8.wrapping_add(*n),
        }
    }

    /// Recover a command from an opcode byte
    pub fn from_opcode(opcode: u8) -> Option<Command> {
        match opcode {
            0x01 => Some(Command::EstablishConnection),
            0x02 => Some(Command::CloseConnection),
            0x03 => Some(Command::KeepAlive),
            0x08 => Some(Command::ReadErrorLog),
            0x10 => Some(Command::ReadBufferProperties),
            0x11..=0x30 => Some(Command::ReadBuffer(opcode - 0x10)),
            0x31 => Some(Command::StartStream),
            0x32 => Some(Command::StreamData),
            0x33 => Some(Command::StopStream),
            0x40..=0x4F => Some(Command::GenericRequest(opcode - 0x40 + 1)),
            _ => None,
        }
    }

    /// Build the 3-byte request frame for this command
    pub fn to_frame(&self) -> [u8; 3] {
        frame::encode(self.opcode())
    }
}
