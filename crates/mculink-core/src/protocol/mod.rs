//! Serial Debug Protocol
//!
//! Implements the host side of the MCU debug protocol: fixed-prefix
//! binary frames, a connected/disconnected session state machine, and
//! typed record decoding shared by buffer snapshots and streams.
//!
//! All requests are 3-byte frames (prefix + opcode); replies carry the
//! same prefix. A framing violation is fatal to the session.

pub mod channel;
pub mod commands;
mod error;
pub(crate) mod frame;
pub mod records;
pub mod serial;
mod session;

pub use channel::{Channel, SerialChannel};
pub use commands::Command;
pub use error::ProtocolError;
pub use frame::{
    decode_short, decode_tagged, encode, ShortReply, ACK_BYTE, FRAME_PREFIX, NACK_BYTE,
    SHORT_REPLY_LEN,
};
pub use records::{RecordType, RecordValue};
pub use serial::{list_ports, open_port, PortInfo};
pub use session::{Session, SessionConfig};

/// Default baud rate for the debug link
pub const DEFAULT_BAUD_RATE: u32 = 500_000;

/// Default reply timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 500;
