//! Session management
//!
//! Owns the transport and the single `connected` flag that gates every
//! protocol operation. The flag is set only by a successful
//! `establish()` and cleared by `close()` or by any protocol
//! violation; there is no retry or reconnection anywhere.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    channel::{read_reply, Channel, SerialChannel},
    frame::{self, ShortReply, SHORT_REPLY_LEN},
    serial::open_port,
    Command, ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS,
};

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate; must match the firmware's UART setting
    pub baud_rate: u32,
    /// Reply timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// A debug-link session over one transport
pub struct Session {
    channel: Box<dyn Channel>,
    connected: bool,
    read_timeout: Duration,
}

impl Session {
    /// Open the configured serial port and wrap it in a session.
    ///
    /// The session starts disconnected; call [`Session::establish`]
    /// before any other operation.
    pub fn open(config: &SessionConfig) -> Result<Self, ProtocolError> {
        let port = open_port(
            &config.port_name,
            config.baud_rate,
            Duration::from_millis(config.timeout_ms),
        )?;
        info!(port = %config.port_name, baud = config.baud_rate, "serial port opened");
        let mut session = Self::new(Box::new(SerialChannel::new(port)));
        session.read_timeout = Duration::from_millis(config.timeout_ms);
        Ok(session)
    }

    /// Create a session over an already-open channel
    pub fn new(channel: Box<dyn Channel>) -> Self {
        Self {
            channel,
            connected: false,
            read_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Whether a debug connection is currently established
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Tell the device the host wants a debug connection.
    ///
    /// Must be the first exchange; the device may ignore other requests
    /// until a connection is established. Success requires a 3-byte Ack
    /// reply. Any short read or non-Ack reply leaves the session
    /// disconnected and is not retried.
    pub fn establish(&mut self) -> Result<(), ProtocolError> {
        self.connected = false;
        // Drop stale bytes left over from a previous run
        self.channel.clear_input_buffer()?;
        self.channel
            .write_all(&Command::EstablishConnection.to_frame())?;
        let reply = read_reply(self.channel.as_mut(), SHORT_REPLY_LEN)?;
        if reply.is_empty() {
            warn!("device is not responding to connection request");
            return Err(ProtocolError::Timeout);
        }
        match frame::decode_short(&reply)? {
            ShortReply::Ack => {
                self.connected = true;
                info!("debug connection established");
                Ok(())
            }
            ShortReply::Nack => Err(ProtocolError::Declined),
            ShortReply::Other(b) => Err(ProtocolError::FramingError(format!(
                "unexpected connect reply marker {:#04x}",
                b
            ))),
        }
    }

    /// Close an established connection.
    ///
    /// No-op when already disconnected. The close reply is drained and
    /// discarded; a missing or garbled reply is not an error, the
    /// session ends up disconnected regardless.
    pub fn close(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if self
            .channel
            .write_all(&Command::CloseConnection.to_frame())
            .is_ok()
        {
            let _ = read_reply(self.channel.as_mut(), SHORT_REPLY_LEN);
        }
        debug!("debug connection closed");
    }

    /// Keep an established connection alive
    pub fn keep_alive(&mut self) -> Result<(), ProtocolError> {
        self.acknowledged_exchange(Command::KeepAlive)
    }

    /// Fire a user-defined generic request, numbered 1..=16.
    ///
    /// An out-of-range number is rejected locally without touching the
    /// transport or the session state.
    pub fn generic_request(&mut self, request: u8) -> Result<(), ProtocolError> {
        if request == 0 || request > 16 {
            return Err(ProtocolError::InvalidRequest(format!(
                "generic request {} out of range 1..=16",
                request
            )));
        }
        debug!(request, "sending generic request");
        self.acknowledged_exchange(Command::GenericRequest(request))
    }

    /// Send a command and require a 3-byte Ack back.
    ///
    /// Nack and framing violations are both session-fatal.
    fn acknowledged_exchange(&mut self, cmd: Command) -> Result<(), ProtocolError> {
        self.ensure_connected()?;
        self.send_frame(cmd)?;
        let reply = self.read_exact_reply(SHORT_REPLY_LEN)?;
        match frame::decode_short(&reply) {
            Ok(ShortReply::Ack) => Ok(()),
            Ok(ShortReply::Nack) => {
                self.connected = false;
                Err(ProtocolError::Declined)
            }
            Ok(ShortReply::Other(b)) => Err(self.fail_framing(format!(
                "unexpected reply marker {:#04x} for opcode {:#04x}",
                b,
                cmd.opcode()
            ))),
            Err(e) => {
                self.connected = false;
                Err(e)
            }
        }
    }

    /// Guard: fail with `NotConnected` before any transport I/O
    pub(crate) fn ensure_connected(&self) -> Result<(), ProtocolError> {
        if self.connected {
            Ok(())
        } else {
            Err(ProtocolError::NotConnected)
        }
    }

    /// Write one request frame
    pub(crate) fn send_frame(&mut self, cmd: Command) -> Result<(), ProtocolError> {
        self.channel.write_all(&cmd.to_frame()).map_err(|e| {
            self.connected = false;
            ProtocolError::IoError(e)
        })
    }

    /// Read a reply that must be exactly `len` bytes.
    ///
    /// A short read means the device and host disagree about the
    /// exchange, which is fatal to the session.
    pub(crate) fn read_exact_reply(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        let reply = self.read_raw(len)?;
        if reply.len() != len {
            return Err(self.fail_framing(format!(
                "reply has {} bytes, expected {}",
                reply.len(),
                len
            )));
        }
        Ok(reply)
    }

    /// Read up to `len` bytes; a short or empty result is left to the
    /// caller to judge (the streaming loop treats empty as a timeout
    /// tick, not a violation)
    pub(crate) fn read_raw(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        read_reply(self.channel.as_mut(), len).map_err(|e| {
            self.connected = false;
            ProtocolError::IoError(e)
        })
    }

    /// Validate a tagged reply, killing the session on mismatch
    pub(crate) fn expect_tagged<'a>(
        &mut self,
        reply: &'a [u8],
        opcode: u8,
        expected_len: usize,
    ) -> Result<&'a [u8], ProtocolError> {
        match frame::decode_tagged(reply, opcode, expected_len) {
            Ok(payload) => Ok(payload),
            Err(e) => {
                self.connected = false;
                Err(e)
            }
        }
    }

    /// The configured request/reply timeout; callers that shorten the
    /// channel timeout must restore this value afterwards
    pub(crate) fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Change the transport read timeout; streaming uses a shorter
    /// window than request/reply exchanges
    pub(crate) fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
        self.channel
            .set_timeout(timeout)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))
    }

    /// Clear the connected flag after a protocol violation
    pub(crate) fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    /// Session-fatal framing violation
    pub(crate) fn fail_framing(&mut self, message: String) -> ProtocolError {
        warn!(%message, "framing violation, session dead");
        self.connected = false;
        ProtocolError::FramingError(message)
    }

    /// Best-effort write-and-drain used by cleanup paths that must run
    /// even after the session is already dead
    pub(crate) fn fire_and_drain(&mut self, cmd: Command) {
        if self.channel.write_all(&cmd.to_frame()).is_ok() {
            let _ = read_reply(self.channel.as_mut(), SHORT_REPLY_LEN);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
