//! Transport abstraction
//!
//! The protocol engine never talks to `serialport` directly; it goes
//! through the [`Channel`] trait so sessions can be driven by a real
//! serial port or a scripted channel in tests.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

/// A blocking byte channel with a read timeout
pub trait Channel: Read + Write + Send {
    /// Set the timeout for read operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard any bytes pending in the receive buffer
    fn clear_input_buffer(&mut self) -> io::Result<()>;
}

/// Serial port wrapper implementing [`Channel`]
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an open serial port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Channel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

/// Read up to `len` bytes, stopping early when the channel's read
/// timeout expires.
///
/// Mirrors the behavior of a serial read with timeout: the caller gets
/// everything that arrived in time, which may be nothing. Length
/// checking is up to the caller; a short result is not an I/O error.
pub(crate) fn read_reply(channel: &mut dyn Channel, len: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    let mut buf = [0u8; 256];
    while out.len() < len {
        let want = (len - out.len()).min(buf.len());
        match channel.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}
