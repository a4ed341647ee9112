//! Serial port handling
//!
//! Low-level serial access for the debug link. The firmware side uses
//! a plain UART bridged over USB, so ports are opened 8N1 with no flow
//! control.

use serialport::{SerialPort, SerialPortType};
use std::time::Duration;

use super::ProtocolError;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM18")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

/// List available serial ports in deterministic name order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|info| {
            let (vid, pid, product) = match info.port_type {
                SerialPortType::UsbPort(usb) => (Some(usb.vid), Some(usb.pid), usb.product),
                _ => (None, None, None),
            };
            PortInfo {
                name: info.port_name,
                vid,
                pid,
                product,
            }
        })
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    ports
}

/// Open and configure a serial port for the debug link.
///
/// 8 data bits, no parity, one stop bit, no flow control; the read
/// timeout bounds every reply wait in the protocol engine.
pub fn open_port(
    name: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    serialport::new(name, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(timeout)
        .open()
        .map_err(|e| ProtocolError::TransportUnavailable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports_does_not_panic() {
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_open_missing_port_is_transport_unavailable() {
        let err = open_port("/dev/definitely-not-a-port", 500_000, Duration::from_millis(100))
            .err()
            .expect("open must fail");
        assert!(matches!(err, ProtocolError::TransportUnavailable(_)));
    }
}
