// Serial connection to the Smoothieware board
//
// Request/response framing: clear stale input, write `<command>\r\n`, then read
// until the firmware's `ok\r\nok\r\n` acknowledgment or the timeout expires.

use std::io::{self, Read, Write};
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use serde::Serialize;
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use tracing::{debug, info, warn};

use super::error::{DriverError, Result};
use crate::config::{ALARM_KEYWORD, DRIVER_ACK, ERROR_KEYWORD};

/// Byte transport the driver talks through
///
/// Implemented for real serial ports and for in-memory test links.
pub trait SerialLink: Read + Write + Send {
    /// Drop any unread input
    fn clear_input(&mut self) -> Result<()>;

    /// Current read timeout
    fn timeout(&self) -> Duration;

    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;
}

impl SerialLink for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> Result<()> {
        SerialPort::clear(&**self, ClearBuffer::Input)?;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        SerialPort::timeout(&**self)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        SerialPort::set_timeout(&mut **self, timeout)?;
        Ok(())
    }
}

/// An open link owned by the driver
pub type Connection = Box<dyn SerialLink>;

/// A serial port visible to the system
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortInfo {
    pub port_name: String,
    pub description: String,
}

impl PortInfo {
    /// Substring match against the port name and its descriptor
    pub fn matches(&self, hint: &str) -> bool {
        self.port_name.contains(hint) || self.description.contains(hint)
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .iter()
        .map(|port| PortInfo {
            port_name: port.port_name.clone(),
            description: describe(port),
        })
        .collect())
}

fn describe(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => [
            usb.manufacturer.as_deref(),
            usb.product.as_deref(),
            usb.serial_number.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" "),
        SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => String::new(),
    }
}

/// Name of the first system port matching `hint`
pub fn find_port(hint: &str) -> Result<String> {
    first_match(&list_ports()?, hint)
}

/// Name of the first port in `ports` matching `hint`
pub fn first_match(ports: &[PortInfo], hint: &str) -> Result<String> {
    ports
        .iter()
        .find(|port| port.matches(hint))
        .map(|port| port.port_name.clone())
        .ok_or_else(|| DriverError::PortNotFound {
            hint: hint.to_string(),
        })
}

/// Open a named port
pub fn open(port_name: &str, baudrate: u32, timeout: Duration) -> Result<Connection> {
    let port = serialport::new(port_name, baudrate).timeout(timeout).open()?;
    Ok(Box::new(port))
}

/// Find the first port matching `hint` and open it
pub fn connect(hint: &str, baudrate: u32, timeout: Duration) -> Result<Connection> {
    let port_name = find_port(hint)?;
    info!("Opening controller on {} at {} baud", port_name, baudrate);
    open(&port_name, baudrate, timeout)
}

/// Overrides a link's read timeout until dropped
struct TimeoutGuard<'a, L: SerialLink + ?Sized> {
    link: &'a mut L,
    restore: Option<Duration>,
}

impl<'a, L: SerialLink + ?Sized> TimeoutGuard<'a, L> {
    fn new(link: &'a mut L, timeout: Option<Duration>) -> Result<Self> {
        let mut restore = None;
        if let Some(timeout) = timeout {
            let saved = link.timeout();
            link.set_timeout(timeout)?;
            restore = Some(saved);
        }
        Ok(Self { link, restore })
    }
}

impl<L: SerialLink + ?Sized> Deref for TimeoutGuard<'_, L> {
    type Target = L;

    fn deref(&self) -> &L {
        self.link
    }
}

impl<L: SerialLink + ?Sized> DerefMut for TimeoutGuard<'_, L> {
    fn deref_mut(&mut self) -> &mut L {
        self.link
    }
}

impl<L: SerialLink + ?Sized> Drop for TimeoutGuard<'_, L> {
    fn drop(&mut self) {
        if let Some(saved) = self.restore {
            if let Err(e) = self.link.set_timeout(saved) {
                warn!("Failed to restore serial timeout to {:?}: {}", saved, e);
            }
        }
    }
}

/// Write one command line and return the response preceding the acknowledgment
///
/// `timeout` temporarily replaces the link's read timeout; `None` keeps it.
/// Returns `Ok(None)` when no acknowledgment arrives in time.
pub fn write_and_return<L: SerialLink + ?Sized>(
    link: &mut L,
    command: &str,
    timeout: Option<Duration>,
) -> Result<Option<String>> {
    link.clear_input()?;
    let mut link = TimeoutGuard::new(link, timeout)?;
    let read_timeout = link.timeout();

    debug!("-> {}", command);
    link.write_all(format!("{}\r\n", command).as_bytes())?;
    link.flush()?;

    let raw = read_until(&mut *link, DRIVER_ACK, read_timeout)?;
    let response = parse_response(&raw);
    match &response {
        Some(text) => debug!("<- {:?}", text),
        None => warn!(
            "No acknowledgment for {:?} within {:?} (got {:?})",
            command,
            read_timeout,
            String::from_utf8_lossy(&raw)
        ),
    }
    Ok(response)
}

/// Read until `token` has been seen or `timeout` has elapsed
fn read_until<R: Read + ?Sized>(reader: &mut R, token: &[u8], timeout: Duration) -> Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut response = Vec::new();
    let mut buf = [0u8; 256];

    while find(&response, token).is_none() && Instant::now() < deadline {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(response)
}

/// Text before the acknowledgment, warning on in-band faults
fn parse_response(raw: &[u8]) -> Option<String> {
    if find(raw, ERROR_KEYWORD).is_some() || find(raw, ALARM_KEYWORD).is_some() {
        warn!("Controller reported a fault: {}", String::from_utf8_lossy(raw).trim());
    }
    let end = find(raw, DRIVER_ACK)?;
    Some(String::from_utf8_lossy(&raw[..end]).into_owned())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}


#[cfg(test)]
mod tests {
    use super::mock::MockLink;
    use super::*;

    #[test]
    fn test_response_before_ack_is_returned() {
        let mut link = MockLink::new();
        link.respond_to("M119", b"X_min:0 Y_min:1\r\nok\r\nok\r\n");

        let response = write_and_return(&mut link, "M119 M400", None).unwrap();
        assert_eq!(response.as_deref(), Some("X_min:0 Y_min:1\r\n"));
        assert_eq!(link.written(), vec!["M119 M400".to_string()]);
    }

    #[test]
    fn test_missing_ack_returns_none() {
        let mut link = MockLink::new();
        link.respond_to("M114.2", b"ok MCS: X:1.0");

        let response = write_and_return(&mut link, "M114.2 M400", None).unwrap();
        assert_eq!(response, None);
    }

    #[test]
    fn test_fault_keywords_do_not_fail_the_call() {
        let mut link = MockLink::new();
        link.respond_to("G0", b"error: Unsupported command\r\nok\r\nok\r\n");

        let response = write_and_return(&mut link, "G0X1 M400", None).unwrap();
        assert_eq!(response.as_deref(), Some("error: Unsupported command\r\n"));
    }

    #[test]
    fn test_stale_input_is_cleared_before_writing() {
        let mut link = MockLink::new();
        link.push_stale(b"leftover ok\r\nok\r\n");
        link.respond_to("M119", b"fresh\r\nok\r\nok\r\n");

        let response = write_and_return(&mut link, "M119", None).unwrap();
        assert_eq!(response.as_deref(), Some("fresh\r\n"));
    }

    #[test]
    fn test_timeout_override_is_restored() {
        let mut link = MockLink::new();
        let saved = link.current_timeout();
        let extended = Duration::from_secs(30);

        write_and_return(&mut link, "G28.2X", Some(extended)).unwrap();

        assert_eq!(link.timeout_log(), vec![extended, saved]);
        assert_eq!(link.current_timeout(), saved);
    }

    #[test]
    fn test_timeout_restored_when_write_fails() {
        let mut link = MockLink::new();
        let saved = link.current_timeout();
        link.fail_on("G28.2");

        let result = write_and_return(&mut link, "G28.2X", Some(Duration::from_secs(30)));
        assert!(matches!(result, Err(DriverError::Io(_))));
        assert_eq!(link.current_timeout(), saved);
    }

    #[test]
    fn test_no_override_leaves_timeout_untouched() {
        let mut link = MockLink::new();
        write_and_return(&mut link, "M17", None).unwrap();
        assert!(link.timeout_log().is_empty());
    }

    #[test]
    fn test_port_hint_matching() {
        let port = PortInfo {
            port_name: "/dev/ttyACM0".to_string(),
            description: "Uberclock Smoothieboard 0F03".to_string(),
        };
        assert!(port.matches("Smoothie"));
        assert!(port.matches("ttyACM"));
        assert!(!port.matches("COM5"));
    }

    fn port(name: &str, description: &str) -> PortInfo {
        PortInfo {
            port_name: name.to_string(),
            description: description.to_string(),
        }
    }

    #[test]
    fn test_first_match_wins() {
        let ports = [
            port("/dev/ttyS0", ""),
            port("/dev/ttyACM0", "Uberclock Smoothieboard 0F03"),
            port("/dev/ttyACM1", "Uberclock Smoothieboard 1A22"),
        ];
        assert_eq!(first_match(&ports, "Smoothie").unwrap(), "/dev/ttyACM0");
        assert_eq!(first_match(&ports, "ttyS").unwrap(), "/dev/ttyS0");
    }

    #[test]
    fn test_no_matching_port() {
        let ports = [port("/dev/ttyS0", ""), port("/dev/ttyUSB0", "FTDI FT232R")];

        match first_match(&ports, "Smoothie") {
            Err(DriverError::PortNotFound { hint }) => assert_eq!(hint, "Smoothie"),
            other => panic!("expected PortNotFound, got {:?}", other),
        }
        assert!(matches!(first_match(&[], "Smoothie"), Err(DriverError::PortNotFound { .. })));
    }

    #[test]
    fn test_find_subsequence() {
        assert_eq!(find(b"abc ok\r\nok\r\n", DRIVER_ACK), Some(4));
        assert_eq!(find(b"ok\r\n", DRIVER_ACK), None);
    }
}
