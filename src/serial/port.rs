//! Serial port configuration, discovery and the OS-backed transport
//!
//! The debug peripheral always talks 115200 baud 8-N-1 without flow control.

use super::mock::MOCK_PORT_NAME;
use colored::Colorize;
use std::time::Duration;

#[cfg(feature = "serial")]
use super::transport::{lock, Transport};
#[cfg(feature = "serial")]
use crate::error::{SerialError, TransportError};
#[cfg(feature = "serial")]
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
#[cfg(feature = "serial")]
use std::io::{Read, Write};
#[cfg(feature = "serial")]
use std::sync::Mutex;

/// Baud rate of the debug peripheral UART
pub const DEFAULT_BAUD: u32 = 115200;

/// Bounded read timeout used by the receive loop
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Configuration for serial port connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    /// Serial port path (e.g., /dev/ttyUSB1) or the mock port name
    pub port_path: String,
    /// Baud rate (default: 115200)
    pub baud_rate: u32,
    /// Read timeout
    pub timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_path: String::from("/dev/ttyUSB1"),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl PortConfig {
    /// Create a new configuration with the peripheral's default settings
    pub fn new(port_path: &str) -> Self {
        Self {
            port_path: port_path.to_string(),
            ..Default::default()
        }
    }

    /// Whether this configuration selects the mock port
    pub fn is_mock(&self) -> bool {
        self.port_path == MOCK_PORT_NAME
    }
}

/// OS serial port split into independent read and write handles
#[cfg(feature = "serial")]
pub struct SerialPortTransport {
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
}

#[cfg(feature = "serial")]
impl SerialPortTransport {
    /// Open the port at 8-N-1, no flow control
    pub fn open(config: &PortConfig) -> Result<Self, SerialError> {
        let connect_err = |e: serialport::Error| SerialError::Connect {
            port: config.port_path.clone(),
            reason: e.to_string(),
        };

        let port = serialport::new(&config.port_path, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.timeout)
            .open()
            .map_err(connect_err)?;
        let writer = port.try_clone().map_err(connect_err)?;

        Ok(Self {
            reader: Mutex::new(Some(port)),
            writer: Mutex::new(Some(writer)),
        })
    }
}

#[cfg(feature = "serial")]
impl Transport for SerialPortTransport {
    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut reader = lock(&self.reader);
        let port = reader.as_mut().ok_or(TransportError::Closed)?;
        port.read(buf).map_err(TransportError::from_io)
    }

    fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut writer = lock(&self.writer);
        let port = writer.as_mut().ok_or(TransportError::Closed)?;
        port.write_all(data)
            .and_then(|_| port.flush())
            .map_err(TransportError::from_io)
    }

    fn close(&self) -> Result<(), TransportError> {
        // writer first: the reader may be parked in a read for one timeout
        lock(&self.writer).take();
        lock(&self.reader).take();
        Ok(())
    }
}

/// Information about a selectable port
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub port_type: PortType,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl PortInfo {
    fn mock() -> Self {
        Self {
            path: MOCK_PORT_NAME.to_string(),
            port_type: PortType::Mock,
            manufacturer: None,
            product: None,
            vid: None,
            pid: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortType {
    Mock,
    UsbSerial,
    PciSerial,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::Mock => write!(f, "Mock (no hardware)"),
            PortType::UsbSerial => write!(f, "USB Serial"),
            PortType::PciSerial => write!(f, "PCI Serial"),
            PortType::Bluetooth => write!(f, "Bluetooth"),
            PortType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Selectable ports: the mock port first, then whatever the OS reports
pub fn available_ports() -> Vec<PortInfo> {
    let mut ports = vec![PortInfo::mock()];
    ports.extend(os_ports());
    ports
}

#[cfg(feature = "serial")]
fn os_ports() -> Vec<PortInfo> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            log::warn!("Failed to enumerate serial ports: {}", e);
            return Vec::new();
        }
    };

    ports
        .into_iter()
        .map(|p| {
            let (port_type, manufacturer, product, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    PortType::UsbSerial,
                    info.manufacturer,
                    info.product,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::PciPort => (PortType::PciSerial, None, None, None, None),
                serialport::SerialPortType::BluetoothPort => {
                    (PortType::Bluetooth, None, None, None, None)
                }
                serialport::SerialPortType::Unknown => (PortType::Unknown, None, None, None, None),
            };

            PortInfo {
                path: p.port_name,
                port_type,
                manufacturer,
                product,
                vid,
                pid,
            }
        })
        .collect()
}

#[cfg(not(feature = "serial"))]
fn os_ports() -> Vec<PortInfo> {
    log::debug!("Built without the `serial` feature; only the mock port is available");
    Vec::new()
}

/// Print formatted list of selectable ports
pub fn print_ports() {
    let ports = available_ports();

    println!("{}", "Available Serial Ports:".green().bold());
    println!("{}", "=".repeat(60));

    for port in &ports {
        println!("\n{}: {}", "Port".cyan(), port.path.white().bold());
        println!("  Type: {}", port.port_type);

        if let Some(ref mfg) = port.manufacturer {
            println!("  Manufacturer: {}", mfg);
        }
        if let Some(ref prod) = port.product {
            println!("  Product: {}", prod);
        }
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            println!("  VID:PID: {:04x}:{:04x}", vid, pid);
        }
    }

    if ports.len() == 1 {
        println!("\n{}", "No hardware serial ports found".yellow());
        println!("\n{}", "Troubleshooting tips:".cyan().bold());
        println!("  1. Build with --features serial");
        println!("  2. Check if the device is recognized: ls -la /dev/ttyUSB* /dev/ttyACM*");
        println!("  3. Add your user to the 'dialout' group: sudo usermod -aG dialout $USER");
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "{}",
        "Use: cpu-debugger console <PORT> to start a session".yellow()
    );
}
