//! Serial port handling
//!
//! Discovery and opening of serial devices.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
use std::time::Duration;

use super::{StreamError, DEFAULT_BAUD_RATE};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// Human readable description
    pub description: String,

    /// Hardware identifier, e.g. "USB VID:PID=2341:0043"
    pub hwid: String,

    /// Whether the device sits on USB
    pub is_usb: bool,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let description = usb
                    .product
                    .clone()
                    .or_else(|| usb.manufacturer.clone())
                    .unwrap_or_else(|| "n/a".to_string());
                let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
                if let Some(serial) = usb.serial_number {
                    hwid.push_str(&format!(" SER={}", serial));
                }
                Self {
                    name: info.port_name,
                    description,
                    hwid,
                    is_usb: true,
                }
            }
            SerialPortType::PciPort => Self {
                name: info.port_name,
                description: "PCI serial port".to_string(),
                hwid: "PCI".to_string(),
                is_usb: false,
            },
            SerialPortType::BluetoothPort => Self {
                name: info.port_name,
                description: "Bluetooth serial port".to_string(),
                hwid: "BLUETOOTH".to_string(),
                is_usb: false,
            },
            SerialPortType::Unknown => Self {
                name: info.port_name,
                description: "n/a".to_string(),
                hwid: String::new(),
                is_usb: false,
            },
        }
    }
}

/// Sort key: ttyACM* first, then ttyUSB*, each numerically, then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

fn is_meaningless(description: &str) -> bool {
    matches!(
        description.trim().to_lowercase().as_str(),
        "" | "n/a" | "unknown"
    )
}

/// Drop ports with no useful description unless they are USB devices.
/// Falls back to every port when nothing survives.
fn filter_ports(ports: Vec<PortInfo>) -> Vec<PortInfo> {
    let useful: Vec<PortInfo> = ports
        .iter()
        .filter_map(|p| {
            if !is_meaningless(&p.description) {
                Some(p.clone())
            } else if p.is_usb || p.hwid.to_uppercase().contains("USB") {
                Some(PortInfo {
                    description: format!("USB Device ({})", p.name),
                    ..p.clone()
                })
            } else {
                None
            }
        })
        .collect();

    if !useful.is_empty() {
        return useful;
    }

    ports
        .into_iter()
        .map(|p| {
            if p.description.trim().is_empty() {
                PortInfo {
                    description: "Unknown".to_string(),
                    ..p
                }
            } else {
                p
            }
        })
        .collect()
}

/// List available serial ports with deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    let mut ports: Vec<PortInfo> = map.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    filter_ports(ports)
}

/// Open a serial port, 8N1, with a short read timeout
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<Box<dyn SerialPort>, StreamError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);

    serialport::new(name, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => StreamError::PortNotFound(name.to_string()),
            _ => StreamError::connection(name, e),
        })
}
