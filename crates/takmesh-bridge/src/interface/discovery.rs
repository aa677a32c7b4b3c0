//! Locating an attached Meshtastic radio
//!
//! Used when the serial port is given as `auto`.

#[cfg(feature = "serial")]
use tracing::{debug, info};
#[cfg(not(feature = "serial"))]
use tracing::warn;

/// Common serial port paths for Meshtastic devices on different platforms
#[cfg(feature = "serial")]
const COMMON_DEVICE_PATHS: &[&str] = &[
    // Linux
    "/dev/ttyUSB0",
    "/dev/ttyUSB1",
    "/dev/ttyACM0",
    "/dev/ttyACM1",
    // macOS
    "/dev/tty.usbserial-*",
    "/dev/tty.SLAB_USBtoUART*",
    "/dev/cu.usbserial-*",
    "/dev/cu.SLAB_USBtoUART*",
    "/dev/cu.usbmodem*",
];

/// USB vendors found on Meshtastic boards: Silicon Labs CP210x, FTDI,
/// Espressif native USB and WCH CH340
#[cfg(feature = "serial")]
const KNOWN_VENDOR_IDS: [u16; 4] = [0x10C4, 0x0403, 0x303A, 0x1A86];

/// Find a connected Meshtastic device by scanning serial ports
///
/// USB ports from known vendors win; otherwise the first existing common
/// device path is returned.
pub fn find_meshtastic_device() -> Option<String> {
    #[cfg(feature = "serial")]
    {
        if let Ok(ports) = serialport::available_ports() {
            if let Some(port) = ports.iter().find(|p| is_likely_meshtastic_port(p)) {
                info!(path = %port.port_name, "Found likely Meshtastic device");
                return Some(port.port_name.clone());
            }
        }

        for pattern in COMMON_DEVICE_PATHS {
            if let Ok(entries) = glob::glob(pattern) {
                if let Some(entry) = entries.flatten().find(|e| e.exists()) {
                    let path = entry.to_string_lossy().to_string();
                    debug!(path = %path, "Found serial port");
                    return Some(path);
                }
            }
        }

        None
    }

    #[cfg(not(feature = "serial"))]
    {
        warn!("Serial feature not enabled, cannot detect hardware devices");
        None
    }
}

#[cfg(feature = "serial")]
fn is_likely_meshtastic_port(port: &serialport::SerialPortInfo) -> bool {
    use serialport::SerialPortType;

    match &port.port_type {
        SerialPortType::UsbPort(usb_info) => {
            if KNOWN_VENDOR_IDS.contains(&usb_info.vid) {
                debug!(
                    "USB device matches known vendor: VID={:#06X} PID={:#06X}",
                    usb_info.vid, usb_info.pid
                );
                return true;
            }

            usb_info.product.as_deref().is_some_and(|product| {
                let product = product.to_lowercase();
                ["meshtastic", "t-beam", "t-echo", "heltec", "lora"]
                    .iter()
                    .any(|needle| product.contains(needle))
            })
        }
        _ => false,
    }
}

/// List all serial ports, flagging the likely Meshtastic ones
pub fn list_available_devices() -> Vec<DeviceInfo> {
    #[cfg(feature = "serial")]
    {
        serialport::available_ports()
            .map(|ports| ports.iter().map(DeviceInfo::from_serial_port).collect())
            .unwrap_or_default()
    }

    #[cfg(not(feature = "serial"))]
    {
        Vec::new()
    }
}

/// Information about a detected serial device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Path to the device (e.g., /dev/ttyUSB0)
    pub path: String,
    /// Device type description
    pub device_type: String,
    /// USB Vendor ID (if available)
    pub vendor_id: Option<u16>,
    /// USB Product ID (if available)
    pub product_id: Option<u16>,
    /// Product name (if available)
    pub product_name: Option<String>,
    /// Whether this is likely a Meshtastic device
    pub is_likely_meshtastic: bool,
}

impl DeviceInfo {
    #[cfg(feature = "serial")]
    fn from_serial_port(port: &serialport::SerialPortInfo) -> Self {
        use serialport::SerialPortType;

        let (device_type, vendor_id, product_id, product_name) = match &port.port_type {
            SerialPortType::UsbPort(usb_info) => (
                "USB",
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.product.clone(),
            ),
            SerialPortType::PciPort => ("PCI", None, None, None),
            SerialPortType::BluetoothPort => ("Bluetooth", None, None, None),
            SerialPortType::Unknown => ("Unknown", None, None, None),
        };

        Self {
            path: port.port_name.clone(),
            device_type: device_type.to_string(),
            vendor_id,
            product_id,
            product_name,
            is_likely_meshtastic: is_likely_meshtastic_port(port),
        }
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}", self.path, self.device_type)?;
        if let (Some(vid), Some(pid)) = (self.vendor_id, self.product_id) {
            write!(f, " {:04x}:{:04x}", vid, pid)?;
        }
        if let Some(name) = &self.product_name {
            write!(f, " {}", name)?;
        }
        write!(f, ")")?;
        if self.is_likely_meshtastic {
            write!(f, " *")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_info_display() {
        let info = DeviceInfo {
            path: "/dev/ttyUSB0".to_string(),
            device_type: "USB".to_string(),
            vendor_id: Some(0x10C4),
            product_id: Some(0xEA60),
            product_name: Some("CP2102 USB to UART".to_string()),
            is_likely_meshtastic: true,
        };
        assert_eq!(
            info.to_string(),
            "/dev/ttyUSB0 (USB 10c4:ea60 CP2102 USB to UART) *"
        );
    }

    #[test]
    fn test_listing_does_not_panic() {
        let devices = list_available_devices();
        let _ = find_meshtastic_device();
        assert!(devices.iter().all(|d| !d.path.is_empty()));
    }
}
