//! Device interfaces for the Meshtastic radio
//!
//! - [`SerialInterface`] - USB serial (requires `serial` feature)
//! - [`TcpInterface`] - device network API on port 4403 (requires `tcp` feature)
//!
//! Both speak the Meshtastic stream protocol, see [`framing`].
//!
//! # Feature Requirements
//!
//! - `serial`: Requires `libudev-dev` and `pkg-config` on Linux
//!   ```bash
//!   apt install libudev-dev pkg-config
//!   ```

pub mod discovery;
pub mod framing;

#[cfg(feature = "serial")]
mod serial;
#[cfg(feature = "serial")]
pub use serial::SerialInterface;

#[cfg(feature = "tcp")]
mod tcp;
#[cfg(feature = "tcp")]
pub use tcp::TcpInterface;

pub use discovery::{find_meshtastic_device, list_available_devices, DeviceInfo};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Trait for Meshtastic device interfaces
///
/// Implementations deliver and accept the protobuf payload of one stream
/// frame at a time; framing is theirs to handle.
#[async_trait]
pub trait MeshtasticInterface: Send + Sync {
    /// Connect to the Meshtastic device
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the device
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;

    /// Read a `FromRadio` payload from the device
    ///
    /// Returns `None` if no complete frame is available yet.
    /// Returns `Err` on connection/read errors.
    ///
    /// Must be cancel safe: the radio link drops this future whenever a
    /// command arrives first.
    async fn read_packet(&mut self) -> Result<Option<Bytes>>;

    /// Write a `ToRadio` payload to the device
    async fn write_packet(&mut self, packet: &[u8]) -> Result<()>;

    /// Get the interface name (for logging)
    fn name(&self) -> &str;
}

/// Connection state for interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Successfully connected
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }
}
