//! Serial port interface for Meshtastic devices
//!
//! Async serial communication using tokio-serial, framed with the
//! Meshtastic stream protocol.

use crate::config::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};
use crate::error::{BridgeError, Result};
use crate::interface::framing::{encode_frame, FrameDecoder, MAX_FRAME_PAYLOAD};
use crate::interface::{ConnectionState, MeshtasticInterface};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, trace};

/// Serial interface for Meshtastic communication
pub struct SerialInterface {
    port_path: PathBuf,
    baud_rate: u32,
    timeout: Duration,
    stream: Option<SerialStream>,
    state: ConnectionState,
    decoder: FrameDecoder,
    name: String,
}

impl SerialInterface {
    /// Create a new serial interface
    pub fn new(port: impl AsRef<Path>) -> Self {
        let port_path = port.as_ref().to_path_buf();
        let name = format!("serial:{}", port_path.display());

        Self {
            port_path,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            stream: None,
            state: ConnectionState::Disconnected,
            decoder: FrameDecoder::new(),
            name,
        }
    }

    /// Create with custom baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Create with custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the port path
    pub fn port_path(&self) -> &Path {
        &self.port_path
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

#[async_trait]
impl MeshtasticInterface for SerialInterface {
    async fn connect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        info!(port = %self.port_path.display(), baud = self.baud_rate, "Connecting to serial port");

        if !self.port_path.exists() {
            self.state = ConnectionState::Disconnected;
            return Err(BridgeError::PortNotFound(
                self.port_path.display().to_string(),
            ));
        }

        let stream = tokio_serial::new(self.port_path.to_string_lossy(), self.baud_rate)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| {
                self.state = ConnectionState::Disconnected;
                BridgeError::PortOpenFailed {
                    port: self.port_path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;

        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        self.decoder.clear();

        info!(port = %self.port_path.display(), "Connected to Meshtastic device");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.flush().await;
        }

        self.state = ConnectionState::Disconnected;
        self.decoder.clear();

        info!(port = %self.port_path.display(), "Disconnected from serial port");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.stream.is_some()
    }

    async fn read_packet(&mut self) -> Result<Option<Bytes>> {
        if let Some(packet) = self.decoder.decode()? {
            return Ok(Some(packet));
        }

        let stream = self.stream.as_mut().ok_or(BridgeError::Disconnected)?;
        let mut buf = [0u8; MAX_FRAME_PAYLOAD];

        match stream.read(&mut buf).await {
            Ok(0) => {
                self.state = ConnectionState::Disconnected;
                Err(BridgeError::Disconnected)
            }
            Ok(n) => {
                trace!(bytes = n, "Read from serial port");
                self.decoder.extend(&buf[..n]);
                self.decoder.decode()
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(None)
            }
            Err(e) => {
                error!(error = %e, "Serial read error");
                self.state = ConnectionState::Disconnected;
                Err(BridgeError::ReadError(e.to_string()))
            }
        }
    }

    async fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(BridgeError::Disconnected)?;

        let frame = encode_frame(payload)?;
        debug!(size = frame.len(), payload_size = payload.len(), "Writing frame");

        stream.write_all(&frame).await.map_err(|e| {
            error!(error = %e, "Serial write error");
            self.state = ConnectionState::Disconnected;
            BridgeError::WriteError(e.to_string())
        })?;

        stream
            .flush()
            .await
            .map_err(|e| BridgeError::WriteError(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialInterface")
            .field("port", &self.port_path)
            .field("baud_rate", &self.baud_rate)
            .field("state", &self.state)
            .field("buffered", &self.decoder.buffered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_state() {
        let iface = SerialInterface::new("/dev/ttyUSB0");
        assert_eq!(iface.state(), ConnectionState::Disconnected);
        assert!(!iface.is_connected());
    }

    #[test]
    fn test_interface_name() {
        let iface = SerialInterface::new("/dev/ttyUSB0").with_baud_rate(921_600);
        assert_eq!(iface.name(), "serial:/dev/ttyUSB0");
        assert_eq!(iface.port_path(), Path::new("/dev/ttyUSB0"));
    }

    #[tokio::test]
    async fn test_missing_port_is_not_found() {
        let mut iface = SerialInterface::new("/dev/does-not-exist-takmesh");
        let err = iface.connect().await.unwrap_err();
        assert_eq!(err.error_code(), "PORT_NOT_FOUND");
        assert!(err.is_startup_error());
    }

    #[tokio::test]
    async fn test_read_without_connect_fails() {
        let mut iface = SerialInterface::new("/dev/ttyUSB0");
        assert!(matches!(
            iface.read_packet().await,
            Err(BridgeError::Disconnected)
        ));
    }
}
