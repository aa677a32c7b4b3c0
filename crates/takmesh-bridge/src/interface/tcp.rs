//! TCP interface for Meshtastic devices
//!
//! WiFi/Ethernet capable devices expose the stream API on TCP port 4403,
//! framed exactly like the serial link.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace};

use super::framing::{encode_frame, FrameDecoder, MAX_FRAME_PAYLOAD};
use super::{ConnectionState, MeshtasticInterface};
use crate::config::{DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS};
use crate::error::{BridgeError, Result};

/// TCP interface for connecting to Meshtastic devices over network
pub struct TcpInterface {
    address: String,
    timeout: Duration,
    stream: Option<TcpStream>,
    state: ConnectionState,
    decoder: FrameDecoder,
}

impl TcpInterface {
    /// Create a new TCP interface
    ///
    /// `address` is `host:port`, or a bare host for the default port 4403.
    pub fn new(address: impl Into<String>) -> Self {
        let mut address = address.into();
        if !address.contains(':') {
            address = format!("{}:{}", address, DEFAULT_TCP_PORT);
        }
        Self {
            address,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            stream: None,
            state: ConnectionState::Disconnected,
            decoder: FrameDecoder::new(),
        }
    }

    /// Set the connect timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

#[async_trait]
impl MeshtasticInterface for TcpInterface {
    async fn connect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        info!(address = %self.address, "Connecting to device network API");

        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                return Err(BridgeError::PortOpenFailed {
                    port: self.address.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(BridgeError::ConnectionTimeout {
                    duration_ms: self.timeout.as_millis() as u64,
                });
            }
        };
        stream.set_nodelay(true)?;

        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        self.decoder.clear();

        info!(address = %self.address, "Connected to Meshtastic device");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.state = ConnectionState::Disconnected;
        self.decoder.clear();

        info!(address = %self.address, "Disconnected from device");
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
                trace!(bytes = n, "Read from device socket");
                self.decoder.extend(&buf[..n]);
                self.decoder.decode()
            }
            Err(e) => {
                error!(error = %e, "TCP read error");
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
            error!(error = %e, "TCP write error");
            self.state = ConnectionState::Disconnected;
            BridgeError::WriteError(e.to_string())
        })
    }

    fn name(&self) -> &str {
        &self.address
    }
}
