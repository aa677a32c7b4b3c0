//! Test utilities for driving the bridge without hardware
//!
//! [`MockInterface`] stands in for a Meshtastic device. Its paired
//! [`MockDevice`] lets a test play the radio: queue `FromRadio` frames for the
//! link to read, inspect every `ToRadio` the link wrote, and inject write
//! failures.
//!
//! ```rust,ignore
//! let (iface, device) = MockInterface::new();
//! let (link, radio, inbound) = RadioLink::new(iface);
//! link.start().await?;
//!
//! device.queue_from_radio(from_radio_packet(text_packet(0x1234, 1, "hello")));
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};
use crate::interface::MeshtasticInterface;
use crate::proto::{self, from_radio, mesh_packet, telemetry, to_radio, PortNum};

/// Mock interface for testing without hardware
#[derive(Debug)]
pub struct MockInterface {
    connected: bool,
    fail_connect: bool,
    incoming_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    device: MockDevice,
}

/// The radio side of a [`MockInterface`]
#[derive(Debug, Clone)]
pub struct MockDevice {
    incoming_tx: mpsc::UnboundedSender<Vec<u8>>,
    outgoing: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MockInterface {
    /// Create a mock interface and its device side
    pub fn new() -> (Self, MockDevice) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let device = MockDevice {
            incoming_tx,
            outgoing: Arc::new(Mutex::new(Vec::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
        };
        let iface = Self {
            connected: false,
            fail_connect: false,
            incoming_rx,
            device: device.clone(),
        };
        (iface, device)
    }

    /// A mock whose `connect` always fails, like an unplugged device
    pub fn failing_connect() -> (Self, MockDevice) {
        let (mut iface, device) = Self::new();
        iface.fail_connect = true;
        (iface, device)
    }
}

impl MockDevice {
    /// Queue a raw frame payload for the link to read
    pub fn queue_incoming(&self, data: Vec<u8>) {
        let _ = self.incoming_tx.send(data);
    }

    /// Queue a `FromRadio` message for the link to read
    pub fn queue_from_radio(&self, message: proto::FromRadio) {
        self.queue_incoming(message.encode_to_vec());
    }

    /// Raw payloads written by the link
    pub fn outgoing(&self) -> Vec<Vec<u8>> {
        self.outgoing.lock().clone()
    }

    /// Everything written by the link, decoded
    pub fn sent_to_radio(&self) -> Vec<proto::ToRadio> {
        self.outgoing
            .lock()
            .iter()
            .filter_map(|bytes| proto::ToRadio::decode(bytes.as_slice()).ok())
            .collect()
    }

    /// Mesh packets written by the link, in order
    pub fn sent_packets(&self) -> Vec<proto::MeshPacket> {
        self.sent_to_radio()
            .into_iter()
            .filter_map(|msg| match msg.payload_variant {
                Some(to_radio::PayloadVariant::Packet(packet)) => Some(packet),
                _ => None,
            })
            .collect()
    }

    /// Make subsequent writes fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Wait until at least `count` payloads were written
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn wait_for_packets(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.outgoing.lock().len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait until at least `count` mesh packets were written
    pub async fn wait_for_mesh_packets(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.sent_packets().len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl MeshtasticInterface for MockInterface {
    async fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(BridgeError::PortNotFound("mock".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn read_packet(&mut self) -> Result<Option<Bytes>> {
        match self.incoming_rx.recv().await {
            Some(frame) => Ok(Some(Bytes::from(frame))),
            None => std::future::pending().await,
        }
    }

    async fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(BridgeError::Disconnected);
        }
        if self.device.fail_writes.load(Ordering::SeqCst) {
            return Err(BridgeError::WriteError("Simulated error".to_string()));
        }
        self.device.outgoing.lock().push(data.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "MockInterface"
    }
}

fn decoded_packet(from: u32, id: u32, port: PortNum, payload: Vec<u8>) -> proto::MeshPacket {
    proto::MeshPacket {
        from,
        to: u32::MAX,
        channel: 0,
        payload_variant: Some(mesh_packet::PayloadVariant::Decoded(proto::Data {
            portnum: port as i32,
            payload,
            want_response: false,
        })),
        id,
        ..Default::default()
    }
}

/// A broadcast text packet
pub fn text_packet(from: u32, id: u32, text: &str) -> proto::MeshPacket {
    decoded_packet(from, id, PortNum::TextMessageApp, text.as_bytes().to_vec())
}

/// A broadcast position packet
pub fn position_packet(from: u32, id: u32, lat: f64, lon: f64) -> proto::MeshPacket {
    let position = proto::Position {
        latitude_i: (lat * 1e7).round() as i32,
        longitude_i: (lon * 1e7).round() as i32,
        altitude: 0,
        time: 0,
    };
    decoded_packet(from, id, PortNum::PositionApp, position.encode_to_vec())
}

/// A device-metrics telemetry packet
pub fn telemetry_packet(from: u32, id: u32, battery_level: u32, voltage: f32) -> proto::MeshPacket {
    let telemetry = proto::Telemetry {
        time: 0,
        variant: Some(telemetry::Variant::DeviceMetrics(proto::DeviceMetrics {
            battery_level,
            voltage,
            ..Default::default()
        })),
    };
    decoded_packet(from, id, PortNum::TelemetryApp, telemetry.encode_to_vec())
}

/// Wrap a packet as the device delivers it
pub fn from_radio_packet(packet: proto::MeshPacket) -> proto::FromRadio {
    proto::FromRadio {
        id: 0,
        payload_variant: Some(from_radio::PayloadVariant::Packet(packet)),
    }
}

/// A node database entry from the device's config dump
///
/// `last_heard` is epoch seconds, 0 for never.
pub fn node_info(
    num: u32,
    long_name: &str,
    position: Option<(f64, f64)>,
    last_heard: u32,
) -> proto::FromRadio {
    let info = proto::NodeInfo {
        num,
        user: Some(proto::User {
            id: format!("!{:08x}", num),
            long_name: long_name.to_string(),
            short_name: long_name.chars().take(4).collect(),
            hw_model: 0,
        }),
        position: position.map(|(lat, lon)| proto::Position {
            latitude_i: (lat * 1e7).round() as i32,
            longitude_i: (lon * 1e7).round() as i32,
            altitude: 0,
            time: 0,
        }),
        snr: 0.0,
        last_heard,
        device_metrics: None,
    };
    proto::FromRadio {
        id: 0,
        payload_variant: Some(from_radio::PayloadVariant::NodeInfo(info)),
    }
}
