//! Radio link: the single owner of the Meshtastic device
//!
//! ```text
//! ┌────────────┐  RadioCommand   ┌───────────────┐   ToRadio    ┌────────┐
//! │ RadioHandle│ ───────────────►│   RadioLink   │─────────────►│ device │
//! │ (cloneable)│                 │ (spawned task)│◄─────────────│        │
//! └────────────┘                 └───────┬───────┘  FromRadio   └────────┘
//!                                        │
//!                      NodeTable writes  │  MeshMessage (bounded)
//!                                        ▼
//!                                     bridge
//! ```
//!
//! Every write to the device goes through the link task, so multi-part
//! sends from the bridge are never interleaved with anything else. Inbound
//! frames update the node table before the normalized message is queued.

use chrono::{Duration as ChronoDuration, Utc};
use prost::Message;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::error::{BridgeError, Result};
use crate::identity::NodeId;
use crate::interface::MeshtasticInterface;
use crate::nodes::NodeTable;
use crate::packet::{epoch_seconds, MeshMessage};
use crate::proto::{self, from_radio, mesh_packet, telemetry, to_radio, PortNum};

/// Capacity of the inbound message queue
pub const INBOUND_QUEUE_CAPACITY: usize = 256;

const COMMAND_QUEUE_CAPACITY: usize = 64;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// How often silent nodes are pruned from the node table
pub const NODE_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Requests served by the link task
#[derive(Debug)]
pub enum RadioCommand {
    /// Write one packet to the mesh
    Send {
        /// Packet to send; id 0 is replaced by a random id
        packet: proto::MeshPacket,
        /// Outcome of the device write
        reply: oneshot::Sender<Result<()>>,
    },
    /// Say goodbye to the device and stop
    Close {
        /// Signalled once the device is released
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running [`RadioLink`]
#[derive(Debug, Clone)]
pub struct RadioHandle {
    command_tx: mpsc::Sender<RadioCommand>,
    nodes: NodeTable,
}

impl RadioHandle {
    /// Broadcast plain text from the device's own node
    pub async fn send_text(&self, text: &str, channel: u32) -> Result<()> {
        self.send_packet(MeshMessage::text(NodeId(0), text, channel).to_packet())
            .await
    }

    /// Send a typed message on `channel` to `destination`
    pub async fn send_structured(
        &self,
        message: &MeshMessage,
        channel: u32,
        destination: NodeId,
    ) -> Result<()> {
        let mut packet = message.to_packet();
        packet.channel = channel;
        packet.to = destination.as_u32();
        self.send_packet(packet).await
    }

    async fn send_packet(&self, packet: proto::MeshPacket) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(RadioCommand::Send { packet, reply })
            .await
            .map_err(|_| BridgeError::LinkSend("radio link stopped".to_string()))?;
        rx.await
            .map_err(|_| BridgeError::LinkSend("radio link dropped the request".to_string()))?
    }

    /// The node table kept current by the link
    pub fn node_table(&self) -> &NodeTable {
        &self.nodes
    }

    /// Release the device and stop the link task
    pub async fn close(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(RadioCommand::Close { reply })
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }
}

/// Owns the device interface and runs the read/write loop
pub struct RadioLink<I: MeshtasticInterface> {
    interface: I,
    command_rx: mpsc::Receiver<RadioCommand>,
    inbound_tx: mpsc::Sender<MeshMessage>,
    nodes: NodeTable,
    local_node: Option<NodeId>,
    config_id: u32,
    node_retention: Option<ChronoDuration>,
}

impl<I: MeshtasticInterface + 'static> RadioLink<I> {
    /// Create a link around `interface`
    ///
    /// Returns the link, a handle for sending, and the receiver of inbound
    /// Identity/Position/Text messages.
    pub fn new(interface: I) -> (Self, RadioHandle, mpsc::Receiver<MeshMessage>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let nodes = NodeTable::new();

        let link = Self {
            interface,
            command_rx,
            inbound_tx,
            nodes: nodes.clone(),
            local_node: None,
            config_id: 0,
            node_retention: None,
        };
        let handle = RadioHandle { command_tx, nodes };

        (link, handle, inbound_rx)
    }

    /// Forget nodes not heard for `retention`
    ///
    /// Without this the node table keeps every sender ever heard.
    pub fn with_node_retention(mut self, retention: Duration) -> Self {
        self.node_retention =
            Some(ChronoDuration::from_std(retention).unwrap_or(ChronoDuration::MAX));
        self
    }

    /// Connect, request the device configuration and spawn the link task
    ///
    /// Connection failures are returned here; they are startup errors.
    pub async fn start(mut self) -> Result<JoinHandle<()>> {
        self.interface.connect().await?;
        info!(interface = %self.interface.name(), "Radio connected");
        self.request_config().await?;

        Ok(tokio::spawn(self.run()))
    }

    async fn run(mut self) {
        let mut prune = tokio::time::interval(NODE_PRUNE_INTERVAL);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                read = self.interface.read_packet() => {
                    match read {
                        Ok(Some(frame)) => self.handle_frame(&frame),
                        Ok(None) => trace!("No complete frame yet"),
                        Err(e) if e.is_protocol_error() => {
                            warn!(error = %e, "Dropping corrupt frame");
                        }
                        Err(e) => {
                            warn!(error = %e, code = e.error_code(), "Radio read failed");
                            if let Err(e) = self.reconnect().await {
                                error!(error = %e, "Failed to reconnect to radio");
                                break;
                            }
                        }
                    }
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(RadioCommand::Send { packet, reply }) => {
                            let result = self.write_mesh_packet(packet).await;
                            if let Err(e) = &result {
                                error!(error = %e, "Radio write failed");
                            }
                            let _ = reply.send(result);
                        }
                        Some(RadioCommand::Close { reply }) => {
                            self.close().await;
                            let _ = reply.send(());
                            break;
                        }
                        None => {
                            self.close().await;
                            break;
                        }
                    }
                }

                _ = prune.tick() => self.prune_nodes(),
            }
        }

        info!("Radio link stopped");
    }

    fn prune_nodes(&self) {
        let Some(retention) = self.node_retention else {
            return;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return;
        };
        let removed = self.nodes.retain_heard_since(cutoff);
        if removed > 0 {
            debug!(removed, remaining = self.nodes.len(), "Pruned silent nodes");
        }
    }

    async fn request_config(&mut self) -> Result<()> {
        self.config_id = rand::random::<u32>().max(1);
        debug!(config_id = self.config_id, "Requesting device configuration");
        self.write_to_radio(to_radio::PayloadVariant::WantConfigId(self.config_id))
            .await
    }

    async fn write_mesh_packet(&mut self, mut packet: proto::MeshPacket) -> Result<()> {
        if packet.id == 0 {
            packet.id = rand::random::<u32>().max(1);
        }
        debug!(
            from = %NodeId(packet.from),
            to = %NodeId(packet.to),
            channel = packet.channel,
            packet_id = packet.id,
            "Sending mesh packet"
        );
        self.write_to_radio(to_radio::PayloadVariant::Packet(packet))
            .await
    }

    async fn write_to_radio(&mut self, variant: to_radio::PayloadVariant) -> Result<()> {
        let bytes = proto::ToRadio {
            payload_variant: Some(variant),
        }
        .encode_to_vec();
        self.interface.write_packet(&bytes).await
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let from_radio = match proto::FromRadio::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, len = frame.len(), "Undecodable FromRadio frame");
                return;
            }
        };

        match from_radio.payload_variant {
            Some(from_radio::PayloadVariant::Packet(packet)) => self.handle_packet(packet),
            Some(from_radio::PayloadVariant::MyInfo(info)) => {
                let id = NodeId(info.my_node_num);
                info!(node_id = %id, "Local radio node");
                self.local_node = Some(id);
            }
            Some(from_radio::PayloadVariant::NodeInfo(info)) => {
                self.nodes.apply_node_info(&info);
            }
            Some(from_radio::PayloadVariant::ConfigCompleteId(id)) => {
                if id == self.config_id {
                    info!(nodes = self.nodes.len(), "Device configuration complete");
                } else {
                    debug!(config_id = id, "Configuration complete for another request");
                }
            }
            Some(from_radio::PayloadVariant::Rebooted(_)) => {
                warn!("Radio rebooted");
            }
            None => trace!(id = from_radio.id, "Empty FromRadio"),
        }
    }

    fn handle_packet(&mut self, packet: proto::MeshPacket) {
        let sender = NodeId(packet.from);
        let heard = epoch_seconds(packet.rx_time).unwrap_or_else(Utc::now);
        self.nodes.mark_heard(sender, heard);

        if let Some(mesh_packet::PayloadVariant::Decoded(data)) = &packet.payload_variant {
            self.track_node(sender, data);
        }

        if Some(sender) == self.local_node {
            trace!(node_id = %sender, "Ignoring packet from the local node");
            return;
        }

        let message = match MeshMessage::from_packet(&packet) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                warn!(node_id = %sender, error = %e, "Dropping malformed mesh packet");
                return;
            }
        };

        match self.inbound_tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(node_id = %sender, "Inbound queue full, dropping mesh message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Inbound receiver gone, dropping mesh message");
            }
        }
    }

    fn track_node(&self, sender: NodeId, data: &proto::Data) {
        let result = match PortNum::try_from(data.portnum) {
            Ok(PortNum::NodeinfoApp) => proto::User::decode(data.payload.as_slice())
                .map(|user| self.nodes.apply_user(sender, &user)),
            Ok(PortNum::PositionApp) => proto::Position::decode(data.payload.as_slice())
                .map(|position| self.nodes.apply_position(sender, &position)),
            Ok(PortNum::TelemetryApp) => {
                proto::Telemetry::decode(data.payload.as_slice()).map(|t| {
                    if let Some(telemetry::Variant::DeviceMetrics(metrics)) = t.variant {
                        self.nodes.apply_metrics(sender, &metrics);
                    }
                })
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            debug!(node_id = %sender, error = %e, "Could not decode node update");
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        warn!(interface = %self.interface.name(), "Attempting to reconnect to radio");

        let _ = self.interface.disconnect().await;
        tokio::time::sleep(RECONNECT_DELAY).await;
        self.interface.connect().await?;
        self.request_config().await?;

        info!("Reconnected to radio");
        Ok(())
    }

    async fn close(&mut self) {
        if self.interface.is_connected() {
            if let Err(e) = self
                .write_to_radio(to_radio::PayloadVariant::Disconnect(true))
                .await
            {
                debug!(error = %e, "Could not send disconnect to radio");
            }
        }
        if let Err(e) = self.interface.disconnect().await {
            warn!(error = %e, "Error disconnecting from radio");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MeshPayload;
    use crate::test_utils::{self, MockInterface};

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_start_requests_config() {
        let (iface, device) = MockInterface::new();
        let (link, handle, _inbound) = RadioLink::new(iface);
        link.start().await.unwrap();

        assert!(device.wait_for_packets(1, WAIT).await);
        let sent = device.sent_to_radio();
        assert!(matches!(
            sent[0].payload_variant,
            Some(to_radio::PayloadVariant::WantConfigId(id)) if id != 0
        ));
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_fails_when_device_missing() {
        let (iface, _device) = MockInterface::failing_connect();
        let (link, _handle, _inbound) = RadioLink::new(iface);
        assert!(link.start().await.is_err());
    }

    #[tokio::test]
    async fn test_send_text_is_broadcast_with_id() {
        let (iface, device) = MockInterface::new();
        let (link, handle, _inbound) = RadioLink::new(iface);
        link.start().await.unwrap();

        handle.send_text("bridge-up", 2).await.unwrap();

        let packets = device.sent_packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].to, NodeId::BROADCAST.as_u32());
        assert_eq!(packets[0].channel, 2);
        assert_ne!(packets[0].id, 0);
    }

    #[tokio::test]
    async fn test_send_structured_overrides_routing() {
        let (iface, device) = MockInterface::new();
        let (link, handle, _inbound) = RadioLink::new(iface);
        link.start().await.unwrap();

        let message = MeshMessage::identity(NodeId(0x1111), "ALPHA1", 0);
        handle
            .send_structured(&message, 5, NodeId(0x2222))
            .await
            .unwrap();

        let packet = &device.sent_packets()[0];
        assert_eq!(packet.from, 0x1111);
        assert_eq!(packet.to, 0x2222);
        assert_eq!(packet.channel, 5);
    }

    #[tokio::test]
    async fn test_write_failure_reported_to_sender() {
        let (iface, device) = MockInterface::new();
        let (link, handle, _inbound) = RadioLink::new(iface);
        link.start().await.unwrap();

        device.fail_writes(true);
        assert!(handle.send_text("lost", 2).await.is_err());

        device.fail_writes(false);
        assert!(handle.send_text("ok", 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_inbound_text_and_node_tracking() {
        let (iface, device) = MockInterface::new();
        let (link, handle, mut inbound) = RadioLink::new(iface);
        link.start().await.unwrap();

        device.queue_from_radio(test_utils::node_info(0xabc, "Base Camp", None, 0));
        device.queue_from_radio(test_utils::from_radio_packet(test_utils::text_packet(
            0xabc, 9, "hello",
        )));

        let message = tokio::time::timeout(WAIT, inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.sender, NodeId(0xabc));
        assert_eq!(message.payload, MeshPayload::Text("hello".to_string()));

        let record = handle.node_table().get(NodeId(0xabc)).unwrap();
        assert_eq!(record.name.as_deref(), Some("Base Camp"));
        assert!(record.last_heard.is_some());
    }

    #[tokio::test]
    async fn test_packets_from_local_node_not_forwarded() {
        let (iface, device) = MockInterface::new();
        let (link, _handle, mut inbound) = RadioLink::new(iface);
        link.start().await.unwrap();

        device.queue_from_radio(proto::FromRadio {
            id: 1,
            payload_variant: Some(from_radio::PayloadVariant::MyInfo(proto::MyNodeInfo {
                my_node_num: 0x77,
            })),
        });
        device.queue_from_radio(test_utils::from_radio_packet(test_utils::text_packet(
            0x77, 1, "echo",
        )));
        device.queue_from_radio(test_utils::from_radio_packet(test_utils::text_packet(
            0x78, 2, "other",
        )));

        let message = tokio::time::timeout(WAIT, inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.sender, NodeId(0x78));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_nodes_are_pruned() {
        let (iface, device) = MockInterface::new();
        let (link, handle, _inbound) = RadioLink::new(iface);
        link.with_node_retention(Duration::from_secs(3600))
            .start()
            .await
            .unwrap();

        // heard in 1970
        let mut old = test_utils::text_packet(0x01, 1, "old");
        old.rx_time = 1_000;
        device.queue_from_radio(test_utils::from_radio_packet(old));
        device.queue_from_radio(test_utils::from_radio_packet(test_utils::text_packet(
            0x02, 2, "new",
        )));

        let nodes = handle.node_table().clone();
        for _ in 0..100 {
            if nodes.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(nodes.len(), 2);

        tokio::time::sleep(NODE_PRUNE_INTERVAL + Duration::from_secs(1)).await;

        assert_eq!(nodes.len(), 1);
        assert!(nodes.get(NodeId(0x02)).is_some());
    }

    #[tokio::test]
    async fn test_close_sends_disconnect() {
        let (iface, device) = MockInterface::new();
        let (link, handle, _inbound) = RadioLink::new(iface);
        let task = link.start().await.unwrap();

        handle.close().await.unwrap();
        task.await.unwrap();

        let sent = device.sent_to_radio();
        assert!(matches!(
            sent.last().and_then(|m| m.payload_variant.clone()),
            Some(to_radio::PayloadVariant::Disconnect(true))
        ));
        assert!(handle.send_text("late", 2).await.is_err());
    }
}
