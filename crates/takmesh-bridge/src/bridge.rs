//! TakMeshBridge - the bridge service
//!
//! Connects the TAK multicast network with the Meshtastic mesh:
//!
//! - IP → mesh: admitted events are translated into Identity + Position or
//!   Identity + Text messages, and/or tunnelled whole as chunk envelopes
//! - mesh → IP: inbound messages become tactical events; chunk envelopes are
//!   reassembled and the original event is forwarded verbatim
//! - periodically, fresh mesh nodes are re-announced as tactical events
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        TakMeshBridge                          │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  ┌─────────────┐    ┌──────────────┐    ┌────────────────┐    │
//! │  │ RadioLink   │───►│ Bridge Core  │◄───│ BridgeHandle   │    │
//! │  │ (inbound rx)│    │              │    │ (UDP receiver) │    │
//! │  └─────────────┘    │ Translator   │    └────────────────┘    │
//! │  ┌─────────────┐    │ Reassembler  │    ┌────────────────┐    │
//! │  │ RadioHandle │◄───│ Freshness    │───►│ PublishCallback│    │
//! │  │ (sends)     │    │ DedupCache   │    │ (UDP sender)   │    │
//! │  └─────────────┘    └──────────────┘    └────────────────┘    │
//! │                                                               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one task, so the reassembly table and the outbound
//! send sequence have a single writer.
//!
//! # Example
//!
//! ```rust,ignore
//! let (link, radio, inbound) = RadioLink::new(interface);
//! link.start().await?;
//!
//! let udp = UdpTransport::bind(&config.multicast)?;
//! let (bridge, handle) = TakMeshBridge::new(&config, radio, inbound, udp.publisher());
//! udp.spawn_receiver(handle.clone());
//!
//! bridge.run().await?;
//! ```

use chrono::Utc;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::cache::{DeduplicationCache, DeduplicationKey};
use crate::config::{BridgeConfig, OutboundMode, MESH_MAX_PAYLOAD};
use crate::cot::CotEvent;
use crate::error::{BridgeError, Result};
use crate::filter;
use crate::freshness::FreshnessFilter;
use crate::packet::{MeshMessage, MeshPayload};
use crate::radio::RadioHandle;
use crate::transport::{self, Reassembler};
use crate::translator::{MessageTranslator, MESH_UID_PREFIX};

/// Text broadcast on the mesh when the bridge starts
pub const STARTUP_ANNOUNCEMENT: &str = "bridge-up";

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(30);

const ECHO_CAPACITY: usize = 256;
const ECHO_TTL: Duration = Duration::from_secs(30);

/// Commands that can be sent to the bridge
#[derive(Debug)]
pub enum BridgeCommand {
    /// A datagram received from the IP network
    ForwardToMesh(String),
    /// Get bridge statistics
    GetStats(oneshot::Sender<BridgeStats>),
    /// Shutdown the bridge
    Shutdown,
}

/// Bridge statistics
#[derive(Debug, Clone, Default)]
pub struct BridgeStats {
    /// Datagrams received from IP
    pub events_from_ip: u64,
    /// Datagrams the event filter rejected
    pub events_rejected: u64,
    /// Our own output heard back from IP
    pub echoes_ignored: u64,
    /// Structured messages sent to the mesh
    pub mesh_messages_sent: u64,
    /// Tunnel chunks sent to the mesh
    pub chunks_sent: u64,
    /// Radio sends that failed
    pub link_send_errors: u64,
    /// Events published to IP
    pub events_to_ip: u64,
    /// Tunnelled events reassembled from the mesh
    pub reassembled_messages: u64,
    /// Node announcements published by sweeps
    pub nodes_announced: u64,
    /// Nodes left out of sweeps as stale
    pub nodes_skipped_stale: u64,
    /// Inbound mesh packets dropped as duplicates
    pub duplicates_blocked: u64,
    /// Malformed chunk envelopes or payloads
    pub parse_errors: u64,
    /// Admitted events that could not be translated
    pub translation_errors: u64,
}

/// Callback for publishing tactical events to the IP network
pub type PublishCallback = Arc<dyn Fn(String) -> std::result::Result<(), String> + Send + Sync>;

/// Handle for controlling the TakMeshBridge
#[derive(Clone)]
pub struct BridgeHandle {
    command_tx: mpsc::Sender<BridgeCommand>,
}

impl BridgeHandle {
    /// Hand a datagram received from IP to the bridge
    pub async fn forward_to_mesh(&self, datagram: impl Into<String>) -> Result<()> {
        self.command_tx
            .send(BridgeCommand::ForwardToMesh(datagram.into()))
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }

    /// Get bridge statistics
    pub async fn stats(&self) -> Result<BridgeStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(BridgeCommand::GetStats(tx))
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Shutdown the bridge
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(BridgeCommand::Shutdown)
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }
}

/// Recently published datagrams, so the bridge ignores its own multicast
struct EchoGuard {
    recent: LruCache<[u8; 32], Instant>,
}

impl EchoGuard {
    fn new() -> Self {
        let cap = NonZeroUsize::new(ECHO_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            recent: LruCache::new(cap),
        }
    }

    fn digest(datagram: &str) -> [u8; 32] {
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(datagram.trim().as_bytes()));
        key
    }

    fn record(&mut self, datagram: &str) {
        self.recent.put(Self::digest(datagram), Instant::now());
    }

    fn is_echo(&mut self, datagram: &str) -> bool {
        let key = Self::digest(datagram);
        match self.recent.get(&key) {
            Some(sent) if sent.elapsed() <= ECHO_TTL => true,
            Some(_) => {
                self.recent.pop(&key);
                false
            }
            None => false,
        }
    }
}

/// Main bridge service connecting TAK multicast to the Meshtastic mesh
pub struct TakMeshBridge {
    /// Sends to the radio
    radio: RadioHandle,
    /// Messages from the radio
    inbound_rx: mpsc::Receiver<MeshMessage>,
    /// Command receiver
    command_rx: mpsc::Receiver<BridgeCommand>,
    /// Callback for publishing to IP
    publish_callback: PublishCallback,
    translator: MessageTranslator,
    reassembler: Reassembler,
    freshness: FreshnessFilter,
    dedup_cache: DeduplicationCache,
    echo_guard: EchoGuard,
    channel: u32,
    outbound_mode: OutboundMode,
    max_chunk_bytes: usize,
    chunk_delay: Duration,
    sweep_interval: Duration,
    announce_startup: bool,
    /// Bridge statistics
    stats: BridgeStats,
}

impl TakMeshBridge {
    /// Create a bridge over a started radio link
    pub fn new(
        config: &BridgeConfig,
        radio: RadioHandle,
        inbound_rx: mpsc::Receiver<MeshMessage>,
        publish_callback: PublishCallback,
    ) -> (Self, BridgeHandle) {
        let translator = MessageTranslator::from_config(config, radio.node_table().clone());

        let (command_tx, command_rx) = mpsc::channel(256);
        let handle = BridgeHandle { command_tx };

        let bridge = Self {
            radio,
            inbound_rx,
            command_rx,
            publish_callback,
            translator,
            reassembler: Reassembler::from_config(&config.transport),
            freshness: FreshnessFilter::from_config(&config.freshness),
            dedup_cache: DeduplicationCache::from_config(config),
            echo_guard: EchoGuard::new(),
            channel: config.channel_index,
            outbound_mode: config.outbound_mode,
            max_chunk_bytes: config.transport.max_chunk_bytes,
            chunk_delay: config.transport.chunk_delay,
            sweep_interval: config.freshness.sweep_interval,
            announce_startup: config.announce_startup,
            stats: BridgeStats::default(),
        };

        (bridge, handle)
    }

    /// Run the bridge service
    ///
    /// Returns `Ok` on shutdown, and `Err(Disconnected)` if the radio link
    /// goes away underneath the bridge.
    pub async fn run(mut self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "sweep_interval must be non-zero".to_string(),
            ));
        }

        info!(
            channel = self.channel,
            mode = ?self.outbound_mode,
            "Starting TAK mesh bridge"
        );

        if self.announce_startup {
            match self.radio.send_text(STARTUP_ANNOUNCEMENT, self.channel).await {
                Ok(()) => info!("Sent startup announcement"),
                Err(e) => warn!(error = %e, "Startup announcement failed"),
            }
        }

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = self.inbound_rx.recv() => {
                    match message {
                        Some(message) => self.handle_mesh_message(message),
                        None => {
                            error!("Radio link closed, stopping bridge");
                            return Err(BridgeError::Disconnected);
                        }
                    }
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(BridgeCommand::ForwardToMesh(datagram)) => {
                            self.handle_datagram(datagram).await;
                        }
                        Some(BridgeCommand::GetStats(tx)) => {
                            let _ = tx.send(self.stats.clone());
                        }
                        Some(BridgeCommand::Shutdown) | None => {
                            info!("Bridge shutdown requested");
                            break;
                        }
                    }
                }

                _ = sweep.tick() => self.sweep_nodes(),

                _ = housekeeping.tick() => {
                    let expired = self.reassembler.expire_old_entries();
                    self.dedup_cache.expire_old_entries();
                    trace!(
                        expired_buffers = expired,
                        pending = self.reassembler.pending_count(),
                        from_ip = self.stats.events_from_ip,
                        to_ip = self.stats.events_to_ip,
                        "Bridge housekeeping"
                    );
                }
            }
        }

        info!("TAK mesh bridge stopped");
        Ok(())
    }

    /// IP → mesh for one datagram
    async fn handle_datagram(&mut self, datagram: String) {
        self.stats.events_from_ip += 1;

        if self.echo_guard.is_echo(&datagram) {
            trace!("Ignoring datagram published by this bridge");
            self.stats.echoes_ignored += 1;
            return;
        }

        let Some((event, _category)) = filter::admit(&datagram) else {
            self.stats.events_rejected += 1;
            return;
        };

        if event.uid.starts_with(MESH_UID_PREFIX) {
            debug!(uid = %event.uid, "Ignoring event that originated on a mesh");
            self.stats.echoes_ignored += 1;
            return;
        }

        if self.outbound_mode.sends_native() {
            self.send_native(&event).await;
        }
        if self.outbound_mode.sends_tunnel() {
            self.send_tunnel(&datagram).await;
        }
    }

    /// Send the translated identity/payload pair
    async fn send_native(&mut self, event: &CotEvent) {
        let messages = match self.translator.cot_to_mesh(event, Utc::now()) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(uid = %event.uid, error = %e, "Cannot translate event, dropping");
                self.stats.translation_errors += 1;
                return;
            }
        };

        for message in &messages {
            if let Err(e) = self
                .radio
                .send_structured(message, self.channel, message.destination)
                .await
            {
                error!(
                    uid = %event.uid,
                    node_id = %message.sender,
                    category = ?message.category(),
                    error = %e,
                    "Link send failed, abandoning event"
                );
                self.stats.link_send_errors += 1;
                return;
            }
            self.stats.mesh_messages_sent += 1;
        }

        debug!(uid = %event.uid, node_id = %messages[0].sender, "Event sent to mesh");
    }

    /// Send the whole event as paced chunk envelopes
    async fn send_tunnel(&mut self, xml: &str) {
        let chunks = transport::frame(xml, self.max_chunk_bytes);
        let msgid = chunks.msgid().to_string();
        let total = chunks.len();

        for envelope in chunks {
            let part = envelope.part;
            let text = match envelope.encode() {
                Ok(text) => text,
                Err(e) => {
                    error!(msgid = %msgid, error = %e, "Cannot encode chunk envelope");
                    return;
                }
            };
            if text.len() > MESH_MAX_PAYLOAD {
                warn!(
                    msgid = %msgid,
                    part,
                    size = text.len(),
                    max = MESH_MAX_PAYLOAD,
                    "Chunk exceeds mesh payload, abandoning message"
                );
                self.stats.link_send_errors += 1;
                return;
            }

            if let Err(e) = self.radio.send_text(&text, self.channel).await {
                error!(msgid = %msgid, part, error = %e, "Link send failed, abandoning message");
                self.stats.link_send_errors += 1;
                return;
            }
            self.stats.chunks_sent += 1;

            tokio::time::sleep(self.chunk_delay).await;
        }

        debug!(msgid = %msgid, total, "Event tunnelled to mesh");
    }

    /// Mesh → IP for one inbound message
    fn handle_mesh_message(&mut self, message: MeshMessage) {
        if message.packet_id != 0 {
            let key = DeduplicationKey::new(message.sender, message.packet_id);
            if self.dedup_cache.is_duplicate(&key) {
                self.stats.duplicates_blocked += 1;
                return;
            }
        }

        if let MeshPayload::Text(text) = &message.payload {
            if text.trim_start().starts_with('{') {
                self.handle_chunk(&message, text);
                return;
            }
        }

        match self.translator.mesh_to_cot(&message, Utc::now()) {
            Some(event) => {
                debug!(
                    node_id = %message.sender,
                    uid = %event.uid,
                    event_type = %event.event_type,
                    "Mesh message translated"
                );
                self.publish(event.to_xml());
            }
            None => trace!(node_id = %message.sender, category = ?message.category(), "Nothing to publish"),
        }
    }

    fn handle_chunk(&mut self, message: &MeshMessage, text: &str) {
        match self.reassembler.accept_text(text) {
            Ok(Some(payload)) => {
                self.stats.reassembled_messages += 1;
                if filter::is_admitted(&payload) {
                    self.publish(payload);
                } else {
                    warn!(node_id = %message.sender, "Reassembled payload is not a carried event");
                    self.stats.parse_errors += 1;
                }
            }
            Ok(None) => trace!(node_id = %message.sender, "Chunk buffered"),
            Err(e) => {
                warn!(node_id = %message.sender, error = %e, "Dropping malformed chunk envelope");
                self.stats.parse_errors += 1;
            }
        }
    }

    /// Re-announce fresh mesh nodes
    fn sweep_nodes(&mut self) {
        let now = Utc::now();
        let sweep = self
            .freshness
            .sweep(self.radio.node_table().snapshot(), now);

        self.stats.nodes_skipped_stale += sweep.skipped as u64;
        for record in &sweep.announced {
            let event = self.translator.node_to_cot(record, now);
            self.publish(event.to_xml());
            self.stats.nodes_announced += 1;
        }

        debug!(
            announced = sweep.announced.len(),
            skipped = sweep.skipped,
            "Node sweep"
        );
    }

    fn publish(&mut self, xml: String) {
        self.echo_guard.record(&xml);
        match (self.publish_callback)(xml) {
            Ok(()) => self.stats.events_to_ip += 1,
            Err(e) => warn!(error = %e, "Failed to publish event to IP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfigBuilder;
    use crate::identity::{resolve_callsign, NodeId};
    use crate::proto::{mesh_packet, PortNum};
    use crate::radio::RadioLink;
    use crate::test_utils::{self, MockDevice, MockInterface};
    use crate::transport::ChunkEnvelope;
    use parking_lot::Mutex;

    const POSITION_EVENT: &str = r#"<event version="2.0" type="a-f-G-U-C" uid="ANDROID-1" how="m-g" time="2024-05-01T12:00:00Z" start="2024-05-01T12:00:00Z" stale="2024-05-01T12:05:00Z"><point lat="34.0" lon="-118.0" hae="0" ce="10" le="10"/><detail><contact callsign="ALPHA1"/></detail></event>"#;

    struct Harness {
        bridge: TakMeshBridge,
        device: MockDevice,
        published: Arc<Mutex<Vec<String>>>,
    }

    fn test_config(mode: OutboundMode) -> BridgeConfigBuilder {
        BridgeConfigBuilder::new()
            .outbound_mode(mode)
            .chunk_delay(Duration::ZERO)
            .max_chunk_bytes(64)
            .announce_startup(false)
    }

    async fn create_test_bridge(mode: OutboundMode) -> Harness {
        create_bridge_with_config(&test_config(mode).build()).await
    }

    async fn create_bridge_with_config(config: &BridgeConfig) -> Harness {
        let (iface, device) = MockInterface::new();
        let (link, radio, inbound) = RadioLink::new(iface);
        link.start().await.unwrap();

        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        let publish_callback: PublishCallback = Arc::new(move |xml| {
            sink.lock().push(xml);
            Ok(())
        });

        let (bridge, _handle) = TakMeshBridge::new(config, radio, inbound, publish_callback);
        Harness {
            bridge,
            device,
            published,
        }
    }

    fn text_of(packet: &crate::proto::MeshPacket) -> String {
        match &packet.payload_variant {
            Some(mesh_packet::PayloadVariant::Decoded(data)) => {
                String::from_utf8(data.payload.clone()).unwrap()
            }
            _ => panic!("not a decoded packet"),
        }
    }

    #[tokio::test]
    async fn test_native_position_sends_identity_then_position() {
        let mut h = create_test_bridge(OutboundMode::Native).await;
        h.bridge.handle_datagram(POSITION_EVENT.to_string()).await;

        let packets = h.device.sent_packets();
        assert_eq!(packets.len(), 2);
        let id = resolve_callsign("ALPHA1").as_u32();
        assert!(packets.iter().all(|p| p.from == id));

        let ports: Vec<i32> = packets
            .iter()
            .map(|p| match &p.payload_variant {
                Some(mesh_packet::PayloadVariant::Decoded(data)) => data.portnum,
                _ => -1,
            })
            .collect();
        assert_eq!(
            ports,
            vec![PortNum::NodeinfoApp as i32, PortNum::PositionApp as i32]
        );
        assert_eq!(h.bridge.stats.mesh_messages_sent, 2);
    }

    #[tokio::test]
    async fn test_rejected_event_sends_nothing() {
        let mut h = create_test_bridge(OutboundMode::Both).await;
        let xml = POSITION_EVENT.replace("a-f-G-U-C", "b-m-p-s-p-i");
        h.bridge.handle_datagram(xml).await;
        h.bridge.handle_datagram("not xml at all".to_string()).await;

        assert!(h.device.sent_packets().is_empty());
        assert_eq!(h.bridge.stats.events_rejected, 2);
    }

    #[tokio::test]
    async fn test_identity_failure_abandons_pair() {
        let mut h = create_test_bridge(OutboundMode::Native).await;
        h.device.fail_writes(true);
        h.bridge.handle_datagram(POSITION_EVENT.to_string()).await;

        assert_eq!(h.bridge.stats.link_send_errors, 1);
        assert_eq!(h.bridge.stats.mesh_messages_sent, 0);
    }

    #[tokio::test]
    async fn test_position_without_point_is_dropped() {
        let mut h = create_test_bridge(OutboundMode::Native).await;
        let xml = r#"<event version="2.0" type="a-f-G" uid="x" how="m-g"><detail><contact callsign="B"/></detail></event>"#;
        h.bridge.handle_datagram(xml.to_string()).await;

        assert!(h.device.sent_packets().is_empty());
        assert_eq!(h.bridge.stats.translation_errors, 1);
    }

    #[tokio::test]
    async fn test_tunnel_chunks_reassemble_to_original() {
        let mut h = create_test_bridge(OutboundMode::Tunnel).await;
        h.bridge.handle_datagram(POSITION_EVENT.to_string()).await;

        let packets = h.device.sent_packets();
        assert!(packets.len() > 1);
        assert!(packets.iter().all(|p| p.to == NodeId::BROADCAST.as_u32()));

        let mut reassembler = Reassembler::default();
        let mut result = None;
        for packet in &packets {
            let text = text_of(packet);
            assert!(text.len() <= MESH_MAX_PAYLOAD);
            result = reassembler.accept_text(&text).unwrap();
        }
        assert_eq!(result.as_deref(), Some(POSITION_EVENT));
        assert_eq!(h.bridge.stats.chunks_sent, packets.len() as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tunnel_chunks_are_paced() {
        let delay = Duration::from_millis(500);
        let config = test_config(OutboundMode::Tunnel).chunk_delay(delay).build();
        let mut h = create_bridge_with_config(&config).await;

        let start = tokio::time::Instant::now();
        h.bridge.handle_datagram(POSITION_EVENT.to_string()).await;
        let elapsed = start.elapsed();

        let chunks = h.device.sent_packets().len() as u32;
        assert!(chunks > 1);
        assert_eq!(h.bridge.stats.chunks_sent, u64::from(chunks));
        assert!(elapsed >= delay * chunks, "{:?} for {} chunks", elapsed, chunks);
        assert!(elapsed < delay * (chunks + 1), "{:?} for {} chunks", elapsed, chunks);
    }

    #[tokio::test]
    async fn test_own_events_are_not_sent_back() {
        let mut h = create_test_bridge(OutboundMode::Native).await;
        let mesh_event = POSITION_EVENT.replace("ANDROID-1", "Mesh-!00000abc");
        h.bridge.handle_datagram(mesh_event).await;

        h.bridge.publish(POSITION_EVENT.to_string());
        h.bridge.handle_datagram(format!("{}\n", POSITION_EVENT)).await;

        assert!(h.device.sent_packets().is_empty());
        assert_eq!(h.bridge.stats.echoes_ignored, 2);
    }

    #[tokio::test]
    async fn test_inbound_text_becomes_chat_event() {
        let mut h = create_test_bridge(OutboundMode::Native).await;
        h.bridge
            .handle_mesh_message(MeshMessage::text(NodeId(0xabc), "hello tak", 2));

        let published = h.published.lock().clone();
        assert_eq!(published.len(), 1);
        let event = CotEvent::parse(&published[0]).unwrap();
        assert!(event.is_chat());
        assert_eq!(event.callsign(), "!00000abc");
        assert_eq!(
            event.detail.chat.as_ref().map(|c| c.msg.as_str()),
            Some("hello tak")
        );
    }

    #[tokio::test]
    async fn test_inbound_chunks_forwarded_verbatim() {
        let mut h = create_test_bridge(OutboundMode::Native).await;
        let envelopes: Vec<ChunkEnvelope> = transport::frame(POSITION_EVENT, 50).collect();

        for (i, envelope) in envelopes.iter().rev().enumerate() {
            let mut message = MeshMessage::text(NodeId(0x55), envelope.encode().unwrap(), 2);
            message.packet_id = i as u32 + 1;
            h.bridge.handle_mesh_message(message);
        }

        assert_eq!(h.published.lock().clone(), vec![POSITION_EVENT.to_string()]);
        assert_eq!(h.bridge.stats.reassembled_messages, 1);
    }

    #[tokio::test]
    async fn test_malformed_envelope_dropped() {
        let mut h = create_test_bridge(OutboundMode::Native).await;
        h.bridge
            .handle_mesh_message(MeshMessage::text(NodeId(0x55), "{\"msgid\": 3", 2));

        assert!(h.published.lock().is_empty());
        assert_eq!(h.bridge.stats.parse_errors, 1);
    }

    #[tokio::test]
    async fn test_duplicate_packets_blocked() {
        let mut h = create_test_bridge(OutboundMode::Native).await;
        let mut message = MeshMessage::text(NodeId(0x55), "once", 2);
        message.packet_id = 42;

        h.bridge.handle_mesh_message(message.clone());
        h.bridge.handle_mesh_message(message);

        assert_eq!(h.published.lock().len(), 1);
        assert_eq!(h.bridge.stats.duplicates_blocked, 1);
    }

    #[tokio::test]
    async fn test_sweep_skips_stale_nodes() {
        let mut h = create_test_bridge(OutboundMode::Native).await;
        let now = Utc::now().timestamp() as u32;
        h.device
            .queue_from_radio(test_utils::node_info(1, "Fresh", Some((1.0, 2.0)), now - 3600));
        h.device
            .queue_from_radio(test_utils::node_info(2, "Stale", None, now - 4 * 3600));
        h.device
            .queue_from_radio(test_utils::node_info(3, "Never", None, 0));

        let nodes = h.bridge.radio.node_table().clone();
        for _ in 0..200 {
            if nodes.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(nodes.len(), 3);

        h.bridge.sweep_nodes();

        let mut callsigns: Vec<String> = h
            .published
            .lock()
            .iter()
            .map(|xml| CotEvent::parse(xml).unwrap().callsign().to_string())
            .collect();
        callsigns.sort();
        assert_eq!(callsigns, vec!["Fresh", "Never"]);
        assert_eq!(h.bridge.stats.nodes_skipped_stale, 1);
    }
}
