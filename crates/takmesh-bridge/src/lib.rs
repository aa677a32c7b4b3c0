//! TAK ↔ Meshtastic bridge
//!
//! This crate bridges Cursor-on-Target (CoT) events on a TAK multicast
//! network with a Meshtastic LoRa mesh reached through one attached radio,
//! so ATAK/WinTAK users and mesh users see each other's positions and chat.
//!
//! # Architecture
//!
//! The bridge operates in four layers:
//!
//! 1. **Physical Interface** - Serial/TCP connection to the Meshtastic device
//!    ([`interface`], [`radio`])
//! 2. **Transport** - chunk envelopes that carry oversized text over the
//!    233-byte mesh payload ([`transport`])
//! 3. **Translation** - CoT events ↔ Identity/Position/Text mesh messages
//!    ([`filter`], [`translator`], [`identity`], [`freshness`])
//! 4. **Service** - the bridge loop and the UDP multicast side ([`bridge`],
//!    [`udp`])
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use takmesh_bridge::{
//!     BridgeConfigBuilder, RadioLink, TakMeshBridge, TcpInterface, UdpTransport,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfigBuilder::new().tcp("meshtastic.local", 4403).build();
//!
//!     let (link, radio, inbound) = RadioLink::new(TcpInterface::new("meshtastic.local"));
//!     link.start().await?;
//!
//!     let udp = UdpTransport::bind(&config.multicast)?;
//!     let (bridge, handle) = TakMeshBridge::new(&config, radio, inbound, udp.publisher());
//!     udp.spawn_receiver(handle);
//!
//!     bridge.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `serial` - Serial port interface and device discovery (requires
//!   `libudev-dev` on Linux)
//! - `tcp` - TCP interface for networked devices (default)
//!
//! # Message Flow
//!
//! ## TAK → mesh
//!
//! 1. UdpTransport receives a datagram
//! 2. The event filter admits `a-*` positions and `b-t-f` chat
//! 3. MessageTranslator derives the synthetic node from the callsign
//! 4. RadioLink sends Identity, then Position or Text
//!
//! ## mesh → TAK
//!
//! 1. RadioLink decodes `FromRadio` and updates the node table
//! 2. DeduplicationCache drops repeated `(sender, packet id)`
//! 3. Chunk envelopes go to the Reassembler, other messages to the translator
//! 4. The resulting event is published to the multicast group
//!
//! Every sweep interval, nodes heard within the freshness window are
//! re-announced as friendly ground units.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Core modules
pub mod config;
pub mod error;
pub mod identity;

// Tactical events
pub mod cot;
pub mod filter;

// Mesh side
pub mod interface;
pub mod nodes;
pub mod packet;
#[allow(missing_docs)]
pub mod proto;
pub mod radio;

// Bridge components
pub mod cache;
pub mod freshness;
pub mod translator;
pub mod transport;

// Service
pub mod bridge;
pub mod udp;

// Testing utilities
pub mod test_utils;

// Re-exports for convenience
pub use config::{
    BridgeConfig, BridgeConfigBuilder, EventConfig, FreshnessConfig, InterfaceConfig,
    MulticastConfig, OutboundMode, TransportConfig,
};
pub use error::{BridgeError, Result};
pub use identity::{resolve_callsign, NodeId};

pub use cot::{CotEvent, EventTimes, Point};
pub use filter::{admit, is_admitted, EventCategory};

pub use interface::{
    find_meshtastic_device, list_available_devices, ConnectionState, DeviceInfo,
    MeshtasticInterface,
};
#[cfg(feature = "serial")]
pub use interface::SerialInterface;
#[cfg(feature = "tcp")]
pub use interface::TcpInterface;
pub use nodes::{NodeMetrics, NodePosition, NodeRecord, NodeTable};
pub use packet::{MeshCategory, MeshMessage, MeshPayload};
pub use radio::{RadioHandle, RadioLink};

pub use cache::{DeduplicationCache, DeduplicationKey};
pub use freshness::{FreshnessFilter, Sweep};
pub use translator::MessageTranslator;
pub use transport::{frame, ChunkEnvelope, Framer, Reassembler};

pub use bridge::{BridgeHandle, BridgeStats, PublishCallback, TakMeshBridge};
pub use udp::UdpTransport;

pub use test_utils::{MockDevice, MockInterface};

// Protocol constants re-exports
pub use config::{
    DEFAULT_BAUD_RATE, DEFAULT_COT_PORT, DEFAULT_MULTICAST_GROUP, DEFAULT_TIMEOUT_MS,
    MESHTASTIC_MAGIC, MESH_MAX_PAYLOAD,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
