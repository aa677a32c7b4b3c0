//! Configuration types for the bridge
//!
//! Configuration is static: it is built once at startup (from CLI arguments
//! in `takmesh-node`) and injected into every component. Nothing is
//! renegotiated at runtime.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Maximum application payload of a single Meshtastic packet
pub const MESH_MAX_PAYLOAD: usize = 233;

/// Meshtastic stream protocol magic number (first 2 bytes)
pub const MESHTASTIC_MAGIC: u16 = 0x94C3;

/// Default baud rate for Meshtastic serial devices
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default connection timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 10000;

/// TCP port of the Meshtastic device network API
pub const DEFAULT_TCP_PORT: u16 = 4403;

/// Mesh channel index used for bridged traffic (channel 3, zero-based)
pub const DEFAULT_CHANNEL_INDEX: u32 = 2;

/// TAK multicast group
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 2, 3, 1);

/// TAK CoT UDP port
pub const DEFAULT_COT_PORT: u16 = 6969;

/// Multicast TTL for datagrams sent into the TAK network
pub const DEFAULT_MULTICAST_TTL: u32 = 2;

/// Chunk slice size that keeps an encoded envelope inside one mesh packet
///
/// The JSON envelope adds about 80 bytes around the slice, plus escaping of
/// quotes in the event XML.
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 120;

/// Default delay between outbound chunks
pub const DEFAULT_CHUNK_DELAY_MS: u64 = 500;

/// Most parts a chunked message may declare
///
/// A full 64 KiB datagram cut at the default chunk size needs 547 parts.
pub const DEFAULT_MAX_PARTS: u32 = 1024;

/// Default validity window for generated events
pub const DEFAULT_STALE_SECS: u64 = 5 * 60;

/// Default maximum age for mesh nodes to be re-announced
pub const DEFAULT_NODE_MAX_AGE_SECS: u64 = 3 * 3600;

/// Default interval between node table sweeps
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Main configuration for the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Radio interface configuration (serial or TCP)
    #[serde(default)]
    pub radio: InterfaceConfig,

    /// Mesh channel index for all bridged traffic
    #[serde(default = "default_channel_index")]
    pub channel_index: u32,

    /// IP multicast settings
    #[serde(default)]
    pub multicast: MulticastConfig,

    /// Chunked transport settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Generated event timing
    #[serde(default)]
    pub events: EventConfig,

    /// Node re-announcement policy
    #[serde(default)]
    pub freshness: FreshnessConfig,

    /// How admitted events are carried over the mesh
    #[serde(default)]
    pub outbound_mode: OutboundMode,

    /// Send a `bridge-up` text on startup
    #[serde(default = "default_announce_startup")]
    pub announce_startup: bool,

    /// Size of the inbound duplicate suppression cache
    #[serde(default = "default_dedup_cache_size")]
    pub dedup_cache_size: usize,

    /// TTL for duplicate suppression entries
    #[serde(with = "humantime_serde", default = "default_dedup_ttl")]
    pub dedup_ttl: Duration,
}

fn default_channel_index() -> u32 {
    DEFAULT_CHANNEL_INDEX
}

fn default_announce_startup() -> bool {
    true
}

fn default_dedup_cache_size() -> usize {
    1000
}

fn default_dedup_ttl() -> Duration {
    Duration::from_secs(300)
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            radio: InterfaceConfig::default(),
            channel_index: DEFAULT_CHANNEL_INDEX,
            multicast: MulticastConfig::default(),
            transport: TransportConfig::default(),
            events: EventConfig::default(),
            freshness: FreshnessConfig::default(),
            outbound_mode: OutboundMode::default(),
            announce_startup: true,
            dedup_cache_size: default_dedup_cache_size(),
            dedup_ttl: default_dedup_ttl(),
        }
    }
}

impl BridgeConfig {
    /// Reject configurations the bridge cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.transport.max_chunk_bytes == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_chunk_bytes must be at least 1".to_string(),
            ));
        }
        if self.transport.max_pending == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_pending must be at least 1".to_string(),
            ));
        }
        if self.transport.max_parts == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_parts must be at least 1".to_string(),
            ));
        }
        if self.freshness.sweep_interval.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "sweep_interval must be non-zero".to_string(),
            ));
        }
        if self.events.stale_after.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "stale_after must be non-zero".to_string(),
            ));
        }
        if self.dedup_cache_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "dedup_cache_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Interface type for connecting to the Meshtastic device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InterfaceConfig {
    /// Serial port connection (most common)
    Serial {
        /// Path to serial port (e.g., /dev/ttyUSB0), or `auto` to scan
        port: PathBuf,
        /// Baud rate (default: 115200)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// TCP connection to the device network API
    Tcp {
        /// Host address
        host: String,
        /// Port number
        #[serde(default = "default_tcp_port")]
        port: u16,
    },
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        InterfaceConfig::Serial {
            port: PathBuf::from("/dev/ttyUSB0"),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// IP multicast transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MulticastConfig {
    /// Multicast group events are sent to
    #[serde(default = "default_group")]
    pub group: Ipv4Addr,

    /// UDP port for both listening and sending
    #[serde(default = "default_cot_port")]
    pub port: u16,

    /// Multicast TTL on send
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Join the group on the listening socket (unicast is always accepted)
    #[serde(default = "default_join_group")]
    pub join_group: bool,

    /// Local interface used for group membership
    #[serde(default = "default_interface")]
    pub interface: Ipv4Addr,
}

fn default_group() -> Ipv4Addr {
    DEFAULT_MULTICAST_GROUP
}

fn default_cot_port() -> u16 {
    DEFAULT_COT_PORT
}

fn default_ttl() -> u32 {
    DEFAULT_MULTICAST_TTL
}

fn default_join_group() -> bool {
    true
}

fn default_interface() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_COT_PORT,
            ttl: DEFAULT_MULTICAST_TTL,
            join_group: true,
            interface: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Chunked text transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Maximum bytes of payload text per chunk
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,

    /// Pause between outbound chunks (LoRa duty cycle)
    #[serde(with = "humantime_serde", default = "default_chunk_delay")]
    pub chunk_delay: Duration,

    /// Age after which an incomplete reassembly buffer is discarded
    #[serde(with = "humantime_serde", default = "default_reassembly_timeout")]
    pub reassembly_timeout: Duration,

    /// Maximum number of incomplete reassembly buffers kept at once
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// Largest part count accepted from an inbound envelope
    #[serde(default = "default_max_parts")]
    pub max_parts: u32,
}

fn default_max_chunk_bytes() -> usize {
    DEFAULT_MAX_CHUNK_BYTES
}

fn default_chunk_delay() -> Duration {
    Duration::from_millis(DEFAULT_CHUNK_DELAY_MS)
}

fn default_reassembly_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_pending() -> usize {
    64
}

fn default_max_parts() -> u32 {
    DEFAULT_MAX_PARTS
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            chunk_delay: default_chunk_delay(),
            reassembly_timeout: default_reassembly_timeout(),
            max_pending: default_max_pending(),
            max_parts: default_max_parts(),
        }
    }
}

/// Timing of events generated from mesh traffic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Stale time offset from issue time
    #[serde(with = "humantime_serde", default = "default_stale_after")]
    pub stale_after: Duration,
}

fn default_stale_after() -> Duration {
    Duration::from_secs(DEFAULT_STALE_SECS)
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            stale_after: default_stale_after(),
        }
    }
}

/// Policy for re-announcing mesh nodes into the TAK network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessConfig {
    /// Nodes last heard longer ago than this are not announced
    #[serde(with = "humantime_serde", default = "default_max_age")]
    pub max_age: Duration,

    /// Interval between sweeps of the node table
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
}

fn default_max_age() -> Duration {
    Duration::from_secs(DEFAULT_NODE_MAX_AGE_SECS)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS)
}

impl FreshnessConfig {
    /// How long the radio link keeps a silent node before forgetting it
    ///
    /// Twice the announcement window, so a node that comes back shortly
    /// after going stale keeps its name and position.
    pub fn node_retention(&self) -> Duration {
        self.max_age.saturating_mul(2)
    }
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            max_age: default_max_age(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// How admitted TAK events travel over the mesh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundMode {
    /// Translate into native Identity/Position/Text messages
    #[default]
    Native,
    /// Chunk the raw event XML over text messages for a peer bridge
    Tunnel,
    /// Do both
    Both,
}

impl OutboundMode {
    /// Whether translated native messages are sent
    pub fn sends_native(&self) -> bool {
        matches!(self, OutboundMode::Native | OutboundMode::Both)
    }

    /// Whether the raw event is chunked and sent
    pub fn sends_tunnel(&self) -> bool {
        matches!(self, OutboundMode::Tunnel | OutboundMode::Both)
    }
}

impl std::str::FromStr for OutboundMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(OutboundMode::Native),
            "tunnel" => Ok(OutboundMode::Tunnel),
            "both" => Ok(OutboundMode::Both),
            other => Err(BridgeError::InvalidConfig(format!(
                "unknown outbound mode: {}",
                other
            ))),
        }
    }
}

/// Builder for BridgeConfig
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set serial port path
    pub fn serial_port(mut self, port: impl Into<PathBuf>) -> Self {
        self.config.radio = InterfaceConfig::Serial {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        };
        self
    }

    /// Set serial port with baud rate
    pub fn serial_port_with_baud(mut self, port: impl Into<PathBuf>, baud_rate: u32) -> Self {
        self.config.radio = InterfaceConfig::Serial {
            port: port.into(),
            baud_rate,
        };
        self
    }

    /// Connect to the device over TCP instead of serial
    pub fn tcp(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.radio = InterfaceConfig::Tcp {
            host: host.into(),
            port,
        };
        self
    }

    /// Set the mesh channel index
    pub fn channel_index(mut self, index: u32) -> Self {
        self.config.channel_index = index;
        self
    }

    /// Set multicast group and port
    pub fn multicast(mut self, group: Ipv4Addr, port: u16) -> Self {
        self.config.multicast.group = group;
        self.config.multicast.port = port;
        self
    }

    /// Set multicast TTL
    pub fn multicast_ttl(mut self, ttl: u32) -> Self {
        self.config.multicast.ttl = ttl;
        self
    }

    /// Enable or disable joining the multicast group
    pub fn join_group(mut self, join: bool) -> Self {
        self.config.multicast.join_group = join;
        self
    }

    /// Set the local interface used for multicast membership and sending
    pub fn multicast_interface(mut self, interface: Ipv4Addr) -> Self {
        self.config.multicast.interface = interface;
        self
    }

    /// Set maximum chunk size
    pub fn max_chunk_bytes(mut self, bytes: usize) -> Self {
        self.config.transport.max_chunk_bytes = bytes;
        self
    }

    /// Set inter-chunk delay
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.config.transport.chunk_delay = delay;
        self
    }

    /// Set reassembly buffer timeout
    pub fn reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.reassembly_timeout = timeout;
        self
    }

    /// Set maximum number of pending reassembly buffers
    pub fn max_pending(mut self, max: usize) -> Self {
        self.config.transport.max_pending = max;
        self
    }

    /// Set the largest part count accepted from inbound envelopes
    pub fn max_parts(mut self, max: u32) -> Self {
        self.config.transport.max_parts = max;
        self
    }

    /// Set event validity window
    pub fn stale_after(mut self, window: Duration) -> Self {
        self.config.events.stale_after = window;
        self
    }

    /// Set node max age
    pub fn node_max_age(mut self, age: Duration) -> Self {
        self.config.freshness.max_age = age;
        self
    }

    /// Set freshness sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.freshness.sweep_interval = interval;
        self
    }

    /// Set outbound mode
    pub fn outbound_mode(mut self, mode: OutboundMode) -> Self {
        self.config.outbound_mode = mode;
        self
    }

    /// Enable or disable the startup announcement
    pub fn announce_startup(mut self, enabled: bool) -> Self {
        self.config.announce_startup = enabled;
        self
    }

    /// Set duplicate suppression cache size
    pub fn dedup_cache_size(mut self, size: usize) -> Self {
        self.config.dedup_cache_size = size;
        self
    }

    /// Set how long a `(sender, packet id)` pair is remembered
    pub fn dedup_ttl(mut self, ttl: Duration) -> Self {
        self.config.dedup_ttl = ttl;
        self
    }

    /// Build the configuration
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.channel_index, 2);
        assert_eq!(config.multicast.group, Ipv4Addr::new(239, 2, 3, 1));
        assert_eq!(config.multicast.port, 6969);
        assert_eq!(config.transport.max_chunk_bytes, 120);
        assert_eq!(config.transport.chunk_delay, Duration::from_millis(500));
        assert_eq!(config.events.stale_after, Duration::from_secs(300));
        assert_eq!(config.freshness.max_age, Duration::from_secs(10800));
        assert_eq!(config.freshness.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.outbound_mode, OutboundMode::Native);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BridgeConfigBuilder::new()
            .serial_port("/dev/ttyACM0")
            .channel_index(0)
            .max_chunk_bytes(100)
            .outbound_mode(OutboundMode::Both)
            .build();

        assert_eq!(config.channel_index, 0);
        assert_eq!(config.transport.max_chunk_bytes, 100);
        assert!(config.outbound_mode.sends_native());
        assert!(config.outbound_mode.sends_tunnel());
        assert_eq!(
            config.radio,
            InterfaceConfig::Serial {
                port: PathBuf::from("/dev/ttyACM0"),
                baud_rate: DEFAULT_BAUD_RATE,
            }
        );
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let config = BridgeConfigBuilder::new().max_chunk_bytes(0).build();
        assert!(matches!(
            config.validate(),
            Err(BridgeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_sweep() {
        let config = BridgeConfigBuilder::new()
            .sweep_interval(Duration::ZERO)
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_outbound_mode_parsing() {
        assert_eq!("native".parse::<OutboundMode>().unwrap(), OutboundMode::Native);
        assert_eq!("Tunnel".parse::<OutboundMode>().unwrap(), OutboundMode::Tunnel);
        assert!("chunked".parse::<OutboundMode>().is_err());
        assert!(!OutboundMode::Tunnel.sends_native());
    }

    #[test]
    fn test_humantime_round_trip_through_json() {
        let config = BridgeConfigBuilder::new()
            .stale_after(Duration::from_secs(600))
            .build();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"10m\""));
        let back: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.events.stale_after, Duration::from_secs(600));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"radio":{"type":"tcp","host":"10.0.0.5"}}"#).unwrap();
        assert_eq!(
            config.radio,
            InterfaceConfig::Tcp {
                host: "10.0.0.5".to_string(),
                port: DEFAULT_TCP_PORT,
            }
        );
        assert_eq!(config.channel_index, DEFAULT_CHANNEL_INDEX);
    }
}
