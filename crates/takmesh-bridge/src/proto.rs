//! Meshtastic protobuf subset
//!
//! Hand-derived `prost` messages for the fields of the Meshtastic device API
//! the bridge reads or writes. Tags match `meshtastic/mesh.proto`,
//! `portnums.proto` and `telemetry.proto`; unknown fields from newer firmware
//! are skipped by the decoder.

/// Application port numbers carried in [`Data::portnum`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PortNum {
    /// Unknown or unset
    UnknownApp = 0,
    /// UTF-8 text message
    TextMessageApp = 1,
    /// Position report, payload is [`Position`]
    PositionApp = 3,
    /// Node identity, payload is [`User`]
    NodeinfoApp = 4,
    /// Routing and acknowledgment
    RoutingApp = 5,
    /// Administration
    AdminApp = 6,
    /// Telemetry, payload is [`Telemetry`]
    TelemetryApp = 67,
}

/// Hardware model written for synthetic nodes
pub const HW_MODEL_PRIVATE: i32 = 255;

/// Decoded packet payload
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Data {
    #[prost(enumeration = "PortNum", tag = "1")]
    pub portnum: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
    #[prost(bool, tag = "3")]
    pub want_response: bool,
}

/// Position report
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Position {
    /// Latitude in 1e-7 degrees
    #[prost(sfixed32, tag = "1")]
    pub latitude_i: i32,
    /// Longitude in 1e-7 degrees
    #[prost(sfixed32, tag = "2")]
    pub longitude_i: i32,
    /// Altitude above MSL, meters
    #[prost(int32, tag = "3")]
    pub altitude: i32,
    /// Capture time, seconds since the epoch
    #[prost(fixed32, tag = "4")]
    pub time: u32,
}

/// Node identity
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
    /// Node id string, `!xxxxxxxx`
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub long_name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub short_name: ::prost::alloc::string::String,
    #[prost(int32, tag = "5")]
    pub hw_model: i32,
}

/// Device health metrics
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceMetrics {
    /// Battery level, percent (101 means powered)
    #[prost(uint32, tag = "1")]
    pub battery_level: u32,
    #[prost(float, tag = "2")]
    pub voltage: f32,
    #[prost(float, tag = "3")]
    pub channel_utilization: f32,
    #[prost(float, tag = "4")]
    pub air_util_tx: f32,
    #[prost(uint32, tag = "5")]
    pub uptime_seconds: u32,
}

/// Telemetry packet payload
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Telemetry {
    #[prost(fixed32, tag = "1")]
    pub time: u32,
    #[prost(oneof = "telemetry::Variant", tags = "2")]
    pub variant: ::core::option::Option<telemetry::Variant>,
}

/// Nested types in `Telemetry`
pub mod telemetry {
    #[allow(clippy::derive_partial_eq_without_eq)]
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        #[prost(message, tag = "2")]
        DeviceMetrics(super::DeviceMetrics),
    }
}

/// A packet on the mesh
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MeshPacket {
    #[prost(fixed32, tag = "1")]
    pub from: u32,
    #[prost(fixed32, tag = "2")]
    pub to: u32,
    /// Channel index
    #[prost(uint32, tag = "3")]
    pub channel: u32,
    #[prost(oneof = "mesh_packet::PayloadVariant", tags = "4, 5")]
    pub payload_variant: ::core::option::Option<mesh_packet::PayloadVariant>,
    #[prost(fixed32, tag = "6")]
    pub id: u32,
    /// Receive time, seconds since the epoch
    #[prost(fixed32, tag = "7")]
    pub rx_time: u32,
    #[prost(float, tag = "8")]
    pub rx_snr: f32,
    #[prost(uint32, tag = "9")]
    pub hop_limit: u32,
    #[prost(bool, tag = "10")]
    pub want_ack: bool,
}

/// Nested types in `MeshPacket`
pub mod mesh_packet {
    #[allow(clippy::derive_partial_eq_without_eq)]
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        /// Payload the device could decrypt
        #[prost(message, tag = "4")]
        Decoded(super::Data),
        /// Payload for a channel this device has no key for
        #[prost(bytes, tag = "5")]
        Encrypted(::prost::alloc::vec::Vec<u8>),
    }
}

/// Local node number
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MyNodeInfo {
    #[prost(uint32, tag = "1")]
    pub my_node_num: u32,
}

/// Node database entry
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeInfo {
    #[prost(uint32, tag = "1")]
    pub num: u32,
    #[prost(message, optional, tag = "2")]
    pub user: ::core::option::Option<User>,
    #[prost(message, optional, tag = "3")]
    pub position: ::core::option::Option<Position>,
    #[prost(float, tag = "4")]
    pub snr: f32,
    /// Last time the node was heard, seconds since the epoch (0 = never)
    #[prost(fixed32, tag = "5")]
    pub last_heard: u32,
    #[prost(message, optional, tag = "6")]
    pub device_metrics: ::core::option::Option<DeviceMetrics>,
}

/// Host to device
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToRadio {
    #[prost(oneof = "to_radio::PayloadVariant", tags = "1, 3, 4")]
    pub payload_variant: ::core::option::Option<to_radio::PayloadVariant>,
}

/// Nested types in `ToRadio`
pub mod to_radio {
    #[allow(clippy::derive_partial_eq_without_eq)]
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        /// Send a packet
        #[prost(message, tag = "1")]
        Packet(super::MeshPacket),
        /// Ask the device to dump its config and node database
        #[prost(uint32, tag = "3")]
        WantConfigId(u32),
        /// Tell the device the host is going away
        #[prost(bool, tag = "4")]
        Disconnect(bool),
    }
}

/// Device to host
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FromRadio {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(oneof = "from_radio::PayloadVariant", tags = "2, 3, 4, 7, 8")]
    pub payload_variant: ::core::option::Option<from_radio::PayloadVariant>,
}

/// Nested types in `FromRadio`
pub mod from_radio {
    #[allow(clippy::derive_partial_eq_without_eq)]
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        /// Packet received from the mesh
        #[prost(message, tag = "2")]
        Packet(super::MeshPacket),
        /// Local node info
        #[prost(message, tag = "3")]
        MyInfo(super::MyNodeInfo),
        /// One entry of the node database dump
        #[prost(message, tag = "4")]
        NodeInfo(super::NodeInfo),
        /// End of the config dump
        #[prost(uint32, tag = "7")]
        ConfigCompleteId(u32),
        /// Device rebooted
        #[prost(bool, tag = "8")]
        Rebooted(bool),
    }
}
