//! Mesh messages in the bridge's own terms
//!
//! Inbound `MeshPacket`s are normalized into [`MeshMessage`] at the radio
//! boundary; only the three categories the bridge translates survive.
//! Outbound messages go the other way through [`MeshMessage::to_packet`].

use chrono::{DateTime, Utc};
use prost::Message;

use crate::error::{BridgeError, Result};
use crate::identity::NodeId;
use crate::proto::{self, mesh_packet::PayloadVariant, PortNum};

/// Scale between degrees and Meshtastic's integer coordinates
const COORD_SCALE: f64 = 1e7;

/// Category of a mesh message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshCategory {
    /// Node identity (NODEINFO_APP)
    Identity,
    /// Position report (POSITION_APP)
    Position,
    /// Text message (TEXT_MESSAGE_APP)
    Text,
}

impl MeshCategory {
    /// Meshtastic port carrying this category
    pub fn port(&self) -> PortNum {
        match self {
            MeshCategory::Identity => PortNum::NodeinfoApp,
            MeshCategory::Position => PortNum::PositionApp,
            MeshCategory::Text => PortNum::TextMessageApp,
        }
    }
}

/// Typed payload of a mesh message
#[derive(Debug, Clone, PartialEq)]
pub enum MeshPayload {
    /// Display names of the sender
    Identity {
        /// Long name (callsign)
        long_name: String,
        /// Short name, at most four characters
        short_name: String,
    },
    /// Location of the sender
    Position {
        /// Latitude, degrees
        lat: f64,
        /// Longitude, degrees
        lon: f64,
        /// Altitude, meters
        altitude: i32,
        /// Capture time
        time: Option<DateTime<Utc>>,
    },
    /// UTF-8 text
    Text(String),
}

/// One message sent or received over the mesh
#[derive(Debug, Clone, PartialEq)]
pub struct MeshMessage {
    /// Originating node
    pub sender: NodeId,
    /// Destination, [`NodeId::BROADCAST`] for everyone
    pub destination: NodeId,
    /// Channel index
    pub channel: u32,
    /// Packet id assigned by the sender (0 when not yet assigned)
    pub packet_id: u32,
    /// Typed payload
    pub payload: MeshPayload,
}

impl MeshMessage {
    /// Broadcast identity message for a synthetic node
    pub fn identity(sender: NodeId, callsign: &str, channel: u32) -> Self {
        Self {
            sender,
            destination: NodeId::BROADCAST,
            channel,
            packet_id: 0,
            payload: MeshPayload::Identity {
                long_name: callsign.to_string(),
                short_name: short_name(callsign),
            },
        }
    }

    /// Broadcast position message
    pub fn position(sender: NodeId, lat: f64, lon: f64, time: DateTime<Utc>, channel: u32) -> Self {
        Self {
            sender,
            destination: NodeId::BROADCAST,
            channel,
            packet_id: 0,
            payload: MeshPayload::Position {
                lat,
                lon,
                altitude: 0,
                time: Some(time),
            },
        }
    }

    /// Broadcast text message
    pub fn text(sender: NodeId, text: impl Into<String>, channel: u32) -> Self {
        Self {
            sender,
            destination: NodeId::BROADCAST,
            channel,
            packet_id: 0,
            payload: MeshPayload::Text(text.into()),
        }
    }

    /// Category of this message
    pub fn category(&self) -> MeshCategory {
        match self.payload {
            MeshPayload::Identity { .. } => MeshCategory::Identity,
            MeshPayload::Position { .. } => MeshCategory::Position,
            MeshPayload::Text(_) => MeshCategory::Text,
        }
    }

    /// Normalize an inbound packet
    ///
    /// Returns `Ok(None)` for ports the bridge does not translate and for
    /// packets the device could not decrypt.
    pub fn from_packet(packet: &proto::MeshPacket) -> Result<Option<Self>> {
        let data = match &packet.payload_variant {
            Some(PayloadVariant::Decoded(data)) => data,
            _ => return Ok(None),
        };

        let payload = match PortNum::try_from(data.portnum) {
            Ok(PortNum::TextMessageApp) => {
                let text = String::from_utf8(data.payload.clone())
                    .map_err(|e| BridgeError::Parse(format!("text payload: {}", e)))?;
                MeshPayload::Text(text)
            }
            Ok(PortNum::PositionApp) => {
                let position = proto::Position::decode(data.payload.as_slice())?;
                MeshPayload::Position {
                    lat: position.latitude_i as f64 / COORD_SCALE,
                    lon: position.longitude_i as f64 / COORD_SCALE,
                    altitude: position.altitude,
                    time: epoch_seconds(position.time),
                }
            }
            Ok(PortNum::NodeinfoApp) => {
                let user = proto::User::decode(data.payload.as_slice())?;
                MeshPayload::Identity {
                    long_name: user.long_name,
                    short_name: user.short_name,
                }
            }
            _ => return Ok(None),
        };

        Ok(Some(Self {
            sender: NodeId(packet.from),
            destination: NodeId(packet.to),
            channel: packet.channel,
            packet_id: packet.id,
            payload,
        }))
    }

    /// Encode as an outbound packet
    pub fn to_packet(&self) -> proto::MeshPacket {
        let payload = match &self.payload {
            MeshPayload::Identity {
                long_name,
                short_name,
            } => proto::User {
                id: self.sender.user_id(),
                long_name: long_name.clone(),
                short_name: short_name.clone(),
                hw_model: proto::HW_MODEL_PRIVATE,
            }
            .encode_to_vec(),
            MeshPayload::Position {
                lat,
                lon,
                altitude,
                time,
            } => proto::Position {
                latitude_i: (lat * COORD_SCALE).round() as i32,
                longitude_i: (lon * COORD_SCALE).round() as i32,
                altitude: *altitude,
                time: time.map(|t| t.timestamp().clamp(0, u32::MAX as i64) as u32).unwrap_or(0),
            }
            .encode_to_vec(),
            MeshPayload::Text(text) => text.as_bytes().to_vec(),
        };

        proto::MeshPacket {
            from: self.sender.as_u32(),
            to: self.destination.as_u32(),
            channel: self.channel,
            payload_variant: Some(PayloadVariant::Decoded(proto::Data {
                portnum: self.category().port() as i32,
                payload,
                want_response: false,
            })),
            id: self.packet_id,
            ..Default::default()
        }
    }
}

/// Meshtastic short name for a callsign: its first four characters
pub fn short_name(callsign: &str) -> String {
    callsign.chars().take(4).collect()
}

/// Convert a protobuf epoch-seconds field, where 0 means unset
pub(crate) fn epoch_seconds(secs: u32) -> Option<DateTime<Utc>> {
    if secs == 0 {
        None
    } else {
        DateTime::from_timestamp(secs as i64, 0)
    }
}
