//! Translation between tactical events and mesh messages
//!
//! | Tactical event | Mesh |
//! |----------------|------|
//! | callsign (string) | synthetic node number (u32) |
//! | `a-*` position event | Identity + Position |
//! | `b-t-f` chat event | Identity + Text |
//! | stale time | not carried, recomputed on the way back |
//!
//! Outbound, the identity always precedes the payload so receivers can bind
//! the name before they see coordinates or text. Inbound, every generated
//! event is valid from now for the configured window.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::cot::{Chat, Contact, CotEvent, EventTimes, Point, Status, TYPE_CHAT, TYPE_MESH_NODE};
use crate::error::{BridgeError, Result};
use crate::filter::{classify, EventCategory};
use crate::identity::{resolve_callsign, NodeId};
use crate::nodes::{NodeRecord, NodeTable};
use crate::packet::{MeshMessage, MeshPayload};

/// Prefix of every uid the bridge generates
pub const MESH_UID_PREFIX: &str = "Mesh-";

/// Uid of the position/status event for a mesh node
pub fn mesh_uid(id: NodeId) -> String {
    format!("{}{}", MESH_UID_PREFIX, id)
}

/// Uid for one chat message from a mesh node, unique per call
pub fn mesh_chat_uid(id: NodeId) -> String {
    format!("{}{}-{}", MESH_UID_PREFIX, id, Uuid::new_v4())
}

/// Bidirectional translator
#[derive(Debug, Clone)]
pub struct MessageTranslator {
    channel: u32,
    stale_after: Duration,
    nodes: NodeTable,
}

impl MessageTranslator {
    /// Create a translator reading names from `nodes`
    pub fn new(channel: u32, stale_after: Duration, nodes: NodeTable) -> Self {
        Self {
            channel,
            stale_after,
            nodes,
        }
    }

    /// Create from bridge configuration
    pub fn from_config(config: &BridgeConfig, nodes: NodeTable) -> Self {
        Self::new(config.channel_index, config.events.stale_after, nodes)
    }

    /// Translate an admitted event into the mesh messages that carry it
    ///
    /// Returns the identity message followed by the position or text
    /// message. Either both are produced or the call fails.
    pub fn cot_to_mesh(&self, event: &CotEvent, now: DateTime<Utc>) -> Result<[MeshMessage; 2]> {
        let category = classify(&event.event_type)
            .ok_or_else(|| BridgeError::UnsupportedEvent(event.event_type.clone()))?;

        let callsign = event.callsign();

        let payload = match category {
            EventCategory::Position => {
                let point = event.point.ok_or(BridgeError::MissingField("point"))?;
                let sender = resolve_callsign(callsign);
                MeshMessage::position(sender, point.lat, point.lon, now, self.channel)
            }
            EventCategory::Chat => {
                let chat = event.detail.chat.as_ref().ok_or(BridgeError::MissingField("chat"))?;
                MeshMessage::text(resolve_callsign(callsign), chat.msg.clone(), self.channel)
            }
        };

        let identity = MeshMessage::identity(payload.sender, callsign, self.channel);
        debug!(
            callsign = %callsign,
            node_id = %identity.sender,
            category = ?payload.category(),
            "Translated event to mesh"
        );
        Ok([identity, payload])
    }

    /// Translate an inbound mesh message into an event
    ///
    /// Identity messages produce nothing; they only feed the node table.
    pub fn mesh_to_cot(&self, message: &MeshMessage, now: DateTime<Utc>) -> Option<CotEvent> {
        let name = self.nodes.display_name(message.sender);

        match &message.payload {
            MeshPayload::Position { lat, lon, .. } => {
                if *lat == 0.0 && *lon == 0.0 {
                    debug!(node_id = %message.sender, "Ignoring position without fix");
                    return None;
                }
                let mut event = CotEvent::new(
                    TYPE_MESH_NODE,
                    mesh_uid(message.sender),
                    self.times(now),
                );
                event.point = Some(Point::unknown_accuracy(*lat, *lon));
                event.detail.contact = Some(Contact { callsign: name });
                Some(event)
            }
            MeshPayload::Text(text) => {
                let mut event =
                    CotEvent::new(TYPE_CHAT, mesh_chat_uid(message.sender), self.times(now));
                event.detail.contact = Some(Contact { callsign: name });
                event.detail.chat = Some(Chat::to_all(text.clone()));
                Some(event)
            }
            MeshPayload::Identity { .. } => None,
        }
    }

    /// Status event announcing a known mesh node
    pub fn node_to_cot(&self, record: &NodeRecord, now: DateTime<Utc>) -> CotEvent {
        let mut event = CotEvent::new(TYPE_MESH_NODE, mesh_uid(record.id), self.times(now));
        event.point = record
            .position
            .map(|p| Point::unknown_accuracy(p.lat, p.lon));
        event.detail.contact = Some(Contact {
            callsign: record.display_name(),
        });
        event.detail.status = record.metrics.map(|m| Status {
            battery: m.battery_level,
            voltage: m.voltage,
        });
        event
    }

    fn times(&self, now: DateTime<Utc>) -> EventTimes {
        EventTimes::issued_at(now, self.stale_after)
    }
}
