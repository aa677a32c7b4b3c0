//! Canonical node table
//!
//! The radio link is the only writer: it folds node-info dumps and every
//! inbound packet into one [`NodeRecord`] shape. The bridge reads snapshots
//! for name lookups and the freshness sweep.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use crate::identity::NodeId;
use crate::packet::epoch_seconds;
use crate::proto;

/// Last known location of a node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodePosition {
    /// Latitude, degrees
    pub lat: f64,
    /// Longitude, degrees
    pub lon: f64,
    /// Altitude, meters
    pub altitude: i32,
}

impl NodePosition {
    /// Convert a protobuf position, `None` when the node has no fix
    pub fn from_proto(position: &proto::Position) -> Option<Self> {
        if position.latitude_i == 0 && position.longitude_i == 0 {
            return None;
        }
        Some(Self {
            lat: position.latitude_i as f64 / 1e7,
            lon: position.longitude_i as f64 / 1e7,
            altitude: position.altitude,
        })
    }
}

/// Device metrics the bridge republishes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeMetrics {
    /// Battery level, percent
    pub battery_level: Option<u32>,
    /// Battery voltage
    pub voltage: Option<f32>,
}

impl From<&proto::DeviceMetrics> for NodeMetrics {
    fn from(metrics: &proto::DeviceMetrics) -> Self {
        Self {
            battery_level: Some(metrics.battery_level).filter(|b| *b > 0),
            voltage: Some(metrics.voltage).filter(|v| *v > 0.0),
        }
    }
}

/// Everything known about one mesh node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// Node number
    pub id: NodeId,
    /// Display name
    pub name: Option<String>,
    /// Last known position
    pub position: Option<NodePosition>,
    /// Last time anything was heard from the node
    pub last_heard: Option<DateTime<Utc>>,
    /// Device metrics
    pub metrics: Option<NodeMetrics>,
}

impl NodeRecord {
    /// Empty record for `id`
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            name: None,
            position: None,
            last_heard: None,
            metrics: None,
        }
    }

    /// Display name, falling back to the node id
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }

    /// Build from a node database entry
    pub fn from_node_info(info: &proto::NodeInfo) -> Self {
        let mut record = Self::new(NodeId(info.num));
        record.merge_node_info(info);
        record
    }

    fn merge_node_info(&mut self, info: &proto::NodeInfo) {
        if let Some(user) = &info.user {
            self.apply_user(user);
        }
        if let Some(position) = info.position.as_ref().and_then(NodePosition::from_proto) {
            self.position = Some(position);
        }
        if let Some(heard) = epoch_seconds(info.last_heard) {
            self.last_heard = Some(heard);
        }
        if let Some(metrics) = &info.device_metrics {
            self.metrics = Some(metrics.into());
        }
    }

    fn apply_user(&mut self, user: &proto::User) {
        if !user.long_name.is_empty() {
            self.name = Some(user.long_name.clone());
        } else if !user.short_name.is_empty() {
            self.name = Some(user.short_name.clone());
        }
    }
}

/// Shared, lock-guarded node table
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    nodes: Arc<RwLock<HashMap<NodeId, NodeRecord>>>,
}

impl NodeTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of one record
    pub fn get(&self, id: NodeId) -> Option<NodeRecord> {
        self.nodes.read().get(&id).cloned()
    }

    /// Display name for `id`, the stringified id when unknown or unnamed
    pub fn display_name(&self, id: NodeId) -> String {
        self.nodes
            .read()
            .get(&id)
            .and_then(|r| r.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Copy of every record
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        self.nodes.read().values().cloned().collect()
    }

    /// Number of known nodes
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether no node is known
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop records last heard before `cutoff`
    ///
    /// Records never heard are kept. Returns the number removed.
    pub fn retain_heard_since(&self, cutoff: DateTime<Utc>) -> usize {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|_, record| record.last_heard.map_or(true, |heard| heard >= cutoff));
        before - nodes.len()
    }

    /// Insert or replace a record
    pub fn insert(&self, record: NodeRecord) {
        self.nodes.write().insert(record.id, record);
    }

    /// Merge a node database entry
    pub fn apply_node_info(&self, info: &proto::NodeInfo) {
        let id = NodeId(info.num);
        trace!(node_id = %id, "Node info");
        self.nodes
            .write()
            .entry(id)
            .or_insert_with(|| NodeRecord::new(id))
            .merge_node_info(info);
    }

    /// Record that a packet was heard from `id`
    pub fn mark_heard(&self, id: NodeId, at: DateTime<Utc>) {
        let mut nodes = self.nodes.write();
        let record = nodes.entry(id).or_insert_with(|| NodeRecord::new(id));
        if record.last_heard.map_or(true, |prev| at > prev) {
            record.last_heard = Some(at);
        }
    }

    /// Update a node's names
    pub fn apply_user(&self, id: NodeId, user: &proto::User) {
        self.nodes
            .write()
            .entry(id)
            .or_insert_with(|| NodeRecord::new(id))
            .apply_user(user);
    }

    /// Update a node's position
    pub fn apply_position(&self, id: NodeId, position: &proto::Position) {
        if let Some(position) = NodePosition::from_proto(position) {
            self.nodes
                .write()
                .entry(id)
                .or_insert_with(|| NodeRecord::new(id))
                .position = Some(position);
        }
    }

    /// Update a node's device metrics
    pub fn apply_metrics(&self, id: NodeId, metrics: &proto::DeviceMetrics) {
        self.nodes
            .write()
            .entry(id)
            .or_insert_with(|| NodeRecord::new(id))
            .metrics = Some(metrics.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(long: &str, short: &str) -> proto::User {
        proto::User {
            id: String::new(),
            long_name: long.to_string(),
            short_name: short.to_string(),
            hw_model: 0,
        }
    }

    #[test]
    fn test_retain_heard_since() {
        let table = NodeTable::new();
        let now = Utc::now();
        table.mark_heard(NodeId(1), now - Duration::hours(10));
        table.mark_heard(NodeId(2), now - Duration::minutes(5));
        table.insert(NodeRecord::new(NodeId(3)));

        assert_eq!(table.retain_heard_since(now - Duration::hours(6)), 1);
        assert!(table.get(NodeId(1)).is_none());
        assert!(table.get(NodeId(2)).is_some());
        assert!(table.get(NodeId(3)).is_some());
        assert_eq!(table.retain_heard_since(now - Duration::hours(6)), 0);
    }

    #[test]
    fn test_display_name_fallback() {
        let table = NodeTable::new();
        assert_eq!(table.display_name(NodeId(0xabcd)), "!0000abcd");

        table.apply_user(NodeId(0xabcd), &user("Base Camp", "BC"));
        assert_eq!(table.display_name(NodeId(0xabcd)), "Base Camp");

        table.apply_user(NodeId(1), &user("", "XY"));
        assert_eq!(table.display_name(NodeId(1)), "XY");
    }

    #[test]
    fn test_node_info_merge() {
        let info = proto::NodeInfo {
            num: 5,
            user: Some(user("Relay", "RLY")),
            position: Some(proto::Position {
                latitude_i: 515_000_000,
                longitude_i: -1_000_000,
                altitude: 40,
                time: 0,
            }),
            snr: 0.0,
            last_heard: 1_700_000_000,
            device_metrics: Some(proto::DeviceMetrics {
                battery_level: 87,
                voltage: 4.1,
                ..Default::default()
            }),
        };
        let table = NodeTable::new();
        table.apply_node_info(&info);

        let record = table.get(NodeId(5)).unwrap();
        assert_eq!(record.name.as_deref(), Some("Relay"));
        let position = record.position.unwrap();
        assert!((position.lat - 51.5).abs() < 1e-9);
        assert_eq!(position.altitude, 40);
        assert_eq!(record.last_heard.unwrap().timestamp(), 1_700_000_000);
        let metrics = record.metrics.unwrap();
        assert_eq!(metrics.battery_level, Some(87));
        assert_eq!(metrics.voltage, Some(4.1));
    }

    #[test]
    fn test_zero_last_heard_and_no_fix() {
        let info = proto::NodeInfo {
            num: 9,
            position: Some(proto::Position::default()),
            ..Default::default()
        };
        let record = NodeRecord::from_node_info(&info);
        assert!(record.last_heard.is_none());
        assert!(record.position.is_none());
    }

    #[test]
    fn test_mark_heard_only_moves_forward() {
        let table = NodeTable::new();
        let now = Utc::now();
        table.mark_heard(NodeId(1), now);
        table.mark_heard(NodeId(1), now - Duration::hours(1));
        assert_eq!(table.get(NodeId(1)).unwrap().last_heard, Some(now));
    }

    #[test]
    fn test_clones_share_state() {
        let table = NodeTable::new();
        let reader = table.clone();
        table.insert(NodeRecord::new(NodeId(2)));
        assert_eq!(reader.len(), 1);
        assert!(!reader.is_empty());
    }
}
