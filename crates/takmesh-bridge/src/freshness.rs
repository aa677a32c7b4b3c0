//! Node freshness filter
//!
//! On every sweep the bridge re-announces the mesh nodes it knows about into
//! the TAK network. Nodes not heard from within `max_age` are left out. A
//! node with no last-heard time (typically the local radio itself, or a node
//! known only from the device's database) is announced.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::trace;

use crate::config::FreshnessConfig;
use crate::nodes::NodeRecord;

/// Result of one sweep
#[derive(Debug, Clone, Default)]
pub struct Sweep {
    /// Records to announce
    pub announced: Vec<NodeRecord>,
    /// Number of records left out as stale
    pub skipped: usize,
}

/// Selects which nodes are still announced
#[derive(Debug, Clone)]
pub struct FreshnessFilter {
    max_age: ChronoDuration,
}

impl FreshnessFilter {
    /// Create a filter with the given maximum age
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age: ChronoDuration::from_std(max_age).unwrap_or(ChronoDuration::MAX),
        }
    }

    /// Create from configuration
    pub fn from_config(config: &FreshnessConfig) -> Self {
        Self::new(config.max_age)
    }

    /// Oldest last-heard time still announced at `now`
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether `record` is announced at `now`
    pub fn is_fresh(&self, record: &NodeRecord, now: DateTime<Utc>) -> bool {
        match record.last_heard {
            Some(heard) => heard >= self.cutoff(now),
            None => true,
        }
    }

    /// Partition `records` into announced and skipped
    pub fn sweep<I>(&self, records: I, now: DateTime<Utc>) -> Sweep
    where
        I: IntoIterator<Item = NodeRecord>,
    {
        let cutoff = self.cutoff(now);
        let mut sweep = Sweep::default();

        for record in records {
            match record.last_heard {
                Some(heard) if heard < cutoff => {
                    trace!(node_id = %record.id, last_heard = %heard, "Skipping stale node");
                    sweep.skipped += 1;
                }
                _ => sweep.announced.push(record),
            }
        }

        sweep
    }
}

impl Default for FreshnessFilter {
    fn default() -> Self {
        Self::from_config(&FreshnessConfig::default())
    }
}
