//! Chunked text transport over the mesh
//!
//! Event XML routinely exceeds a single mesh packet. The framer cuts a text
//! into slices and wraps each in a small JSON envelope:
//!
//! ```text
//! {"msgid":"<uuid>","part":0,"total":3,"data":"<slice>"}
//! ```
//!
//! The link gives no ordering, no acknowledgment and may duplicate or lose
//! packets. The reassembler therefore keys buffers by `msgid`, stores parts by
//! index (a repeated part overwrites, it never counts twice) and emits once
//! every index below `total` is present. Buffers that never complete are
//! evicted by age and by count.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::{TransportConfig, DEFAULT_MAX_PARTS};
use crate::error::{BridgeError, Result};

/// One slice of a framed text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEnvelope {
    /// Message id shared by every part of one text
    pub msgid: String,
    /// Zero-based part index
    pub part: u32,
    /// Number of parts
    pub total: u32,
    /// Text slice
    pub data: String,
}

impl ChunkEnvelope {
    /// Encode to the compact JSON wire form
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the JSON wire form
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: ChunkEnvelope = serde_json::from_str(text)?;
        envelope.validate()?;
        Ok(envelope)
    }

    fn validate(&self) -> Result<()> {
        if self.total == 0 {
            return Err(BridgeError::Parse("chunk envelope: total is zero".to_string()));
        }
        if self.part >= self.total {
            return Err(BridgeError::Parse(format!(
                "chunk envelope: part {} out of range for total {}",
                self.part, self.total
            )));
        }
        Ok(())
    }
}

/// Lazy sequence of envelopes for one text
///
/// Created by [`frame`]. Every envelope carries the same fresh `msgid`.
#[derive(Debug)]
pub struct Framer<'a> {
    msgid: String,
    text: &'a str,
    slices: Vec<Range<usize>>,
    next: usize,
}

impl Framer<'_> {
    /// Message id of this sequence
    pub fn msgid(&self) -> &str {
        &self.msgid
    }

    /// Number of parts
    pub fn total(&self) -> u32 {
        self.slices.len() as u32
    }
}

impl Iterator for Framer<'_> {
    type Item = ChunkEnvelope;

    fn next(&mut self) -> Option<Self::Item> {
        let range = self.slices.get(self.next)?.clone();
        let part = self.next as u32;
        self.next += 1;
        Some(ChunkEnvelope {
            msgid: self.msgid.clone(),
            part,
            total: self.total(),
            data: self.text[range].to_string(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.slices.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Framer<'_> {}

/// Split `text` into envelopes of at most `max_chunk_bytes` bytes of data
///
/// Slices are contiguous and in byte order. Cuts fall on UTF-8 character
/// boundaries, so ASCII text yields exactly `ceil(len / max_chunk_bytes)`
/// parts. A character wider than the limit travels alone in its part. Empty
/// text yields a single empty part so that it survives the round trip.
pub fn frame(text: &str, max_chunk_bytes: usize) -> Framer<'_> {
    let max = max_chunk_bytes.max(1);
    let mut slices = Vec::with_capacity(text.len() / max + 1);
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            end = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
        slices.push(start..end);
        start = end;
    }
    if slices.is_empty() {
        slices.push(0..0);
    }

    Framer {
        msgid: Uuid::new_v4().to_string(),
        text,
        slices,
        next: 0,
    }
}

#[derive(Debug)]
struct ReassemblyBuffer {
    total: u32,
    parts: HashMap<u32, String>,
    created_at: Instant,
}

impl ReassemblyBuffer {
    fn assemble(mut self) -> String {
        let mut text = String::with_capacity(self.parts.values().map(String::len).sum());
        for index in 0..self.total {
            if let Some(part) = self.parts.remove(&index) {
                text.push_str(&part);
            }
        }
        text
    }
}

/// Rebuilds framed texts from envelopes arriving in any order
#[derive(Debug)]
pub struct Reassembler {
    pending: LruCache<String, ReassemblyBuffer>,
    timeout: Duration,
    max_parts: u32,
}

impl Reassembler {
    /// Create with explicit bounds
    pub fn new(timeout: Duration, max_pending: usize) -> Self {
        let cap = NonZeroUsize::new(max_pending.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            pending: LruCache::new(cap),
            timeout,
            max_parts: DEFAULT_MAX_PARTS,
        }
    }

    /// Limit the part count a sender may declare
    pub fn with_max_parts(mut self, max_parts: u32) -> Self {
        self.max_parts = max_parts.max(1);
        self
    }

    /// Create from transport configuration
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.reassembly_timeout, config.max_pending).with_max_parts(config.max_parts)
    }

    /// Decode `text` as an envelope and add it
    ///
    /// Malformed envelopes, and envelopes declaring more parts than allowed,
    /// return an error and leave every buffer untouched.
    pub fn accept_text(&mut self, text: &str) -> Result<Option<String>> {
        let envelope = ChunkEnvelope::decode(text)?;
        self.check_total(&envelope)?;
        Ok(self.accept(envelope))
    }

    fn check_total(&self, envelope: &ChunkEnvelope) -> Result<()> {
        if envelope.total > self.max_parts {
            return Err(BridgeError::Parse(format!(
                "chunk envelope: total {} exceeds limit of {} parts",
                envelope.total, self.max_parts
            )));
        }
        Ok(())
    }

    /// Add one envelope, returning the assembled text once it is complete
    pub fn accept(&mut self, envelope: ChunkEnvelope) -> Option<String> {
        if envelope.total == 0 || envelope.part >= envelope.total {
            warn!(
                msgid = %envelope.msgid,
                part = envelope.part,
                total = envelope.total,
                "Dropping chunk with invalid part/total"
            );
            return None;
        }
        if let Err(e) = self.check_total(&envelope) {
            warn!(msgid = %envelope.msgid, error = %e, "Dropping oversized chunked message");
            return None;
        }

        let ChunkEnvelope {
            msgid,
            part,
            total,
            data,
        } = envelope;

        if let Some(buffer) = self.pending.get_mut(&msgid) {
            if buffer.total != total {
                warn!(
                    msgid = %msgid,
                    declared = buffer.total,
                    got = total,
                    "Dropping chunk with mismatched total"
                );
                return None;
            }
            if buffer.parts.insert(part, data).is_some() {
                trace!(msgid = %msgid, part, "Duplicate chunk overwrote stored part");
            }
        } else {
            // sized by what arrives, never by the sender's claim
            let mut parts = HashMap::new();
            parts.insert(part, data);
            let buffer = ReassemblyBuffer {
                total,
                parts,
                created_at: Instant::now(),
            };
            if let Some((evicted, old)) = self.pending.push(msgid.clone(), buffer) {
                if evicted != msgid {
                    warn!(
                        msgid = %evicted,
                        received = old.parts.len(),
                        total = old.total,
                        "Evicted incomplete message, too many pending"
                    );
                }
            }
        }

        let complete = self
            .pending
            .peek(&msgid)
            .is_some_and(|buffer| buffer.parts.len() == buffer.total as usize);

        if !complete {
            trace!(msgid = %msgid, part, total, "Stored chunk");
            return None;
        }

        let buffer = self.pending.pop(&msgid)?;
        debug!(msgid = %msgid, total, "Reassembled message");
        Some(buffer.assemble())
    }

    /// Discard buffers older than the timeout
    ///
    /// Returns the number of buffers discarded.
    pub fn expire_old_entries(&mut self) -> usize {
        self.expire_older_than(Instant::now())
    }

    /// Discard buffers that were created more than the timeout before `now`
    pub fn expire_older_than(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, buffer)| now.saturating_duration_since(buffer.created_at) > self.timeout)
            .map(|(msgid, _)| msgid.clone())
            .collect();

        for msgid in &expired {
            if let Some(buffer) = self.pending.pop(msgid) {
                debug!(
                    msgid = %msgid,
                    received = buffer.parts.len(),
                    total = buffer.total,
                    "Expired incomplete message"
                );
            }
        }

        expired.len()
    }

    /// Number of incomplete messages held
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}
