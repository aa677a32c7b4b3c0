//! Synthetic node identities for TAK participants
//!
//! Meshtastic addresses nodes by a 32-bit number, TAK by callsign. A TAK
//! participant injected into the mesh gets a synthetic node number derived
//! from its callsign: the low 32 bits of the SHA-256 digest, read big-endian.
//! The mapping is a pure function, so the same callsign always lands on the
//! same node across restarts and across bridges, and nothing is stored.
//!
//! Collisions are not handled. With 2^32 identities the chance is negligible
//! for the few hundred participants a TAK network carries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Meshtastic node number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Broadcast destination
    pub const BROADCAST: NodeId = NodeId(0xFFFF_FFFF);

    /// Raw node number
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Check if this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Meshtastic user id form, e.g. `!9005d88f`
    pub fn user_id(&self) -> String {
        format!("!{:08x}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u32 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{:08x}", self.0)
    }
}

/// Derive the synthetic node number for a callsign
pub fn resolve_callsign(callsign: &str) -> NodeId {
    let digest = Sha256::digest(callsign.as_bytes());
    let tail: [u8; 4] = [digest[28], digest[29], digest[30], digest[31]];
    NodeId(u32::from_be_bytes(tail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_digests() {
        // sha256("") ends in ...7852b855, sha256("abc") in ...f20015ad
        assert_eq!(resolve_callsign(""), NodeId(0x7852_b855));
        assert_eq!(resolve_callsign("abc"), NodeId(0xf200_15ad));
        assert_eq!(resolve_callsign("ALPHA1"), NodeId(0x9005_d88f));
    }

    #[test]
    fn test_deterministic() {
        let first = resolve_callsign("BRAVO-6");
        for _ in 0..100 {
            assert_eq!(resolve_callsign("BRAVO-6"), first);
        }
    }

    #[test]
    fn test_case_sensitive() {
        assert_ne!(resolve_callsign("alpha1"), resolve_callsign("ALPHA1"));
    }

    #[test]
    fn test_no_collisions_in_sample() {
        let ids: HashSet<NodeId> = (0..10_000)
            .map(|i| resolve_callsign(&format!("CALLSIGN-{:05}", i)))
            .collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_display_uses_meshtastic_form() {
        assert_eq!(NodeId(0x1234abcd).to_string(), "!1234abcd");
        assert_eq!(NodeId(1).user_id(), "!00000001");
        assert!(NodeId::BROADCAST.is_broadcast());
        assert!(!NodeId(7).is_broadcast());
    }
}
