//! Admission filter for tactical events arriving from IP
//!
//! The bridge carries two event categories over the mesh: position (atom)
//! events, whose type starts with `a-`, and GeoChat (`b-t-f`). Everything
//! else, including text that does not parse, stays on the IP side.

use tracing::{debug, info};

use crate::cot::{CotEvent, TYPE_CHAT, TYPE_POSITION_PREFIX};

/// Category of an admitted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    /// Position report (`a-*`)
    Position,
    /// GeoChat message (`b-t-f`)
    Chat,
}

/// Classify a type tag, `None` when the bridge does not carry it
pub fn classify(event_type: &str) -> Option<EventCategory> {
    if event_type.starts_with(TYPE_POSITION_PREFIX) {
        Some(EventCategory::Position)
    } else if event_type == TYPE_CHAT {
        Some(EventCategory::Chat)
    } else {
        None
    }
}

/// Parse `xml` and return the event if its category is carried
///
/// Rejections are logged at debug level, acceptance at info level.
pub fn admit(xml: &str) -> Option<(CotEvent, EventCategory)> {
    let event = match CotEvent::parse(xml) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Rejected event: not parseable");
            return None;
        }
    };

    match classify(&event.event_type) {
        Some(category) => {
            info!(
                event_type = %event.event_type,
                uid = %event.uid,
                callsign = %event.callsign(),
                "Accepted event"
            );
            Some((event, category))
        }
        None => {
            debug!(event_type = %event.event_type, uid = %event.uid, "Rejected event: unsupported type");
            None
        }
    }
}

/// Whether `xml` is an event the bridge carries
pub fn is_admitted(xml: &str) -> bool {
    admit(xml).is_some()
}
