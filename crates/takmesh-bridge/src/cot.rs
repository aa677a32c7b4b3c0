//! Cursor-on-Target event model
//!
//! Only the subset of CoT the bridge consumes and produces is modelled:
//!
//! ```text
//! <event version type uid how time start stale>
//!   <point lat lon hae ce le/>
//!   <detail>
//!     <contact callsign/>
//!     <chat msg chatroom parent groupOwner/>   (or TAK's <__chat> + <remarks>)
//!     <status battery voltage/>
//!   </detail>
//! </event>
//! ```
//!
//! Parsing is tolerant: unknown elements are ignored and the schema is not
//! validated. Events are transient and never persisted.

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use roxmltree::{Document, Node};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

use crate::error::{BridgeError, Result};

/// CoT schema version written on every event
pub const COT_VERSION: &str = "2.0";

/// Type prefix of position (atom) events
pub const TYPE_POSITION_PREFIX: &str = "a-";

/// Type of GeoChat events
pub const TYPE_CHAT: &str = "b-t-f";

/// Type written for mesh nodes: friendly ground unit, combat
pub const TYPE_MESH_NODE: &str = "a-f-G-U-C";

/// `how` written on generated events: machine generated, GPS derived
pub const HOW_MACHINE_GPS: &str = "m-g";

/// CE/LE value meaning "accuracy unknown"
pub const UNKNOWN_ERROR: f64 = 9_999_999.0;

/// Callsign used when an event carries no contact
pub const DEFAULT_CALLSIGN: &str = "Unknown";

/// Chat room written on generated chat events
pub const DEFAULT_CHATROOM: &str = "All Chat Rooms";

/// Parent group written on generated chat events
pub const DEFAULT_CHAT_PARENT: &str = "RootContactGroup";

/// A tactical event
#[derive(Debug, Clone, PartialEq)]
pub struct CotEvent {
    /// Schema version
    pub version: String,
    /// Type tag, e.g. `a-f-G-U-C` or `b-t-f`
    pub event_type: String,
    /// Unique id
    pub uid: String,
    /// How the event was generated
    pub how: String,
    /// Issue/start/stale times, absent when the source omitted or garbled them
    pub times: Option<EventTimes>,
    /// Location
    pub point: Option<Point>,
    /// Detail block
    pub detail: Detail,
}

/// The three CoT timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTimes {
    /// Issue time
    pub time: DateTime<Utc>,
    /// Start of validity
    pub start: DateTime<Utc>,
    /// End of validity
    pub stale: DateTime<Utc>,
}

impl EventTimes {
    /// Times for an event issued at `now` and valid for `window`
    ///
    /// Timestamps are truncated to whole seconds, the precision written on
    /// the wire. A window under one second is widened to one second so that
    /// `stale` is always after `time`; a window past the representable range
    /// saturates at the latest representable time.
    pub fn issued_at(now: DateTime<Utc>, window: Duration) -> Self {
        let now = truncate_to_seconds(now);
        let window = i64::try_from(window.as_secs().max(1))
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .unwrap_or(ChronoDuration::MAX);
        let stale = now
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            time: now,
            start: now,
            stale,
        }
    }
}

fn truncate_to_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

/// Event location
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Latitude, degrees
    pub lat: f64,
    /// Longitude, degrees
    pub lon: f64,
    /// Height above ellipsoid, meters
    pub hae: f64,
    /// Circular error, meters
    pub ce: f64,
    /// Linear error, meters
    pub le: f64,
}

impl Point {
    /// A point with zero altitude and unknown accuracy
    pub fn unknown_accuracy(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            hae: 0.0,
            ce: UNKNOWN_ERROR,
            le: UNKNOWN_ERROR,
        }
    }
}

/// Detail block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detail {
    /// Contact callsign
    pub contact: Option<Contact>,
    /// Chat message
    pub chat: Option<Chat>,
    /// Device status
    pub status: Option<Status>,
}

/// Contact element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Callsign
    pub callsign: String,
}

/// Chat element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    /// Message text
    pub msg: String,
    /// Chat room
    pub chatroom: String,
    /// Parent group
    pub parent: String,
    /// Whether the sender owns the group
    pub group_owner: bool,
}

impl Chat {
    /// A message for the default room
    pub fn to_all(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            chatroom: DEFAULT_CHATROOM.to_string(),
            parent: DEFAULT_CHAT_PARENT.to_string(),
            group_owner: false,
        }
    }
}

/// Status element
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Status {
    /// Battery level, percent
    pub battery: Option<u32>,
    /// Battery voltage
    pub voltage: Option<f32>,
}

impl CotEvent {
    /// A new event with generated-event defaults
    pub fn new(event_type: impl Into<String>, uid: impl Into<String>, times: EventTimes) -> Self {
        Self {
            version: COT_VERSION.to_string(),
            event_type: event_type.into(),
            uid: uid.into(),
            how: HOW_MACHINE_GPS.to_string(),
            times: Some(times),
            point: None,
            detail: Detail::default(),
        }
    }

    /// Parse an event from XML text
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();

        if !root.has_tag_name("event") {
            return Err(BridgeError::Parse(format!(
                "root element is <{}>, expected <event>",
                root.tag_name().name()
            )));
        }

        let event_type = root
            .attribute("type")
            .ok_or(BridgeError::MissingField("type"))?
            .to_string();

        let times = parse_times(&root);
        if times.is_none() {
            debug!(event_type = %event_type, "Event timestamps absent or unparsable");
        }

        let point = match child(&root, "point") {
            Some(node) => Some(parse_point(&node)?),
            None => None,
        };

        let detail = child(&root, "detail")
            .map(|node| parse_detail(&node))
            .unwrap_or_default();

        Ok(Self {
            version: root.attribute("version").unwrap_or(COT_VERSION).to_string(),
            event_type,
            uid: root.attribute("uid").unwrap_or_default().to_string(),
            how: root.attribute("how").unwrap_or_default().to_string(),
            times,
            point,
            detail,
        })
    }

    /// Contact callsign, or `Unknown` when absent
    pub fn callsign(&self) -> &str {
        self.detail
            .contact
            .as_ref()
            .map(|c| c.callsign.as_str())
            .unwrap_or(DEFAULT_CALLSIGN)
    }

    /// Whether this is a position (atom) event
    pub fn is_position(&self) -> bool {
        self.event_type.starts_with(TYPE_POSITION_PREFIX)
    }

    /// Whether this is a GeoChat event
    pub fn is_chat(&self) -> bool {
        self.event_type == TYPE_CHAT
    }

    /// Serialize to XML text
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(384);

        out.push_str("<event");
        push_attr(&mut out, "version", &self.version);
        push_attr(&mut out, "type", &self.event_type);
        push_attr(&mut out, "uid", &self.uid);
        push_attr(&mut out, "how", &self.how);
        if let Some(times) = &self.times {
            push_attr(&mut out, "time", &format_time(times.time));
            push_attr(&mut out, "start", &format_time(times.start));
            push_attr(&mut out, "stale", &format_time(times.stale));
        }
        out.push('>');

        if let Some(point) = &self.point {
            out.push_str("<point");
            push_attr(&mut out, "lat", &point.lat.to_string());
            push_attr(&mut out, "lon", &point.lon.to_string());
            push_attr(&mut out, "hae", &point.hae.to_string());
            push_attr(&mut out, "ce", &point.ce.to_string());
            push_attr(&mut out, "le", &point.le.to_string());
            out.push_str("/>");
        }

        out.push_str("<detail>");
        if let Some(contact) = &self.detail.contact {
            out.push_str("<contact");
            push_attr(&mut out, "callsign", &contact.callsign);
            out.push_str("/>");
        }
        if let Some(chat) = &self.detail.chat {
            out.push_str("<chat");
            push_attr(&mut out, "msg", &chat.msg);
            push_attr(&mut out, "chatroom", &chat.chatroom);
            push_attr(&mut out, "parent", &chat.parent);
            push_attr(&mut out, "groupOwner", if chat.group_owner { "true" } else { "false" });
            out.push_str("/>");
        }
        if let Some(status) = &self.detail.status {
            out.push_str("<status");
            let battery = status.battery.map(|b| b.to_string()).unwrap_or_default();
            let voltage = status.voltage.map(|v| v.to_string()).unwrap_or_default();
            push_attr(&mut out, "battery", &battery);
            push_attr(&mut out, "voltage", &voltage);
            out.push_str("/>");
        }
        out.push_str("</detail></event>");

        out
    }
}

/// Format a timestamp the way TAK clients expect (`2024-01-01T12:00:00Z`)
pub fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn child<'a, 'input>(node: &Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn parse_time(node: &Node, name: &str) -> Option<DateTime<Utc>> {
    node.attribute(name)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn parse_times(root: &Node) -> Option<EventTimes> {
    Some(EventTimes {
        time: parse_time(root, "time")?,
        start: parse_time(root, "start")?,
        stale: parse_time(root, "stale")?,
    })
}

fn parse_coordinate(node: &Node, name: &'static str) -> Result<f64> {
    let raw = node.attribute(name).ok_or(BridgeError::MissingField(name))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|e| BridgeError::Parse(format!("point {}={:?}: {}", name, raw, e)))
}

fn parse_optional(node: &Node, name: &str, default: f64) -> f64 {
    node.attribute(name)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(default)
}

fn parse_point(node: &Node) -> Result<Point> {
    Ok(Point {
        lat: parse_coordinate(node, "lat")?,
        lon: parse_coordinate(node, "lon")?,
        hae: parse_optional(node, "hae", 0.0),
        ce: parse_optional(node, "ce", UNKNOWN_ERROR),
        le: parse_optional(node, "le", UNKNOWN_ERROR),
    })
}

fn parse_detail(node: &Node) -> Detail {
    let contact = child(node, "contact")
        .and_then(|c| c.attribute("callsign"))
        .map(|callsign| Contact {
            callsign: callsign.to_string(),
        });

    let chat = child(node, "chat")
        .or_else(|| child(node, "__chat"))
        .map(|c| {
            // ATAK puts GeoChat text in <remarks>, not on the chat element
            let msg = c
                .attribute("msg")
                .map(str::to_string)
                .or_else(|| child(node, "remarks").and_then(|r| r.text()).map(str::to_string))
                .unwrap_or_default();
            Chat {
                msg,
                chatroom: c.attribute("chatroom").unwrap_or(DEFAULT_CHATROOM).to_string(),
                parent: c.attribute("parent").unwrap_or(DEFAULT_CHAT_PARENT).to_string(),
                group_owner: c.attribute("groupOwner") == Some("true"),
            }
        });

    let status = child(node, "status").map(|s| Status {
        battery: s.attribute("battery").and_then(|b| b.trim().parse().ok()),
        voltage: s.attribute("voltage").and_then(|v| v.trim().parse().ok()),
    });

    Detail {
        contact,
        chat,
        status,
    }
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, " {}=\"", name);
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const POSITION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<event version="2.0" uid="ANDROID-1" type="a-f-G-U-C" how="h-e"
       time="2024-05-01T12:00:00.123Z" start="2024-05-01T12:00:00.123Z" stale="2024-05-01T12:05:00Z">
  <point lat="34.0" lon="-118.0" hae="12.5" ce="4.9" le="9999999.0"/>
  <detail><contact callsign="ALPHA1" endpoint="*:-1:stcp"/><takv platform="ATAK"/></detail>
</event>"#;

    #[test]
    fn test_parse_position_event() {
        let event = CotEvent::parse(POSITION).unwrap();
        assert_eq!(event.event_type, "a-f-G-U-C");
        assert_eq!(event.uid, "ANDROID-1");
        assert!(event.is_position());
        assert!(!event.is_chat());
        assert_eq!(event.callsign(), "ALPHA1");

        let point = event.point.unwrap();
        assert_eq!(point.lat, 34.0);
        assert_eq!(point.lon, -118.0);
        assert_eq!(point.hae, 12.5);

        let times = event.times.unwrap();
        assert!(times.stale > times.time);
    }

    #[test]
    fn test_issued_at_saturates_huge_window() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let times = EventTimes::issued_at(now, Duration::from_secs(10_000_000_000_000));
        assert_eq!(times.time, now);
        assert_eq!(times.stale, DateTime::<Utc>::MAX_UTC);

        let times = EventTimes::issued_at(now, Duration::MAX);
        assert_eq!(times.stale, DateTime::<Utc>::MAX_UTC);
        assert!(!format_time(times.stale).is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CotEvent::parse("not xml at all").is_err());
        assert!(CotEvent::parse("<event type=\"a-f-G\"").is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_root() {
        let err = CotEvent::parse(r#"<message type="a-f-G"/>"#).unwrap_err();
        assert_eq!(err.error_code(), "PARSE_ERROR");
    }

    #[test]
    fn test_parse_requires_type() {
        let err = CotEvent::parse(r#"<event uid="x"/>"#).unwrap_err();
        assert!(matches!(err, BridgeError::MissingField("type")));
    }

    #[test]
    fn test_bad_latitude_is_parse_error() {
        let err = CotEvent::parse(r#"<event type="a-f-G"><point lat="north" lon="1"/></event>"#)
            .unwrap_err();
        assert_eq!(err.error_code(), "PARSE_ERROR");
    }

    #[test]
    fn test_missing_contact_defaults_callsign() {
        let event = CotEvent::parse(r#"<event type="a-f-G"><point lat="1" lon="2"/></event>"#)
            .unwrap();
        assert_eq!(event.callsign(), DEFAULT_CALLSIGN);
        assert!(event.times.is_none());
        let point = event.point.unwrap();
        assert_eq!(point.ce, UNKNOWN_ERROR);
    }

    #[test]
    fn test_parse_atak_geochat_remarks() {
        let xml = r#"<event version="2.0" type="b-t-f" uid="GeoChat.X.All Chat Rooms.1" how="h-g-i-g-o">
            <point lat="0" lon="0" hae="0" ce="9999999" le="9999999"/>
            <detail>
              <__chat parent="RootContactGroup" groupOwner="false" chatroom="All Chat Rooms" id="All Chat Rooms" senderCallsign="BRAVO"/>
              <remarks source="BAO.F.ATAK.X" time="2024-05-01T12:00:00Z">moving to rally point</remarks>
              <contact callsign="BRAVO"/>
            </detail></event>"#;
        let event = CotEvent::parse(xml).unwrap();
        assert!(event.is_chat());
        let chat = event.detail.chat.unwrap();
        assert_eq!(chat.msg, "moving to rally point");
        assert_eq!(chat.chatroom, "All Chat Rooms");
    }

    #[test]
    fn test_to_xml_round_trips_through_parser() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut event = CotEvent::new(
            TYPE_CHAT,
            "Mesh-!00000001-abc",
            EventTimes::issued_at(now, Duration::from_secs(300)),
        );
        event.detail.contact = Some(Contact {
            callsign: "Node <1> & \"friends\"".to_string(),
        });
        event.detail.chat = Some(Chat::to_all("hello\nworld"));

        let xml = event.to_xml();
        assert!(xml.starts_with("<event version=\"2.0\" type=\"b-t-f\""));
        assert!(xml.contains("time=\"2024-05-01T12:00:00Z\""));
        assert!(xml.contains("stale=\"2024-05-01T12:05:00Z\""));

        let back = CotEvent::parse(&xml).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_status_written_with_empty_unknowns() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut event = CotEvent::new(
            TYPE_MESH_NODE,
            "Mesh-!00000002",
            EventTimes::issued_at(now, Duration::from_secs(60)),
        );
        event.detail.status = Some(Status {
            battery: Some(87),
            voltage: None,
        });
        let xml = event.to_xml();
        assert!(xml.contains("<status battery=\"87\" voltage=\"\"/>"));
    }

    #[test]
    fn test_issued_at_truncates_and_orders() {
        let now = Utc.timestamp_opt(1_700_000_000, 750_000_000).unwrap();
        let times = EventTimes::issued_at(now, Duration::from_millis(10));
        assert_eq!(times.time.timestamp_subsec_nanos(), 0);
        assert_eq!(times.time, times.start);
        assert!(times.stale > times.time);
    }

    #[test]
    fn test_unknown_accuracy_point() {
        let point = Point::unknown_accuracy(1.5, 2.5);
        assert_eq!(point.hae, 0.0);
        assert_eq!(point.ce, UNKNOWN_ERROR);
        assert_eq!(point.le, UNKNOWN_ERROR);
    }
}
