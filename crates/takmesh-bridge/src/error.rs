//! Error types for bridge operations
//!
//! Every failure the bridge can observe maps onto one [`BridgeError`] variant.
//! Only startup failures (device open, socket bind) are fatal; everything else
//! is logged at the point of failure and the offending item is dropped.

use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    // ===== Startup Errors =====
    /// Serial port not found
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    /// Serial port open failed
    #[error("Failed to open serial port {port}: {reason}")]
    PortOpenFailed {
        /// Port path
        port: String,
        /// Failure reason
        reason: String,
    },

    /// UDP socket setup failed
    #[error("Failed to bind UDP socket {addr}: {reason}")]
    Bind {
        /// Address that could not be bound
        addr: String,
        /// Failure reason
        reason: String,
    },

    // ===== Link Errors =====
    /// Radio read error
    #[error("Radio read error: {0}")]
    ReadError(String),

    /// Radio write error
    #[error("Radio write error: {0}")]
    WriteError(String),

    /// Radio send could not be queued or delivered
    #[error("Link send failed: {0}")]
    LinkSend(String),

    /// Radio disconnected
    #[error("Radio disconnected")]
    Disconnected,

    /// Connection timeout
    #[error("Connection timeout after {duration_ms}ms")]
    ConnectionTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    // ===== Protocol Errors =====
    /// Invalid magic number in stream frame
    #[error("Invalid magic number: expected 0x94C3, got 0x{got:04X}")]
    InvalidMagic {
        /// The received magic number
        got: u16,
    },

    /// Protobuf decode error
    #[error("Protobuf decode error: {0}")]
    ProtobufDecode(String),

    /// Protobuf encode error
    #[error("Protobuf encode error: {0}")]
    ProtobufEncode(String),

    /// Invalid stream frame
    #[error("Invalid packet format: {0}")]
    InvalidPacket(String),

    // ===== Translation Errors =====
    /// Tactical XML or chunk envelope could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// A required element or attribute was absent
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Event type is not handled by the bridge
    #[error("Unsupported event type: {0}")]
    UnsupportedEvent(String),

    /// Payload too large for a single mesh packet
    #[error("Message too large: {size} bytes exceeds mesh maximum of {max} bytes")]
    MessageTooLarge {
        /// Actual message size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Channel send error
    #[error("Channel send error: {0}")]
    ChannelError(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Check if this error is recoverable/retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionTimeout { .. }
                | BridgeError::Disconnected
                | BridgeError::ReadError(_)
                | BridgeError::WriteError(_)
        )
    }

    /// Check if this is a protocol error (bad data from device or network)
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidMagic { .. }
                | BridgeError::ProtobufDecode(_)
                | BridgeError::InvalidPacket(_)
                | BridgeError::Parse(_)
        )
    }

    /// Check if this error must stop the process
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            BridgeError::PortNotFound(_)
                | BridgeError::PortOpenFailed { .. }
                | BridgeError::Bind { .. }
                | BridgeError::InvalidConfig(_)
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::PortNotFound(_) => "PORT_NOT_FOUND",
            BridgeError::PortOpenFailed { .. } => "PORT_OPEN_FAILED",
            BridgeError::Bind { .. } => "BIND_FAILED",
            BridgeError::ReadError(_) => "READ_ERROR",
            BridgeError::WriteError(_) => "WRITE_ERROR",
            BridgeError::LinkSend(_) => "LINK_SEND",
            BridgeError::Disconnected => "DISCONNECTED",
            BridgeError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            BridgeError::InvalidMagic { .. } => "INVALID_MAGIC",
            BridgeError::ProtobufDecode(_) => "PROTOBUF_DECODE",
            BridgeError::ProtobufEncode(_) => "PROTOBUF_ENCODE",
            BridgeError::InvalidPacket(_) => "INVALID_PACKET",
            BridgeError::Parse(_) => "PARSE_ERROR",
            BridgeError::MissingField(_) => "MISSING_FIELD",
            BridgeError::UnsupportedEvent(_) => "UNSUPPORTED_EVENT",
            BridgeError::MessageTooLarge { .. } => "MESSAGE_TOO_LARGE",
            BridgeError::InvalidConfig(_) => "INVALID_CONFIG",
            BridgeError::ChannelError(_) => "CHANNEL_ERROR",
            BridgeError::ChannelClosed => "CHANNEL_CLOSED",
            BridgeError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<prost::DecodeError> for BridgeError {
    fn from(err: prost::DecodeError) -> Self {
        BridgeError::ProtobufDecode(err.to_string())
    }
}

impl From<prost::EncodeError> for BridgeError {
    fn from(err: prost::EncodeError) -> Self {
        BridgeError::ProtobufEncode(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Parse(format!("chunk envelope: {}", err))
    }
}

impl From<roxmltree::Error> for BridgeError {
    fn from(err: roxmltree::Error) -> Self {
        BridgeError::Parse(format!("event xml: {}", err))
    }
}

// Conversion from serialport error (only when serial feature is enabled)
#[cfg(feature = "serial")]
impl From<serialport::Error> for BridgeError {
    fn from(err: serialport::Error) -> Self {
        match err.kind {
            serialport::ErrorKind::NoDevice => BridgeError::PortNotFound(err.description),
            serialport::ErrorKind::Io(kind) => {
                BridgeError::Io(std::io::Error::new(kind, err.description))
            }
            _ => BridgeError::PortOpenFailed {
                port: String::new(),
                reason: err.description,
            },
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BridgeError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BridgeError::ChannelError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = BridgeError::PortNotFound("/dev/ttyUSB0".to_string());
        assert_eq!(err.error_code(), "PORT_NOT_FOUND");
        assert_eq!(BridgeError::MissingField("point").error_code(), "MISSING_FIELD");
    }

    #[test]
    fn test_is_retriable() {
        assert!(BridgeError::Disconnected.is_retriable());
        assert!(BridgeError::ConnectionTimeout { duration_ms: 5000 }.is_retriable());
        assert!(!BridgeError::InvalidMagic { got: 0x1234 }.is_retriable());
    }

    #[test]
    fn test_is_protocol_error() {
        assert!(BridgeError::InvalidMagic { got: 0x1234 }.is_protocol_error());
        assert!(BridgeError::Parse("bad".to_string()).is_protocol_error());
        assert!(!BridgeError::Disconnected.is_protocol_error());
    }

    #[test]
    fn test_only_setup_failures_are_fatal() {
        assert!(BridgeError::Bind {
            addr: "0.0.0.0:6969".to_string(),
            reason: "in use".to_string(),
        }
        .is_startup_error());
        assert!(!BridgeError::LinkSend("queue full".to_string()).is_startup_error());
        assert!(!BridgeError::Parse("bad".to_string()).is_startup_error());
    }

    #[test]
    fn test_xml_error_converts_to_parse() {
        let err: BridgeError = roxmltree::Document::parse("<event").unwrap_err().into();
        assert_eq!(err.error_code(), "PARSE_ERROR");
    }
}
