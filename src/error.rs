//! Error types for cmwlight-client.
//!
//! Two layers:
//! - [`ProtocolError`]: a received message could not be decoded. These are
//!   surfaced to the caller of `receive_data`.
//! - [`CmwLightError`]: everything the public API can return, including
//!   caller mistakes (unsupported filter values, requests before connect).
//!
//! Transient connectivity problems never show up here: the connection state
//! machine logs them and falls back to reconnect-with-backoff.

use thiserror::Error;

use crate::codec::ValueKind;
use crate::config::ConfigError;
use crate::protocol::{FrameType, MessageType, RequestType};

/// A received multi-frame message is malformed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// No frames at all.
    #[error("Message contains no frames")]
    EmptyMessage,

    /// The first frame must be exactly one message-type byte.
    #[error("Message type frame must be 1 byte, got {0} bytes")]
    InvalidMessageTypeFrame(usize),

    /// First frame carries an unknown discriminator.
    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Control messages have a fixed number of frames.
    #[error("{message_type} expects {expected} frame(s), got {actual}")]
    FrameCount {
        message_type: MessageType,
        expected: usize,
        actual: usize,
    },

    /// Multi-frame message without a trailing descriptor frame.
    #[error("Message does not contain a descriptor frame")]
    MissingDescriptor,

    /// Multi-frame message without a header frame.
    #[error("Message does not contain a header frame")]
    MissingHeader,

    /// Descriptor length disagrees with the number of frames present.
    #[error("Descriptor lists {descriptor} frame(s) but {frames} are present")]
    DescriptorLength { descriptor: usize, frames: usize },

    /// Descriptor tags disagree with the layout required by the request type.
    #[error("Descriptor {actual:?} does not match expected frame layout {expected:?}")]
    DescriptorMismatch {
        expected: Vec<FrameType>,
        actual: Vec<u8>,
    },

    /// Descriptor byte outside the known frame types.
    #[error("Unknown frame type: {0}")]
    UnknownFrameType(u8),

    /// A frame required by the request type is absent.
    #[error("Missing {frame} frame for {request_type} message")]
    MissingFrame {
        request_type: RequestType,
        frame: FrameType,
    },

    /// A map contains a tag this protocol does not know.
    #[error("Unknown field tag '{tag}' in {section}")]
    UnknownField { section: &'static str, tag: String },

    /// A required tag is absent.
    #[error("Missing field '{tag}' in {section}")]
    MissingField { section: &'static str, tag: &'static str },

    /// A field has a different encoded type than the protocol defines.
    #[error("Field '{tag}' has type {actual}, expected {expected}")]
    TypeMismatch {
        tag: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    /// Unknown request type discriminator in the header.
    #[error("Unknown request type: {0}")]
    UnknownRequestType(i8),

    /// Unknown update type discriminator in the header.
    #[error("Unknown update type: {0}")]
    UnknownUpdateType(i8),

    /// Request type not valid for the message direction (e.g. REPLY in a CLIENT_REQ).
    #[error("{request_type} is not valid in a {message_type} message")]
    UnexpectedRequestType {
        message_type: MessageType,
        request_type: RequestType,
    },

    /// A string payload is not valid UTF-8.
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// The tag-value encoding itself is broken.
    #[error("Malformed tag-value encoding: {0}")]
    Malformed(String),
}

/// Main error type for all cmwlight operations.
#[derive(Debug, Error)]
pub enum CmwLightError {
    /// I/O error on the transport, only returned by explicit pass-through calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A received message could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Filter values are restricted to string, int, long and bool.
    #[error("Unsupported filter value for '{key}': {kind}")]
    UnsupportedFilter { key: String, kind: ValueKind },

    /// The request needs an established connection.
    #[error("Not connected")]
    NotConnected,

    /// No subscription with this id on the connection.
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(i64),

    /// Device could not be resolved to a server address.
    #[error("Directory error: {0}")]
    Directory(String),

    /// Invalid selector string.
    #[error("Invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias using CmwLightError.
pub type Result<T> = std::result::Result<T, CmwLightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::DescriptorMismatch {
            expected: vec![FrameType::Header, FrameType::BodyRequestContext],
            actual: vec![0, 1],
        };
        let text = err.to_string();
        assert!(text.contains("[0, 1]"));
        assert!(text.contains("BodyRequestContext"));

        let err = ProtocolError::UnknownMessageType(0x42);
        assert_eq!(err.to_string(), "Unknown message type: 0x42");
    }

    #[test]
    fn test_protocol_error_converts() {
        let err: CmwLightError = ProtocolError::MissingHeader.into();
        assert!(matches!(err, CmwLightError::Protocol(ProtocolError::MissingHeader)));
    }

    #[test]
    fn test_unsupported_filter_display() {
        let err = CmwLightError::UnsupportedFilter {
            key: "threshold".into(),
            kind: ValueKind::Double,
        };
        assert_eq!(
            err.to_string(),
            "Unsupported filter value for 'threshold': double"
        );
    }
}
