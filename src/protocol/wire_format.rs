//! Wire format constants: message, frame, request and update types plus the
//! short field tags used in header and context maps.
//!
//! A request/reply message on the wire:
//! ```text
//! ┌──────────┬────────┬──────────────────────┬────────────┐
//! │ Msg type │ Header │ Body / context frames│ Descriptor │
//! │ 1 byte   │ map    │ 0..n frames          │ n+1 bytes  │
//! └──────────┴────────┴──────────────────────┴────────────┘
//! ```
//!
//! The descriptor lists the [`FrameType`] of the header and of every frame
//! that follows it, in order.

use std::fmt;

use crate::error::ProtocolError;

/// Protocol version sent with `CLIENT_CONNECT`.
pub const CLIENT_PROTOCOL_VERSION: &str = "1.0.0";

/// Discriminator carried in the first frame of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ServerConnectAck = 0x01,
    ServerRep = 0x02,
    ServerHb = 0x03,
    ClientConnect = 0x20,
    ClientReq = 0x21,
    ClientHb = 0x22,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this message type is a multi-frame request/reply.
    pub fn is_multi_frame(self) -> bool {
        matches!(self, MessageType::ServerRep | MessageType::ClientReq)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::ServerConnectAck => "SERVER_CONNECT_ACK",
            MessageType::ServerRep => "SERVER_REP",
            MessageType::ServerHb => "SERVER_HB",
            MessageType::ClientConnect => "CLIENT_CONNECT",
            MessageType::ClientReq => "CLIENT_REQ",
            MessageType::ClientHb => "CLIENT_HB",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::ServerConnectAck),
            0x02 => Ok(MessageType::ServerRep),
            0x03 => Ok(MessageType::ServerHb),
            0x20 => Ok(MessageType::ClientConnect),
            0x21 => Ok(MessageType::ClientReq),
            0x22 => Ok(MessageType::ClientHb),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag of each frame after the message-type frame, as listed in the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Header = 0,
    Body = 1,
    BodyDataContext = 2,
    BodyRequestContext = 3,
    BodyException = 4,
}

impl FrameType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Header),
            1 => Ok(FrameType::Body),
            2 => Ok(FrameType::BodyDataContext),
            3 => Ok(FrameType::BodyRequestContext),
            4 => Ok(FrameType::BodyException),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameType::Header => "header",
            FrameType::Body => "body",
            FrameType::BodyDataContext => "data context",
            FrameType::BodyRequestContext => "request context",
            FrameType::BodyException => "exception",
        };
        f.write_str(name)
    }
}

/// Request type carried in the header under tag `"2"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum RequestType {
    Get = 0,
    Set = 1,
    Connect = 2,
    Reply = 3,
    Exception = 4,
    Subscribe = 5,
    Unsubscribe = 6,
    NotificationData = 7,
    NotificationExc = 8,
    SubscribeException = 9,
    Event = 10,
    SessionConfirm = 11,
}

impl RequestType {
    pub fn as_i8(self) -> i8 {
        self as i8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Get => "GET",
            RequestType::Set => "SET",
            RequestType::Connect => "CONNECT",
            RequestType::Reply => "REPLY",
            RequestType::Exception => "EXCEPTION",
            RequestType::Subscribe => "SUBSCRIBE",
            RequestType::Unsubscribe => "UNSUBSCRIBE",
            RequestType::NotificationData => "NOTIFICATION_DATA",
            RequestType::NotificationExc => "NOTIFICATION_EXC",
            RequestType::SubscribeException => "SUBSCRIBE_EXCEPTION",
            RequestType::Event => "EVENT",
            RequestType::SessionConfirm => "SESSION_CONFIRM",
        }
    }

    /// Frames that follow the message-type frame, in descriptor order.
    ///
    /// `SUBSCRIBE` is listed with its client-side layout (header plus request
    /// context); the server acknowledges a subscription with a bare header,
    /// see [`reply_frame_layout`].
    pub fn frame_layout(self) -> &'static [FrameType] {
        use FrameType::*;
        match self {
            RequestType::Get | RequestType::Subscribe | RequestType::Unsubscribe => {
                &[Header, BodyRequestContext]
            }
            RequestType::Set => &[Header, Body, BodyRequestContext],
            RequestType::Reply | RequestType::NotificationData => {
                &[Header, Body, BodyDataContext]
            }
            RequestType::Exception
            | RequestType::NotificationExc
            | RequestType::SubscribeException => &[Header, BodyException],
            RequestType::Connect | RequestType::Event | RequestType::SessionConfirm => &[Header],
        }
    }
}

/// Frame layout of a `SERVER_REP` message with the given request type.
pub fn reply_frame_layout(request_type: RequestType) -> &'static [FrameType] {
    match request_type {
        RequestType::Subscribe => &[FrameType::Header],
        other => other.frame_layout(),
    }
}

impl TryFrom<i8> for RequestType {
    type Error = ProtocolError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        let request_type = match value {
            0 => RequestType::Get,
            1 => RequestType::Set,
            2 => RequestType::Connect,
            3 => RequestType::Reply,
            4 => RequestType::Exception,
            5 => RequestType::Subscribe,
            6 => RequestType::Unsubscribe,
            7 => RequestType::NotificationData,
            8 => RequestType::NotificationExc,
            9 => RequestType::SubscribeException,
            10 => RequestType::Event,
            11 => RequestType::SessionConfirm,
            other => return Err(ProtocolError::UnknownRequestType(other)),
        };
        Ok(request_type)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header `updateType` (tag `"7"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i8)]
pub enum UpdateType {
    #[default]
    Normal = 0,
    FirstUpdate = 1,
    ImmediateUpdate = 2,
}

impl UpdateType {
    pub fn as_i8(self) -> i8 {
        self as i8
    }
}

impl TryFrom<i8> for UpdateType {
    type Error = ProtocolError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(UpdateType::Normal),
            1 => Ok(UpdateType::FirstUpdate),
            2 => Ok(UpdateType::ImmediateUpdate),
            other => Err(ProtocolError::UnknownUpdateType(other)),
        }
    }
}

/// Short field tags of header and context maps.
pub mod tags {
    pub const ID: &str = "0";
    pub const DEVICE_NAME: &str = "1";
    pub const REQUEST_TYPE: &str = "2";
    pub const OPTIONS: &str = "3";
    pub const CYCLE_NAME: &str = "4";
    pub const ACQ_STAMP: &str = "5";
    pub const CYCLE_STAMP: &str = "6";
    pub const UPDATE_TYPE: &str = "7";
    pub const SELECTOR: &str = "8";
    /// Under options.
    pub const NOTIFICATION_ID: &str = "a";
    /// Under options.
    pub const SOURCE_ID: &str = "b";
    pub const FILTERS: &str = "c";
    pub const DATA: &str = "x";
    pub const SESSION_ID: &str = "d";
    /// Under options.
    pub const SESSION_BODY: &str = "e";
    pub const PROPERTY_NAME: &str = "f";
}

/// Keys of the exception frame map.
pub mod exception_tags {
    pub const CONTEXT_ACQ_STAMP: &str = "ContextAcqStamp";
    pub const CONTEXT_CYCLE_STAMP: &str = "ContextCycleStamp";
    pub const MESSAGE: &str = "Message";
    pub const TYPE: &str = "Type";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_bytes() {
        assert_eq!(MessageType::ServerConnectAck.as_u8(), 0x01);
        assert_eq!(MessageType::ServerRep.as_u8(), 0x02);
        assert_eq!(MessageType::ServerHb.as_u8(), 0x03);
        assert_eq!(MessageType::ClientConnect.as_u8(), 0x20);
        assert_eq!(MessageType::ClientReq.as_u8(), 0x21);
        assert_eq!(MessageType::ClientHb.as_u8(), 0x22);
    }

    #[test]
    fn test_message_type_try_from() {
        for byte in [0x01u8, 0x02, 0x03, 0x20, 0x21, 0x22] {
            assert_eq!(MessageType::try_from(byte).unwrap().as_u8(), byte);
        }
        assert_eq!(
            MessageType::try_from(0x04),
            Err(ProtocolError::UnknownMessageType(0x04))
        );
    }

    #[test]
    fn test_request_type_values() {
        for value in 0i8..=11 {
            assert_eq!(RequestType::try_from(value).unwrap().as_i8(), value);
        }
        assert_eq!(
            RequestType::try_from(12),
            Err(ProtocolError::UnknownRequestType(12))
        );
        assert_eq!(RequestType::SessionConfirm.to_string(), "SESSION_CONFIRM");
    }

    #[test]
    fn test_frame_layouts() {
        use FrameType::*;
        assert_eq!(RequestType::Get.frame_layout(), &[Header, BodyRequestContext]);
        assert_eq!(
            RequestType::Set.frame_layout(),
            &[Header, Body, BodyRequestContext]
        );
        assert_eq!(
            RequestType::NotificationData.frame_layout(),
            &[Header, Body, BodyDataContext]
        );
        assert_eq!(
            RequestType::SubscribeException.frame_layout(),
            &[Header, BodyException]
        );
        assert_eq!(RequestType::SessionConfirm.frame_layout(), &[Header]);
        assert_eq!(reply_frame_layout(RequestType::Subscribe), &[Header]);
        assert_eq!(
            reply_frame_layout(RequestType::Reply),
            RequestType::Reply.frame_layout()
        );
    }

    #[test]
    fn test_update_type() {
        assert_eq!(UpdateType::default(), UpdateType::Normal);
        assert_eq!(UpdateType::try_from(2).unwrap(), UpdateType::ImmediateUpdate);
        assert_eq!(
            UpdateType::try_from(3),
            Err(ProtocolError::UnknownUpdateType(3))
        );
    }
}
