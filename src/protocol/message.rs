//! Typed message model.
//!
//! [`Message`] is a sum type over everything that can travel on a
//! connection. Request/reply messages carry a [`Header`] plus a kind-specific
//! payload; the kind determines the request type and the frame layout.

use bytes::Bytes;

use super::wire_format::{MessageType, RequestType, UpdateType, CLIENT_PROTOCOL_VERSION};
use crate::codec::FieldMap;

/// Header fields shared by every request and reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    /// Request id; replies echo the id of the request they answer.
    pub id: i64,
    pub device_name: String,
    pub property_name: String,
    pub update_type: UpdateType,
    pub session_id: String,
}

/// Context attached to GET, SET, SUBSCRIBE and UNSUBSCRIBE requests.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestContext {
    pub selector: String,
    /// Subscription filters, restricted to string, int, long and bool values.
    pub filters: FieldMap,
    pub data: FieldMap,
}

impl RequestContext {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            ..Self::default()
        }
    }

    pub fn with_filters(mut self, filters: FieldMap) -> Self {
        self.filters = filters;
        self
    }
}

/// Context attached to replies and notifications carrying data.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataContext {
    pub cycle_name: String,
    pub cycle_stamp: i64,
    pub acq_stamp: i64,
    pub data: FieldMap,
}

/// Application-level error reported by the server.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExceptionMessage {
    pub context_acq_stamp: i64,
    pub context_cycle_stamp: i64,
    pub message: String,
    pub exception_type: i8,
}

/// A client request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub header: Header,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Get { context: RequestContext },
    Set { data: Bytes, context: RequestContext },
    Subscribe { context: RequestContext },
    Unsubscribe { context: RequestContext },
}

impl RequestKind {
    pub fn request_type(&self) -> RequestType {
        match self {
            RequestKind::Get { .. } => RequestType::Get,
            RequestKind::Set { .. } => RequestType::Set,
            RequestKind::Subscribe { .. } => RequestType::Subscribe,
            RequestKind::Unsubscribe { .. } => RequestType::Unsubscribe,
        }
    }

    pub fn context(&self) -> &RequestContext {
        match self {
            RequestKind::Get { context }
            | RequestKind::Set { context, .. }
            | RequestKind::Subscribe { context }
            | RequestKind::Unsubscribe { context } => context,
        }
    }
}

/// A server reply or notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub header: Header,
    pub kind: ReplyKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyKind {
    /// Answer to a GET or SET.
    Reply { data: Bytes, context: DataContext },
    /// A GET or SET failed.
    Exception(ExceptionMessage),
    /// Subscription accepted; the source id identifies the publisher.
    SubscribeAck { source_id: i64 },
    /// Subscription rejected.
    SubscribeException(ExceptionMessage),
    /// Pushed update for a subscription.
    NotificationData {
        notification_id: i64,
        data: Bytes,
        context: DataContext,
    },
    /// Pushed error for a subscription.
    NotificationException(ExceptionMessage),
    Event,
    SessionConfirm { session_body: FieldMap },
}

impl ReplyKind {
    pub fn request_type(&self) -> RequestType {
        match self {
            ReplyKind::Reply { .. } => RequestType::Reply,
            ReplyKind::Exception(_) => RequestType::Exception,
            ReplyKind::SubscribeAck { .. } => RequestType::Subscribe,
            ReplyKind::SubscribeException(_) => RequestType::SubscribeException,
            ReplyKind::NotificationData { .. } => RequestType::NotificationData,
            ReplyKind::NotificationException(_) => RequestType::NotificationExc,
            ReplyKind::Event => RequestType::Event,
            ReplyKind::SessionConfirm { .. } => RequestType::SessionConfirm,
        }
    }
}

/// Any message that can appear on a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ClientConnect { version: String },
    ServerConnectAck { version: String },
    ClientHeartbeat,
    ServerHeartbeat,
    Request(Request),
    Reply(Reply),
}

impl Message {
    /// `CLIENT_CONNECT` with the given protocol version.
    pub fn connect(version: impl Into<String>) -> Self {
        Message::ClientConnect {
            version: version.into(),
        }
    }

    /// `CLIENT_CONNECT` with [`CLIENT_PROTOCOL_VERSION`].
    pub fn connect_default() -> Self {
        Self::connect(CLIENT_PROTOCOL_VERSION)
    }

    pub fn get(
        session_id: &str,
        id: i64,
        device: &str,
        property: &str,
        context: RequestContext,
    ) -> Self {
        Self::request(session_id, id, device, property, RequestKind::Get { context })
    }

    pub fn set(
        session_id: &str,
        id: i64,
        device: &str,
        property: &str,
        data: Bytes,
        context: RequestContext,
    ) -> Self {
        Self::request(
            session_id,
            id,
            device,
            property,
            RequestKind::Set { data, context },
        )
    }

    pub fn subscribe(
        session_id: &str,
        id: i64,
        device: &str,
        property: &str,
        context: RequestContext,
    ) -> Self {
        Self::request(
            session_id,
            id,
            device,
            property,
            RequestKind::Subscribe { context },
        )
    }

    pub fn unsubscribe(
        session_id: &str,
        id: i64,
        device: &str,
        property: &str,
        context: RequestContext,
    ) -> Self {
        Self::request(
            session_id,
            id,
            device,
            property,
            RequestKind::Unsubscribe { context },
        )
    }

    fn request(session_id: &str, id: i64, device: &str, property: &str, kind: RequestKind) -> Self {
        Message::Request(Request {
            header: Header {
                id,
                device_name: device.to_string(),
                property_name: property.to_string(),
                update_type: UpdateType::Normal,
                session_id: session_id.to_string(),
            },
            kind,
        })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ClientConnect { .. } => MessageType::ClientConnect,
            Message::ServerConnectAck { .. } => MessageType::ServerConnectAck,
            Message::ClientHeartbeat => MessageType::ClientHb,
            Message::ServerHeartbeat => MessageType::ServerHb,
            Message::Request(_) => MessageType::ClientReq,
            Message::Reply(_) => MessageType::ServerRep,
        }
    }

    /// Request type of request/reply messages, `None` for control messages.
    pub fn request_type(&self) -> Option<RequestType> {
        match self {
            Message::Request(r) => Some(r.kind.request_type()),
            Message::Reply(r) => Some(r.kind.request_type()),
            _ => None,
        }
    }

    pub fn header(&self) -> Option<&Header> {
        match self {
            Message::Request(r) => Some(&r.header),
            Message::Reply(r) => Some(&r.header),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_constructor() {
        let msg = Message::subscribe(
            "session",
            7,
            "GSCD001",
            "SnoopTriggerEvents",
            RequestContext::new("FAIR.SELECTOR.ALL"),
        );
        assert_eq!(msg.message_type(), MessageType::ClientReq);
        assert_eq!(msg.request_type(), Some(RequestType::Subscribe));

        let header = msg.header().unwrap();
        assert_eq!(header.id, 7);
        assert_eq!(header.device_name, "GSCD001");
        assert_eq!(header.property_name, "SnoopTriggerEvents");
        assert_eq!(header.session_id, "session");
        assert_eq!(header.update_type, UpdateType::Normal);
    }

    #[test]
    fn test_control_messages() {
        assert_eq!(
            Message::connect_default(),
            Message::ClientConnect {
                version: "1.0.0".into()
            }
        );
        assert_eq!(Message::ClientHeartbeat.message_type(), MessageType::ClientHb);
        assert_eq!(Message::ServerHeartbeat.request_type(), None);
        assert!(Message::ServerHeartbeat.header().is_none());
    }

    #[test]
    fn test_reply_request_types() {
        assert_eq!(
            ReplyKind::SubscribeAck { source_id: 1 }.request_type(),
            RequestType::Subscribe
        );
        assert_eq!(
            ReplyKind::NotificationException(ExceptionMessage::default()).request_type(),
            RequestType::NotificationExc
        );
    }
}
