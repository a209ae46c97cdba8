//! Multi-frame encoding and decoding of [`Message`]s.
//!
//! Control messages are one or two frames (type byte, optional version
//! string). Requests and replies are:
//!
//! ```text
//! [type byte] [header map] [body / context / exception frames...] [descriptor]
//! ```
//!
//! # Example
//!
//! ```
//! use cmwlight_client::protocol::{decode, encode, Message, RequestContext};
//!
//! let msg = Message::subscribe(
//!     "session",
//!     1,
//!     "GSCD001",
//!     "SnoopTriggerEvents",
//!     RequestContext::new("FAIR.SELECTOR.ALL"),
//! );
//! let frames = encode(&msg).unwrap();
//! assert_eq!(frames.len(), 4);
//! assert_eq!(decode(&frames).unwrap(), msg);
//! ```

use bytes::Bytes;

use super::message::{
    DataContext, ExceptionMessage, Header, Message, Reply, ReplyKind, Request, RequestContext,
    RequestKind,
};
use super::wire_format::{
    exception_tags, reply_frame_layout, tags, FrameType, MessageType, RequestType, UpdateType,
};
use crate::codec::{decode_map, encode_map, FieldMap, FieldValue, ValueKind};
use crate::error::{CmwLightError, ProtocolError, Result};

// ============================================================================
// Encoding
// ============================================================================

/// Encode a message into its ordered frames.
///
/// # Errors
///
/// Returns [`CmwLightError::UnsupportedFilter`] if a request carries a filter
/// value other than string, int, long or bool.
pub fn encode(message: &Message) -> Result<Vec<Bytes>> {
    let type_frame = Bytes::copy_from_slice(&[message.message_type().as_u8()]);
    match message {
        Message::ClientConnect { version } | Message::ServerConnectAck { version } => {
            Ok(vec![type_frame, Bytes::copy_from_slice(version.as_bytes())])
        }
        Message::ClientHeartbeat | Message::ServerHeartbeat => Ok(vec![type_frame]),
        Message::Request(request) => encode_request(type_frame, request),
        Message::Reply(reply) => encode_reply(type_frame, reply),
    }
}

/// Check that every filter value is of a supported type.
pub fn validate_filters(filters: &FieldMap) -> Result<()> {
    match filters.iter().find(|(_, v)| !v.is_filter_value()) {
        Some((key, value)) => Err(CmwLightError::UnsupportedFilter {
            key: key.clone(),
            kind: value.kind(),
        }),
        None => Ok(()),
    }
}

fn encode_request(type_frame: Bytes, request: &Request) -> Result<Vec<Bytes>> {
    validate_filters(&request.kind.context().filters)?;

    // Requests always announce an (empty) session body.
    let mut options = FieldMap::new();
    options.insert(tags::SESSION_BODY.into(), FieldValue::Map(FieldMap::new()));
    let header = header_map(&request.header, request.kind.request_type(), Some(options));

    let mut parts = vec![(FrameType::Header, header)];
    match &request.kind {
        RequestKind::Get { context }
        | RequestKind::Subscribe { context }
        | RequestKind::Unsubscribe { context } => {
            parts.push((FrameType::BodyRequestContext, request_context_map(context)));
        }
        RequestKind::Set { data, context } => {
            parts.push((FrameType::Body, Part::Raw(data.clone())));
            parts.push((FrameType::BodyRequestContext, request_context_map(context)));
        }
    }
    assemble(type_frame, parts)
}

fn encode_reply(type_frame: Bytes, reply: &Reply) -> Result<Vec<Bytes>> {
    let options = match &reply.kind {
        ReplyKind::SubscribeAck { source_id } => {
            Some(single_entry(tags::SOURCE_ID, FieldValue::Long(*source_id)))
        }
        ReplyKind::NotificationData {
            notification_id, ..
        } => Some(single_entry(
            tags::NOTIFICATION_ID,
            FieldValue::Long(*notification_id),
        )),
        ReplyKind::SessionConfirm { session_body } => Some(single_entry(
            tags::SESSION_BODY,
            FieldValue::Map(session_body.clone()),
        )),
        _ => None,
    };
    let header = header_map(&reply.header, reply.kind.request_type(), options);

    let mut parts = vec![(FrameType::Header, header)];
    match &reply.kind {
        ReplyKind::Reply { data, context } | ReplyKind::NotificationData { data, context, .. } => {
            parts.push((FrameType::Body, Part::Raw(data.clone())));
            parts.push((FrameType::BodyDataContext, data_context_map(context)));
        }
        ReplyKind::Exception(e)
        | ReplyKind::SubscribeException(e)
        | ReplyKind::NotificationException(e) => {
            parts.push((FrameType::BodyException, exception_map(e)));
        }
        ReplyKind::SubscribeAck { .. } | ReplyKind::Event | ReplyKind::SessionConfirm { .. } => {}
    }
    assemble(type_frame, parts)
}

/// A frame before serialization.
enum Part {
    Map(FieldMap),
    Raw(Bytes),
}

fn assemble(type_frame: Bytes, parts: Vec<(FrameType, Part)>) -> Result<Vec<Bytes>> {
    let mut frames = Vec::with_capacity(parts.len() + 2);
    let mut descriptor = Vec::with_capacity(parts.len());
    frames.push(type_frame);
    for (frame_type, part) in parts {
        descriptor.push(frame_type.as_u8());
        frames.push(match part {
            Part::Map(map) => Bytes::from(encode_map(&map)?),
            Part::Raw(bytes) => bytes,
        });
    }
    frames.push(Bytes::from(descriptor));
    Ok(frames)
}

fn single_entry(tag: &str, value: FieldValue) -> FieldMap {
    let mut map = FieldMap::new();
    map.insert(tag.to_string(), value);
    map
}

fn header_map(header: &Header, request_type: RequestType, options: Option<FieldMap>) -> Part {
    let mut map = FieldMap::new();
    map.insert(tags::ID.into(), FieldValue::Long(header.id));
    map.insert(tags::DEVICE_NAME.into(), header.device_name.as_str().into());
    map.insert(tags::PROPERTY_NAME.into(), header.property_name.as_str().into());
    map.insert(tags::REQUEST_TYPE.into(), FieldValue::Byte(request_type.as_i8()));
    map.insert(
        tags::UPDATE_TYPE.into(),
        FieldValue::Byte(header.update_type.as_i8()),
    );
    map.insert(tags::SESSION_ID.into(), header.session_id.as_str().into());
    if let Some(options) = options {
        map.insert(tags::OPTIONS.into(), FieldValue::Map(options));
    }
    Part::Map(map)
}

fn request_context_map(context: &RequestContext) -> Part {
    let mut map = FieldMap::new();
    map.insert(tags::SELECTOR.into(), context.selector.as_str().into());
    if !context.filters.is_empty() {
        map.insert(tags::FILTERS.into(), FieldValue::Map(context.filters.clone()));
    }
    if !context.data.is_empty() {
        map.insert(tags::DATA.into(), FieldValue::Map(context.data.clone()));
    }
    Part::Map(map)
}

fn data_context_map(context: &DataContext) -> Part {
    let mut map = FieldMap::new();
    map.insert(tags::CYCLE_NAME.into(), context.cycle_name.as_str().into());
    map.insert(tags::CYCLE_STAMP.into(), FieldValue::Long(context.cycle_stamp));
    map.insert(tags::ACQ_STAMP.into(), FieldValue::Long(context.acq_stamp));
    if !context.data.is_empty() {
        map.insert(tags::DATA.into(), FieldValue::Map(context.data.clone()));
    }
    Part::Map(map)
}

fn exception_map(exception: &ExceptionMessage) -> Part {
    let mut map = FieldMap::new();
    map.insert(
        exception_tags::CONTEXT_ACQ_STAMP.into(),
        FieldValue::Long(exception.context_acq_stamp),
    );
    map.insert(
        exception_tags::CONTEXT_CYCLE_STAMP.into(),
        FieldValue::Long(exception.context_cycle_stamp),
    );
    map.insert(exception_tags::MESSAGE.into(), exception.message.as_str().into());
    map.insert(
        exception_tags::TYPE.into(),
        FieldValue::Byte(exception.exception_type),
    );
    Part::Map(map)
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode an ordered sequence of frames into a message.
///
/// # Errors
///
/// Returns a [`ProtocolError`] describing the first problem found: unknown
/// message type, missing header or descriptor, descriptor that does not
/// list the frames present or does not fit the request type, unknown field
/// tags, fields with the wrong encoded type, or missing frames.
pub fn decode(frames: &[Bytes]) -> std::result::Result<Message, ProtocolError> {
    let first = frames.first().ok_or(ProtocolError::EmptyMessage)?;
    if first.len() != 1 {
        return Err(ProtocolError::InvalidMessageTypeFrame(first.len()));
    }
    let message_type = MessageType::try_from(first[0])?;

    match message_type {
        MessageType::ClientHb => {
            expect_frame_count(message_type, frames, 1)?;
            Ok(Message::ClientHeartbeat)
        }
        MessageType::ServerHb => {
            expect_frame_count(message_type, frames, 1)?;
            Ok(Message::ServerHeartbeat)
        }
        MessageType::ClientConnect => {
            expect_frame_count(message_type, frames, 2)?;
            Ok(Message::ClientConnect {
                version: version_string(&frames[1])?,
            })
        }
        MessageType::ServerConnectAck => {
            expect_frame_count(message_type, frames, 2)?;
            Ok(Message::ServerConnectAck {
                version: version_string(&frames[1])?,
            })
        }
        MessageType::ClientReq | MessageType::ServerRep => {
            decode_multi_frame(message_type, &frames[1..])
        }
    }
}

fn expect_frame_count(
    message_type: MessageType,
    frames: &[Bytes],
    expected: usize,
) -> std::result::Result<(), ProtocolError> {
    if frames.len() != expected {
        return Err(ProtocolError::FrameCount {
            message_type,
            expected,
            actual: frames.len(),
        });
    }
    Ok(())
}

fn version_string(frame: &Bytes) -> std::result::Result<String, ProtocolError> {
    String::from_utf8(frame.to_vec()).map_err(|_| ProtocolError::InvalidUtf8("version string"))
}

fn decode_multi_frame(
    message_type: MessageType,
    parts: &[Bytes],
) -> std::result::Result<Message, ProtocolError> {
    let (descriptor, frames) = parts
        .split_last()
        .ok_or(ProtocolError::MissingDescriptor)?;
    if frames.is_empty() {
        return Err(ProtocolError::MissingHeader);
    }
    if descriptor.len() != frames.len() {
        return Err(ProtocolError::DescriptorLength {
            descriptor: descriptor.len(),
            frames: frames.len(),
        });
    }
    let frame_types = descriptor
        .iter()
        .map(|b| FrameType::try_from(*b))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if frame_types[0] != FrameType::Header {
        return Err(ProtocolError::MissingHeader);
    }

    let fields = HeaderFields::decode(&frames[0])?;
    let request_type = fields.request_type;

    let expected = match message_type {
        MessageType::ClientReq => {
            if !matches!(
                request_type,
                RequestType::Get | RequestType::Set | RequestType::Subscribe | RequestType::Unsubscribe
            ) {
                return Err(ProtocolError::UnexpectedRequestType {
                    message_type,
                    request_type,
                });
            }
            request_type.frame_layout()
        }
        _ => {
            if matches!(
                request_type,
                RequestType::Get | RequestType::Set | RequestType::Connect | RequestType::Unsubscribe
            ) {
                return Err(ProtocolError::UnexpectedRequestType {
                    message_type,
                    request_type,
                });
            }
            reply_frame_layout(request_type)
        }
    };
    check_layout(request_type, expected, &frame_types, descriptor)?;

    let header = fields.header;
    let message = match message_type {
        MessageType::ClientReq => {
            let kind = match request_type {
                RequestType::Get => RequestKind::Get {
                    context: decode_request_context(&frames[1])?,
                },
                RequestType::Set => RequestKind::Set {
                    data: frames[1].clone(),
                    context: decode_request_context(&frames[2])?,
                },
                RequestType::Subscribe => RequestKind::Subscribe {
                    context: decode_request_context(&frames[1])?,
                },
                _ => RequestKind::Unsubscribe {
                    context: decode_request_context(&frames[1])?,
                },
            };
            Message::Request(Request { header, kind })
        }
        _ => {
            let kind = match request_type {
                RequestType::Reply => ReplyKind::Reply {
                    data: frames[1].clone(),
                    context: decode_data_context(&frames[2])?,
                },
                RequestType::Exception => ReplyKind::Exception(decode_exception(&frames[1])?),
                RequestType::Subscribe => ReplyKind::SubscribeAck {
                    source_id: fields.source_id.ok_or(ProtocolError::MissingField {
                        section: "options",
                        tag: tags::SOURCE_ID,
                    })?,
                },
                RequestType::SubscribeException => {
                    ReplyKind::SubscribeException(decode_exception(&frames[1])?)
                }
                RequestType::NotificationData => ReplyKind::NotificationData {
                    notification_id: fields.notification_id.ok_or(
                        ProtocolError::MissingField {
                            section: "options",
                            tag: tags::NOTIFICATION_ID,
                        },
                    )?,
                    data: frames[1].clone(),
                    context: decode_data_context(&frames[2])?,
                },
                RequestType::NotificationExc => {
                    ReplyKind::NotificationException(decode_exception(&frames[1])?)
                }
                RequestType::Event => ReplyKind::Event,
                _ => ReplyKind::SessionConfirm {
                    session_body: fields.session_body.unwrap_or_default(),
                },
            };
            Message::Reply(Reply { header, kind })
        }
    };
    Ok(message)
}

fn check_layout(
    request_type: RequestType,
    expected: &[FrameType],
    actual: &[FrameType],
    descriptor: &[u8],
) -> std::result::Result<(), ProtocolError> {
    if actual == expected {
        return Ok(());
    }
    if actual.len() < expected.len() && expected.starts_with(actual) {
        return Err(ProtocolError::MissingFrame {
            request_type,
            frame: expected[actual.len()],
        });
    }
    Err(ProtocolError::DescriptorMismatch {
        expected: expected.to_vec(),
        actual: descriptor.to_vec(),
    })
}

/// Decoded header frame, including the options sub-map.
struct HeaderFields {
    header: Header,
    request_type: RequestType,
    notification_id: Option<i64>,
    source_id: Option<i64>,
    session_body: Option<FieldMap>,
}

impl HeaderFields {
    fn decode(frame: &Bytes) -> std::result::Result<Self, ProtocolError> {
        let mut header = Header::default();
        let mut request_type = None;
        let mut notification_id = None;
        let mut source_id = None;
        let mut session_body = None;

        for (tag, value) in decode_map(frame)? {
            match tag.as_str() {
                tags::ID => header.id = take_long(&tag, value)?,
                tags::DEVICE_NAME => header.device_name = take_str(&tag, value)?,
                tags::PROPERTY_NAME => header.property_name = take_str(&tag, value)?,
                tags::SESSION_ID => header.session_id = take_str(&tag, value)?,
                tags::UPDATE_TYPE => {
                    header.update_type = UpdateType::try_from(take_byte(&tag, value)?)?
                }
                tags::REQUEST_TYPE => {
                    request_type = Some(RequestType::try_from(take_byte(&tag, value)?)?)
                }
                tags::OPTIONS => {
                    for (option, value) in take_map(&tag, value)? {
                        match option.as_str() {
                            tags::NOTIFICATION_ID => {
                                notification_id = Some(take_long(&option, value)?)
                            }
                            tags::SOURCE_ID => source_id = Some(take_long(&option, value)?),
                            tags::SESSION_BODY => session_body = Some(take_map(&option, value)?),
                            _ => {
                                return Err(ProtocolError::UnknownField {
                                    section: "options",
                                    tag: option,
                                })
                            }
                        }
                    }
                }
                _ => {
                    return Err(ProtocolError::UnknownField {
                        section: "header",
                        tag,
                    })
                }
            }
        }

        let request_type = request_type.ok_or(ProtocolError::MissingField {
            section: "header",
            tag: tags::REQUEST_TYPE,
        })?;
        Ok(Self {
            header,
            request_type,
            notification_id,
            source_id,
            session_body,
        })
    }
}

fn decode_request_context(frame: &Bytes) -> std::result::Result<RequestContext, ProtocolError> {
    let mut context = RequestContext::default();
    for (tag, value) in decode_map(frame)? {
        match tag.as_str() {
            tags::SELECTOR => context.selector = take_str(&tag, value)?,
            tags::FILTERS => context.filters = take_map(&tag, value)?,
            tags::DATA => context.data = take_map(&tag, value)?,
            _ => {
                return Err(ProtocolError::UnknownField {
                    section: "request context",
                    tag,
                })
            }
        }
    }
    Ok(context)
}

fn decode_data_context(frame: &Bytes) -> std::result::Result<DataContext, ProtocolError> {
    let mut context = DataContext::default();
    for (tag, value) in decode_map(frame)? {
        match tag.as_str() {
            tags::CYCLE_NAME => context.cycle_name = take_str(&tag, value)?,
            tags::CYCLE_STAMP => context.cycle_stamp = take_long(&tag, value)?,
            tags::ACQ_STAMP => context.acq_stamp = take_long(&tag, value)?,
            tags::DATA => context.data = take_map(&tag, value)?,
            _ => {
                return Err(ProtocolError::UnknownField {
                    section: "data context",
                    tag,
                })
            }
        }
    }
    Ok(context)
}

fn decode_exception(frame: &Bytes) -> std::result::Result<ExceptionMessage, ProtocolError> {
    let mut exception = ExceptionMessage::default();
    for (tag, value) in decode_map(frame)? {
        match tag.as_str() {
            exception_tags::CONTEXT_ACQ_STAMP => {
                exception.context_acq_stamp = take_long(&tag, value)?
            }
            exception_tags::CONTEXT_CYCLE_STAMP => {
                exception.context_cycle_stamp = take_long(&tag, value)?
            }
            exception_tags::MESSAGE => exception.message = take_str(&tag, value)?,
            exception_tags::TYPE => exception.exception_type = take_byte(&tag, value)?,
            _ => {
                return Err(ProtocolError::UnknownField {
                    section: "exception",
                    tag,
                })
            }
        }
    }
    Ok(exception)
}

fn mismatch(tag: &str, expected: ValueKind, actual: &FieldValue) -> ProtocolError {
    ProtocolError::TypeMismatch {
        tag: tag.to_string(),
        expected,
        actual: actual.kind(),
    }
}

fn take_long(tag: &str, value: FieldValue) -> std::result::Result<i64, ProtocolError> {
    match value {
        FieldValue::Long(v) => Ok(v),
        other => Err(mismatch(tag, ValueKind::Long, &other)),
    }
}

fn take_byte(tag: &str, value: FieldValue) -> std::result::Result<i8, ProtocolError> {
    match value {
        FieldValue::Byte(v) => Ok(v),
        other => Err(mismatch(tag, ValueKind::Byte, &other)),
    }
}

fn take_str(tag: &str, value: FieldValue) -> std::result::Result<String, ProtocolError> {
    match value {
        FieldValue::Str(v) => Ok(v),
        other => Err(mismatch(tag, ValueKind::Str, &other)),
    }
}

fn take_map(tag: &str, value: FieldValue) -> std::result::Result<FieldMap, ProtocolError> {
    match value {
        FieldValue::Map(v) => Ok(v),
        other => Err(mismatch(tag, ValueKind::Map, &other)),
    }
}
