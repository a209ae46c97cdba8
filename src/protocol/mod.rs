//! Protocol module - wire constants, message model and frame codec.
//!
//! This module implements the CMW-light framing:
//! - Message, frame, request and update type discriminators
//! - Typed [`Message`] sum type with request and reply payloads
//! - Encoding to and decoding from ordered byte frames, with descriptor
//!   validation

mod frame;
mod message;
mod wire_format;

pub use frame::{decode, encode, validate_filters};
pub use message::{
    DataContext, ExceptionMessage, Header, Message, Reply, ReplyKind, Request, RequestContext,
    RequestKind,
};
pub use wire_format::{
    exception_tags, reply_frame_layout, tags, FrameType, MessageType, RequestType, UpdateType,
    CLIENT_PROTOCOL_VERSION,
};
