//! ZMTP 3.0 framing (NULL security mechanism).
//!
//! Enough of the ZeroMQ wire protocol to act as a DEALER socket against a
//! ROUTER server:
//! - 64-byte greeting
//! - READY command carrying `Socket-Type` and `Identity`
//! - message frames with MORE/LONG flags
//!
//! ```text
//! greeting: 0xFF | 8 x pad | 0x7F | major | minor | "NULL" + 16 x 0 | as-server | 31 x 0
//! frame:    flags (1) | size (1, or 8 BE if LONG) | body
//! ```
//!
//! Incoming bytes are fed to [`ZmtpDecoder::push`], which buffers partial
//! reads and returns every complete multipart message.
//!
//! # Example
//!
//! ```
//! use bytes::{Bytes, BytesMut};
//! use cmwlight_client::transport::zmtp::{encode_message, greeting, ready_command, ZmtpDecoder};
//!
//! let mut wire = BytesMut::new();
//! wire.extend_from_slice(&greeting(true));
//! wire.extend_from_slice(&ready_command("ROUTER", ""));
//! encode_message(&[Bytes::from_static(&[0x03])], &mut wire);
//!
//! let mut decoder = ZmtpDecoder::new();
//! let messages = decoder.push(&wire).unwrap();
//! assert_eq!(messages, vec![vec![Bytes::from_static(&[0x03])]]);
//! assert_eq!(decoder.peer_socket_type(), Some("ROUTER"));
//! ```

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Greeting size in bytes (fixed).
pub const GREETING_SIZE: usize = 64;

/// Security mechanism announced in the greeting.
pub const MECHANISM_NULL: &[u8] = b"NULL";

/// Default maximum frame body size (256 MB).
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 256 * 1024 * 1024;

/// Frame flag bits.
pub mod flags {
    /// More frames of this message follow.
    pub const MORE: u8 = 0x01;
    /// Size is 8 bytes instead of 1.
    pub const LONG: u8 = 0x02;
    /// Frame is a command, not message data.
    pub const COMMAND: u8 = 0x04;
}

/// Build the 64-byte greeting.
pub fn greeting(as_server: bool) -> [u8; GREETING_SIZE] {
    let mut buf = [0u8; GREETING_SIZE];
    buf[0] = 0xFF;
    buf[9] = 0x7F;
    buf[10] = 3;
    buf[11] = 0;
    buf[12..12 + MECHANISM_NULL.len()].copy_from_slice(MECHANISM_NULL);
    buf[32] = u8::from(as_server);
    buf
}

/// Build a READY command frame with the given socket type and identity.
pub fn ready_command(socket_type: &str, identity: &str) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_u8(5);
    body.put_slice(b"READY");
    put_property(&mut body, "Socket-Type", socket_type.as_bytes());
    put_property(&mut body, "Identity", identity.as_bytes());

    let mut out = BytesMut::with_capacity(body.len() + 9);
    put_frame(&mut out, flags::COMMAND, &body);
    out
}

fn put_property(buf: &mut BytesMut, name: &str, value: &[u8]) {
    buf.put_u8(name.len() as u8);
    buf.put_slice(name.as_bytes());
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

/// Append one multipart message to `out`.
pub fn encode_message(frames: &[Bytes], out: &mut BytesMut) {
    let last = frames.len().saturating_sub(1);
    for (i, frame) in frames.iter().enumerate() {
        let more = if i < last { flags::MORE } else { 0 };
        put_frame(out, more, frame);
    }
}

fn put_frame(out: &mut BytesMut, frame_flags: u8, body: &[u8]) {
    if body.len() > u8::MAX as usize {
        out.put_u8(frame_flags | flags::LONG);
        out.put_u64(body.len() as u64);
    } else {
        out.put_u8(frame_flags);
        out.put_u8(body.len() as u8);
    }
    out.put_slice(body);
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// State machine for stream parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Need the 64 greeting bytes.
    Greeting,
    /// Need flags and size.
    FrameHeader,
    /// Header parsed, need `size` body bytes.
    FrameBody { frame_flags: u8, size: usize },
}

/// Decoder for the inbound byte stream of one ZMTP connection.
#[derive(Debug)]
pub struct ZmtpDecoder {
    buffer: BytesMut,
    state: State,
    /// Frames of the message currently being assembled.
    parts: Vec<Bytes>,
    ready: bool,
    peer_socket_type: Option<String>,
    peer_identity: Option<Bytes>,
    max_frame_size: u64,
}

impl ZmtpDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: u64) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::Greeting,
            parts: Vec::new(),
            ready: false,
            peer_socket_type: None,
            peer_identity: None,
            max_frame_size,
        }
    }

    /// Whether the peer's READY command has been received.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn peer_socket_type(&self) -> Option<&str> {
        self.peer_socket_type.as_deref()
    }

    pub fn peer_identity(&self) -> Option<&Bytes> {
        self.peer_identity.as_ref()
    }

    /// Forget everything, ready for a new connection.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = State::Greeting;
        self.parts.clear();
        self.ready = false;
        self.peer_socket_type = None;
        self.peer_identity = None;
    }

    /// Push data and extract all complete multipart messages.
    ///
    /// # Errors
    ///
    /// `InvalidData` for a bad greeting, an oversized frame, a malformed
    /// command, or an ERROR command from the peer.
    pub fn push(&mut self, data: &[u8]) -> io::Result<Vec<Vec<Bytes>>> {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        while let Some(message) = self.try_extract_one()? {
            messages.push(message);
        }
        Ok(messages)
    }

    fn try_extract_one(&mut self) -> io::Result<Option<Vec<Bytes>>> {
        loop {
            match self.state {
                State::Greeting => {
                    if self.buffer.len() < GREETING_SIZE {
                        return Ok(None);
                    }
                    let greeting = self.buffer.split_to(GREETING_SIZE);
                    check_greeting(&greeting)?;
                    self.state = State::FrameHeader;
                }

                State::FrameHeader => {
                    if self.buffer.len() < 2 {
                        return Ok(None);
                    }
                    let frame_flags = self.buffer[0];
                    let (header_len, size) = if frame_flags & flags::LONG != 0 {
                        if self.buffer.len() < 9 {
                            return Ok(None);
                        }
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(&self.buffer[1..9]);
                        (9, u64::from_be_bytes(raw))
                    } else {
                        (2, u64::from(self.buffer[1]))
                    };
                    if size > self.max_frame_size {
                        return Err(invalid(format!(
                            "frame size {size} exceeds maximum {}",
                            self.max_frame_size
                        )));
                    }
                    self.buffer.advance(header_len);
                    self.state = State::FrameBody {
                        frame_flags,
                        size: size as usize,
                    };
                }

                State::FrameBody { frame_flags, size } => {
                    if self.buffer.len() < size {
                        return Ok(None);
                    }
                    let body = self.buffer.split_to(size).freeze();
                    self.state = State::FrameHeader;

                    if frame_flags & flags::COMMAND != 0 {
                        self.handle_command(body)?;
                        continue;
                    }
                    self.parts.push(body);
                    if frame_flags & flags::MORE == 0 {
                        return Ok(Some(std::mem::take(&mut self.parts)));
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, mut body: Bytes) -> io::Result<()> {
        if body.is_empty() {
            return Err(invalid("empty command frame"));
        }
        let name_len = body.get_u8() as usize;
        if body.len() < name_len {
            return Err(invalid("truncated command name"));
        }
        let name = body.split_to(name_len);

        match &name[..] {
            b"READY" => {
                while body.has_remaining() {
                    let (key, value) = take_property(&mut body)?;
                    if key.eq_ignore_ascii_case(b"Socket-Type") {
                        self.peer_socket_type = Some(String::from_utf8_lossy(&value).into_owned());
                    } else if key.eq_ignore_ascii_case(b"Identity") {
                        self.peer_identity = Some(value);
                    }
                }
                self.ready = true;
                Ok(())
            }
            b"ERROR" => {
                let reason = if body.has_remaining() {
                    let len = (body.get_u8() as usize).min(body.len());
                    String::from_utf8_lossy(&body[..len]).into_owned()
                } else {
                    String::new()
                };
                Err(invalid(format!("peer sent ERROR: {reason}")))
            }
            // Unknown commands are ignored.
            _ => Ok(()),
        }
    }
}

impl Default for ZmtpDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn check_greeting(greeting: &[u8]) -> io::Result<()> {
    if greeting[0] != 0xFF || greeting[9] != 0x7F {
        return Err(invalid("invalid ZMTP signature"));
    }
    if greeting[10] < 3 {
        return Err(invalid(format!(
            "unsupported ZMTP version {}.{}",
            greeting[10], greeting[11]
        )));
    }
    let mechanism = &greeting[12..32];
    let end = mechanism
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(mechanism.len());
    if &mechanism[..end] != MECHANISM_NULL {
        return Err(invalid(format!(
            "unsupported security mechanism {}",
            String::from_utf8_lossy(&mechanism[..end])
        )));
    }
    Ok(())
}

fn take_property(body: &mut Bytes) -> io::Result<(Bytes, Bytes)> {
    let name_len = body.get_u8() as usize;
    if body.len() < name_len + 4 {
        return Err(invalid("truncated command property"));
    }
    let name = body.split_to(name_len);
    let value_len = body.get_u32() as usize;
    if body.len() < value_len {
        return Err(invalid("truncated command property value"));
    }
    let value = body.split_to(value_len);
    Ok((name, value))
}
