use std::fmt;

use amqpwire_transport::{TransportConfig, DEFAULT_MAX_PAYLOAD};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};
use crate::header::{decode_protocol_header, PROTOCOL_HEADER_SIZE, PROTOCOL_NAME};

/// Frame header: type (1) + channel (2) + length (4) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// Sentinel byte that must follow every payload.
pub const FRAME_END: u8 = 0xCE;

/// Bytes a frame occupies on the wire beyond its payload.
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + 1;

/// Frame kinds defined by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Method = 1,
    Header = 2,
    Body = 3,
    Heartbeat = 8,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(FrameType::Method),
            2 => Some(FrameType::Header),
            3 => Some(FrameType::Body),
            8 => Some(FrameType::Heartbeat),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameType::Method => "method",
            FrameType::Header => "header",
            FrameType::Body => "body",
            FrameType::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed, channel-addressed frame with an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    /// Channel this frame belongs to; 0 is the connection channel.
    pub channel: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, channel: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            channel,
            payload: payload.into(),
        }
    }

    pub fn method(channel: u16, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Method, channel, payload)
    }

    pub fn header(channel: u16, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Header, channel, payload)
    }

    pub fn body(channel: u16, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Body, channel, payload)
    }

    /// Heartbeats always travel on channel 0 with an empty payload.
    pub fn heartbeat() -> Self {
        Self::new(FrameType::Heartbeat, 0, Bytes::new())
    }

    /// The total wire size of this frame (header + payload + end marker).
    pub fn wire_size(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬────────────┬─────────────┬──────────────────┬──────────┐
/// │ Type (1B)│ Channel    │ Length      │ Payload          │ End (1B) │
/// │          │ (2B BE)    │ (4B BE)     │ (Length bytes)   │ 0xCE     │
/// └──────────┴────────────┴─────────────┴──────────────────┴──────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let len = frame.payload.len();
    if len > i32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: i32::MAX as usize,
        });
    }
    dst.reserve(frame.wire_size());
    dst.put_u8(frame.frame_type.as_u8());
    dst.put_u16(frame.channel);
    dst.put_u32(len as u32);
    dst.put_slice(&frame.payload);
    dst.put_u8(FRAME_END);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.first() == Some(&PROTOCOL_NAME[0]) {
        if src.len() < PROTOCOL_HEADER_SIZE {
            return Ok(None); // Need the whole reply header
        }
        return Err(protocol_header_reply(&src[..PROTOCOL_HEADER_SIZE]));
    }

    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&src[..HEADER_SIZE]);
    let (frame_type, channel, payload_len) = parse_header(&header, max_payload)?;

    let total = HEADER_SIZE + payload_len + 1;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None); // Need more data
    }

    check_frame_end(src[total - 1])?;

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    src.advance(1);

    Ok(Some(Frame {
        frame_type,
        channel,
        payload,
    }))
}

/// Validate a 7-byte frame header and return `(type, channel, payload length)`.
///
/// The length is checked against `max_payload` before any allocation happens.
pub(crate) fn parse_header(
    header: &[u8; HEADER_SIZE],
    max_payload: usize,
) -> Result<(FrameType, u16, usize)> {
    let frame_type = FrameType::from_u8(header[0])
        .ok_or_else(|| FrameError::Malformed(format!("unknown frame type {}", header[0])))?;
    let channel = u16::from_be_bytes([header[1], header[2]]);
    let declared = u32::from_be_bytes([header[3], header[4], header[5], header[6]]);

    // The length is a signed 32-bit field; anything above i32::MAX is negative.
    if declared > i32::MAX as u32 {
        return Err(FrameError::Malformed(format!(
            "negative payload length {}",
            declared as i32
        )));
    }

    let payload_len = declared as usize;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    Ok((frame_type, channel, payload_len))
}

pub(crate) fn check_frame_end(byte: u8) -> Result<()> {
    if byte != FRAME_END {
        return Err(FrameError::Malformed(format!(
            "bad frame end marker 0x{byte:02X} (expected 0x{FRAME_END:02X})"
        )));
    }
    Ok(())
}

/// The peer sent a protocol header where a frame was expected: it rejected
/// the version we announced.
pub(crate) fn protocol_header_reply(bytes: &[u8]) -> FrameError {
    match decode_protocol_header(bytes) {
        Some(version) => FrameError::Malformed(format!(
            "peer rejected protocol header; it supports AMQP {version}"
        )),
        None => FrameError::Malformed(
            "peer sent a protocol header instead of a frame".to_string(),
        ),
    }
}

/// Configuration for frame I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Bound on each underlying read call.
    pub read_timeout: Option<std::time::Duration>,
    /// Bound on each write operation.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl From<&TransportConfig> for FrameConfig {
    fn from(config: &TransportConfig) -> Self {
        Self {
            max_payload_size: config.max_payload_size,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        }
    }
}

/// `tokio_util` codec over the frame wire format, for use with `Framed`.
#[derive(Debug, Clone)]
pub struct AmqpCodec {
    max_payload_size: usize,
}

impl AmqpCodec {
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }
}

impl Default for AmqpCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for AmqpCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionReset),
        }
    }
}

impl Encoder<Frame> for AmqpCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&frame, dst)
    }
}
