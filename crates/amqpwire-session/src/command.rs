use std::fmt;

use amqpwire_frame::{Frame, FrameType, CONNECTION_CHANNEL, FRAME_OVERHEAD};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// `(class-id, method-id)` pair from the first four bytes of a method payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId {
    pub class_id: u16,
    pub method_id: u16,
}

impl MethodId {
    pub const CONNECTION_CLOSE: MethodId = MethodId::new(10, 50);
    pub const CONNECTION_CLOSE_OK: MethodId = MethodId::new(10, 51);
    pub const CHANNEL_CLOSE: MethodId = MethodId::new(20, 40);
    pub const CHANNEL_CLOSE_OK: MethodId = MethodId::new(20, 41);
    pub const BASIC_PUBLISH: MethodId = MethodId::new(60, 40);
    pub const BASIC_RETURN: MethodId = MethodId::new(60, 50);
    pub const BASIC_DELIVER: MethodId = MethodId::new(60, 60);
    pub const BASIC_GET_OK: MethodId = MethodId::new(60, 71);

    pub const fn new(class_id: u16, method_id: u16) -> Self {
        Self {
            class_id,
            method_id,
        }
    }

    /// Read the id from a method frame payload.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload {
            [c0, c1, m0, m1, ..] => Some(Self::new(
                u16::from_be_bytes([*c0, *c1]),
                u16::from_be_bytes([*m0, *m1]),
            )),
            _ => None,
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.class_id, self.method_id)
    }
}

/// Body size declared by a content header payload.
///
/// Layout: class-id (2) + weight (2) + body-size (8 BE) + properties.
pub fn content_body_size(header_payload: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = header_payload.get(4..12)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// One logical protocol message: one or more frames on the same channel.
///
/// Shapes:
/// - a single method frame
/// - a method frame, a content header and zero or more body frames
/// - a single heartbeat on channel 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    channel: u16,
    frames: Vec<Frame>,
}

impl Command {
    /// A method-only command.
    pub fn method(channel: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            frames: vec![Frame::method(channel, payload)],
        }
    }

    /// A content-carrying command. The body is split into frames that fit
    /// `frame_max` (total frame size); `frame_max == 0` means no limit.
    pub fn content(
        channel: u16,
        method: impl Into<Bytes>,
        header: impl Into<Bytes>,
        body: impl Into<Bytes>,
        frame_max: usize,
    ) -> Self {
        let body = body.into();
        let mut frames = vec![Frame::method(channel, method), Frame::header(channel, header)];

        let chunk = if frame_max == 0 {
            body.len().max(1)
        } else {
            frame_max.saturating_sub(FRAME_OVERHEAD).max(1)
        };
        let mut offset = 0;
        while offset < body.len() {
            let end = (offset + chunk).min(body.len());
            frames.push(Frame::body(channel, body.slice(offset..end)));
            offset = end;
        }

        Self { channel, frames }
    }

    /// A connection-level heartbeat.
    pub fn heartbeat() -> Self {
        Self {
            channel: CONNECTION_CHANNEL,
            frames: vec![Frame::heartbeat()],
        }
    }

    /// Build from frames already known to form one command.
    pub(crate) fn from_frames(channel: u16, frames: Vec<Frame>) -> Self {
        debug_assert!(!frames.is_empty());
        Self { channel, frames }
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self.frames.first(), Some(f) if f.frame_type == FrameType::Heartbeat)
    }

    /// The method frame's payload, if this is a method or content command.
    pub fn method_payload(&self) -> Option<&Bytes> {
        self.frames
            .first()
            .filter(|f| f.frame_type == FrameType::Method)
            .map(|f| &f.payload)
    }

    pub fn method_id(&self) -> Option<MethodId> {
        self.method_payload()
            .and_then(|payload| MethodId::from_payload(payload))
    }

    /// The content header payload, if any.
    pub fn content_header(&self) -> Option<&Bytes> {
        self.frames
            .get(1)
            .filter(|f| f.frame_type == FrameType::Header)
            .map(|f| &f.payload)
    }

    /// The content body, joined across body frames.
    pub fn body(&self) -> Bytes {
        let bodies: Vec<&Bytes> = self
            .frames
            .iter()
            .filter(|f| f.frame_type == FrameType::Body)
            .map(|f| &f.payload)
            .collect();
        match bodies.as_slice() {
            [] => Bytes::new(),
            [only] => Bytes::clone(only),
            _ => {
                let total = bodies.iter().map(|b| b.len()).sum();
                let mut joined = BytesMut::with_capacity(total);
                for payload in bodies {
                    joined.extend_from_slice(payload);
                }
                joined.freeze()
            }
        }
    }
}
