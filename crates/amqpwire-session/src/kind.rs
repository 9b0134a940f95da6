//! Channel kinds: how inbound frames are reassembled into commands.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use amqpwire_frame::{Frame, FrameType};

use crate::command::{content_body_size, Command, MethodId};
use crate::error::{Result, SessionError};

/// Turns a stream of frames on one channel into commands.
pub trait FrameAssembler: Send {
    /// Feed one frame. Returns a command once one is complete.
    fn push(&mut self, frame: Frame) -> Result<Option<Command>>;

    /// Drop any partially assembled command.
    fn reset(&mut self);
}

/// Decides which methods are followed by a content header and body.
pub trait ContentClassifier: Send + Sync {
    fn carries_content(&self, method: MethodId) -> bool;
}

/// Classifier backed by a fixed set of method ids.
#[derive(Debug, Clone, Default)]
pub struct MethodIdClassifier {
    ids: HashSet<MethodId>,
}

impl MethodIdClassifier {
    pub fn new(ids: impl IntoIterator<Item = MethodId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// The content-bearing methods of the `basic` class.
    pub fn basic() -> Self {
        Self::new([
            MethodId::BASIC_PUBLISH,
            MethodId::BASIC_RETURN,
            MethodId::BASIC_DELIVER,
            MethodId::BASIC_GET_OK,
        ])
    }
}

impl ContentClassifier for MethodIdClassifier {
    fn carries_content(&self, method: MethodId) -> bool {
        self.ids.contains(&method)
    }
}

/// Channel 0: each method or heartbeat frame is a command on its own.
#[derive(Debug, Default)]
pub struct ControlAssembler;

impl FrameAssembler for ControlAssembler {
    fn push(&mut self, frame: Frame) -> Result<Option<Command>> {
        match frame.frame_type {
            FrameType::Method | FrameType::Heartbeat => {
                Ok(Some(Command::from_frames(frame.channel, vec![frame])))
            }
            other => Err(SessionError::unexpected(
                frame.channel,
                other,
                "control channel carries no content",
            )),
        }
    }

    fn reset(&mut self) {}
}

/// Method-only channel.
#[derive(Debug, Default)]
pub struct MethodAssembler;

impl FrameAssembler for MethodAssembler {
    fn push(&mut self, frame: Frame) -> Result<Option<Command>> {
        match frame.frame_type {
            FrameType::Method => Ok(Some(Command::from_frames(frame.channel, vec![frame]))),
            other => Err(SessionError::unexpected(
                frame.channel,
                other,
                "channel accepts method frames only",
            )),
        }
    }

    fn reset(&mut self) {}
}

enum ContentState {
    Idle,
    AwaitHeader {
        method: Frame,
    },
    AwaitBody {
        frames: Vec<Frame>,
        remaining: u64,
    },
}

/// Channel that carries method, content header and body frames.
pub struct ContentAssembler {
    classifier: Arc<dyn ContentClassifier>,
    state: ContentState,
}

impl ContentAssembler {
    pub fn new(classifier: Arc<dyn ContentClassifier>) -> Self {
        Self {
            classifier,
            state: ContentState::Idle,
        }
    }

    /// True while a content command is partially assembled.
    pub fn in_progress(&self) -> bool {
        !matches!(self.state, ContentState::Idle)
    }
}

impl fmt::Debug for ContentAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentAssembler")
            .field("in_progress", &self.in_progress())
            .finish_non_exhaustive()
    }
}

impl FrameAssembler for ContentAssembler {
    fn push(&mut self, frame: Frame) -> Result<Option<Command>> {
        let channel = frame.channel;
        let frame_type = frame.frame_type;

        match (std::mem::replace(&mut self.state, ContentState::Idle), frame_type) {
            (ContentState::Idle, FrameType::Method) => {
                let carries_content = MethodId::from_payload(&frame.payload)
                    .is_some_and(|id| self.classifier.carries_content(id));
                if carries_content {
                    self.state = ContentState::AwaitHeader { method: frame };
                    Ok(None)
                } else {
                    Ok(Some(Command::from_frames(channel, vec![frame])))
                }
            }
            (ContentState::AwaitHeader { method }, FrameType::Header) => {
                let Some(remaining) = content_body_size(&frame.payload) else {
                    return Err(SessionError::unexpected(
                        channel,
                        frame_type,
                        "content header too short",
                    ));
                };
                let frames = vec![method, frame];
                if remaining == 0 {
                    return Ok(Some(Command::from_frames(channel, frames)));
                }
                self.state = ContentState::AwaitBody { frames, remaining };
                Ok(None)
            }
            (
                ContentState::AwaitBody {
                    mut frames,
                    remaining,
                },
                FrameType::Body,
            ) => {
                let len = frame.payload.len() as u64;
                if len > remaining {
                    return Err(SessionError::unexpected(
                        channel,
                        frame_type,
                        format!("body frame of {len} bytes exceeds the {remaining} bytes left"),
                    ));
                }
                frames.push(frame);
                let remaining = remaining - len;
                if remaining == 0 {
                    return Ok(Some(Command::from_frames(channel, frames)));
                }
                self.state = ContentState::AwaitBody { frames, remaining };
                Ok(None)
            }
            (ContentState::Idle, _) => Err(SessionError::unexpected(
                channel,
                frame_type,
                "expected a method frame",
            )),
            (ContentState::AwaitHeader { .. }, _) => Err(SessionError::unexpected(
                channel,
                frame_type,
                "expected a content header",
            )),
            (ContentState::AwaitBody { .. }, _) => Err(SessionError::unexpected(
                channel,
                frame_type,
                "expected a content body frame",
            )),
        }
    }

    fn reset(&mut self) {
        self.state = ContentState::Idle;
    }
}

/// The closed set of channel kinds.
#[derive(Debug)]
pub enum ChannelKind {
    Control(ControlAssembler),
    Method(MethodAssembler),
    Content(ContentAssembler),
}

impl ChannelKind {
    pub fn control() -> Self {
        ChannelKind::Control(ControlAssembler)
    }

    pub fn method() -> Self {
        ChannelKind::Method(MethodAssembler)
    }

    pub fn content(classifier: Arc<dyn ContentClassifier>) -> Self {
        ChannelKind::Content(ContentAssembler::new(classifier))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Control(_) => "control",
            ChannelKind::Method(_) => "method",
            ChannelKind::Content(_) => "content",
        }
    }
}

impl FrameAssembler for ChannelKind {
    fn push(&mut self, frame: Frame) -> Result<Option<Command>> {
        match self {
            ChannelKind::Control(inner) => inner.push(frame),
            ChannelKind::Method(inner) => inner.push(frame),
            ChannelKind::Content(inner) => inner.push(frame),
        }
    }

    fn reset(&mut self) {
        match self {
            ChannelKind::Control(inner) => inner.reset(),
            ChannelKind::Method(inner) => inner.reset(),
            ChannelKind::Content(inner) => inner.reset(),
        }
    }
}
