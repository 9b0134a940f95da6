use amqpwire_frame::{FrameError, FrameType};

use crate::reason::ShutdownReason;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The channel is closed and the command is not allowed while closed.
    #[error("channel already closed: {0}")]
    AlreadyClosed(ShutdownReason),

    /// A frame arrived that the channel cannot accept in its current state.
    #[error("unexpected {frame_type} frame on channel {channel}: {detail}")]
    UnexpectedFrame {
        channel: u16,
        frame_type: FrameType,
        detail: String,
    },

    /// A session is already registered on this channel number.
    #[error("channel {0} already in use")]
    ChannelInUse(u16),

    /// A command or frame was addressed to a different channel.
    #[error("channel mismatch: session is {expected}, got {actual}")]
    ChannelMismatch { expected: u16, actual: u16 },

    /// The owning connection has been dropped.
    #[error("connection no longer exists")]
    HostGone,

    /// The command handler rejected a command.
    #[error("command handler failed: {0}")]
    Handler(String),

    /// Connection settings that cannot be honored.
    #[error("invalid connection config: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// Build an [`SessionError::UnexpectedFrame`].
    pub fn unexpected(channel: u16, frame_type: FrameType, detail: impl Into<String>) -> Self {
        SessionError::UnexpectedFrame {
            channel,
            frame_type,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
