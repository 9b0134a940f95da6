use amqpwire_transport::TransportError;

/// Errors that can occur during frame encoding/decoding and frame I/O.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The byte stream violates the frame layout. Fatal to the connection.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The declared payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream part-way through a frame.
    #[error("connection reset (stream ended mid-frame)")]
    ConnectionReset,

    /// The peer closed the stream on a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// Error raised while establishing the underlying transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The frame transport has been closed locally.
    #[error("frame transport shut down")]
    Shutdown,
}

impl FrameError {
    /// True for decode violations: the stream can no longer be trusted.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            FrameError::Malformed(_) | FrameError::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
