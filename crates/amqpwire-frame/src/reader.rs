use std::io::ErrorKind;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{
    check_frame_end, parse_header, protocol_header_reply, Frame, FrameConfig, HEADER_SIZE,
};
use crate::error::{FrameError, Result};
use crate::header::{PROTOCOL_HEADER_SIZE, PROTOCOL_NAME};
use crate::settings::{with_timeout, FrameSettings};

/// Reads complete frames from any `AsyncRead` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// Each underlying read is bounded by the current read timeout, so a frame
/// trickling in slowly never times out as long as bytes keep arriving.
pub struct FrameReader<T> {
    inner: T,
    settings: Arc<FrameSettings>,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, &FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: &FrameConfig) -> Self {
        Self::with_settings(inner, Arc::new(FrameSettings::new(config)))
    }

    /// Create a frame reader whose limits are shared with other handles.
    pub fn with_settings(inner: T, settings: Arc<FrameSettings>) -> Self {
        Self { inner, settings }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF lands on a frame
    /// boundary and `Err(FrameError::ConnectionReset)` when it lands inside one.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        self.fill(&mut header, true).await?;

        if header[0] == PROTOCOL_NAME[0] {
            let mut reply = [0u8; PROTOCOL_HEADER_SIZE];
            reply[..HEADER_SIZE].copy_from_slice(&header);
            self.fill(&mut reply[HEADER_SIZE..], false).await?;
            return Err(protocol_header_reply(&reply));
        }

        let (frame_type, channel, payload_len) =
            parse_header(&header, self.settings.max_payload_size())?;

        let mut payload = BytesMut::zeroed(payload_len);
        self.fill(&mut payload, false).await?;

        let mut end = [0u8; 1];
        self.fill(&mut end, false).await?;
        check_frame_end(end[0])?;

        Ok(Frame {
            frame_type,
            channel,
            payload: payload.freeze(),
        })
    }

    async fn fill(&mut self, buf: &mut [u8], frame_start: bool) -> Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            let timeout = self.settings.read_timeout();
            let read = match with_timeout(timeout, "read", self.inner.read(&mut buf[filled..])).await
            {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(if frame_start && filled == 0 {
                    FrameError::ConnectionClosed
                } else {
                    FrameError::ConnectionReset
                });
            }
            filled += read;
        }
        Ok(())
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&self, max_payload_size: usize) {
        self.settings.set_max_payload_size(max_payload_size);
    }

    /// Shared settings handle.
    pub fn settings(&self) -> &Arc<FrameSettings> {
        &self.settings
    }
}
