use std::io::ErrorKind;
use std::slice;
use std::sync::Arc;

use amqpwire_transport::ProtocolVersion;
use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::header::encode_protocol_header;
use crate::settings::{with_timeout, FrameSettings};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

struct WriterState<T> {
    inner: T,
    buf: BytesMut,
}

/// Writes complete frames to any `AsyncWrite` stream.
///
/// All writes go through one async mutex: a batch passed to
/// [`write_frames`](Self::write_frames) reaches the stream contiguously, and
/// frames from concurrent callers never interleave at the byte level.
pub struct FrameWriter<T> {
    state: Mutex<WriterState<T>>,
    settings: Arc<FrameSettings>,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, &FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: &FrameConfig) -> Self {
        Self::with_settings(inner, Arc::new(FrameSettings::new(config)))
    }

    /// Create a frame writer whose limits are shared with other handles.
    pub fn with_settings(inner: T, settings: Arc<FrameSettings>) -> Self {
        Self {
            state: Mutex::new(WriterState {
                inner,
                buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            }),
            settings,
        }
    }

    /// Write the 8-byte protocol header that opens a connection.
    pub async fn write_protocol_header(&self, version: ProtocolVersion) -> Result<()> {
        let header = encode_protocol_header(version);
        let mut state = self.state.lock().await;
        let WriterState { inner, .. } = &mut *state;
        self.flush_bytes(inner, &header).await
    }

    /// Write a complete frame.
    pub async fn write_frame(&self, frame: &Frame) -> Result<()> {
        self.write_frames(slice::from_ref(frame)).await
    }

    /// Write several frames as one contiguous sequence, then flush.
    ///
    /// Payload limits are checked up front, so a rejected batch writes nothing.
    pub async fn write_frames(&self, frames: &[Frame]) -> Result<()> {
        let max = self.settings.max_payload_size();
        if let Some(frame) = frames.iter().find(|f| f.payload.len() > max) {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max,
            });
        }
        if frames.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let WriterState { inner, buf } = &mut *state;
        buf.clear();
        for frame in frames {
            encode_frame(frame, buf)?;
        }
        self.flush_bytes(inner, &buf[..]).await
    }

    async fn flush_bytes(&self, inner: &mut T, bytes: &[u8]) -> Result<()> {
        let timeout = self.settings.write_timeout();
        with_timeout(timeout, "write", async {
            inner.write_all(bytes).await?;
            inner.flush().await
        })
        .await
        .map_err(|err| match err.kind() {
            ErrorKind::WriteZero => FrameError::ConnectionClosed,
            _ => FrameError::Io(err),
        })
    }

    /// Flush and shut down the write side of the stream, bounded by the
    /// write timeout.
    ///
    /// Waits for any in-flight write to finish first.
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let timeout = self.settings.write_timeout();
        with_timeout(timeout, "shutdown", state.inner.shutdown())
            .await
            .map_err(FrameError::Io)
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.state.into_inner().inner
    }

    /// Update maximum payload size for subsequent frame encoding.
    pub fn set_max_payload_size(&self, max_payload_size: usize) {
        self.settings.set_max_payload_size(max_payload_size);
    }

    /// Shared settings handle.
    pub fn settings(&self) -> &Arc<FrameSettings> {
        &self.settings
    }
}
