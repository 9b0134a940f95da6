//! Frame-level transport over one connected stream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use amqpwire_transport::{AmqpStream, Connector, Endpoint, TransportConfig};
use tokio::io::{self, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::FrameReader;
use crate::settings::{validate_timeout, FrameSettings};
use crate::writer::FrameWriter;

/// A connected, framed duplex channel.
///
/// One task reads (`read_frame` holds the read lock for the whole frame);
/// any number of tasks write through the shared single-writer path.
/// Both stream halves are released by [`close`](Self::close), so the socket
/// does not outlive it.
pub struct FrameTransport {
    endpoint: Option<Endpoint>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    reader: Mutex<Option<FrameReader<ReadHalf<AmqpStream>>>>,
    writer: RwLock<Option<FrameWriter<WriteHalf<AmqpStream>>>>,
    settings: Arc<FrameSettings>,
    closed: AtomicBool,
    close_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl FrameTransport {
    /// Connect to `endpoint` and wrap the resulting stream.
    pub async fn connect(endpoint: Endpoint, config: TransportConfig) -> Result<Self> {
        let connector = Connector::new(endpoint).with_config(config);
        Self::connect_with(&connector).await
    }

    /// Connect through a prepared [`Connector`] (custom upgrade hook, etc).
    pub async fn connect_with(connector: &Connector) -> Result<Self> {
        let stream = connector.connect().await?;
        let config = FrameConfig::from(connector.config());
        let mut transport = Self::from_stream(stream, &config);
        transport.endpoint = Some(connector.endpoint().clone());
        Ok(transport)
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: AmqpStream, config: &FrameConfig) -> Self {
        let local_addr = stream.local_addr();
        let remote_addr = stream.peer_addr();
        let settings = Arc::new(FrameSettings::new(config));
        let (read_half, write_half) = io::split(stream);

        debug!(local = %local_addr, remote = %remote_addr, "frame transport ready");
        Self {
            endpoint: None,
            local_addr,
            remote_addr,
            reader: Mutex::new(Some(FrameReader::with_settings(
                read_half,
                Arc::clone(&settings),
            ))),
            writer: RwLock::new(Some(FrameWriter::with_settings(
                write_half,
                Arc::clone(&settings),
            ))),
            settings,
            closed: AtomicBool::new(false),
            close_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Send the protocol header announcing the endpoint's version.
    ///
    /// Transports built with [`from_stream`](Self::from_stream) announce
    /// AMQP 0-9-1.
    pub async fn send_protocol_header(&self) -> Result<()> {
        let version = self
            .endpoint
            .as_ref()
            .map(|e| e.protocol)
            .unwrap_or_default();
        self.ensure_open()?;
        let writer = self.writer.read().await;
        let writer = writer.as_ref().ok_or(FrameError::Shutdown)?;
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(FrameError::Shutdown),
            result = writer.write_protocol_header(version) => result,
        }
    }

    /// Read exactly one frame.
    pub async fn read_frame(&self) -> Result<Frame> {
        self.ensure_open()?;
        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or(FrameError::Shutdown)?;
        let frame = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(FrameError::Shutdown),
            result = reader.read_frame() => result?,
        };
        trace!(
            channel = frame.channel,
            frame_type = %frame.frame_type,
            size = frame.payload.len(),
            "frame received"
        );
        Ok(frame)
    }

    /// Write one frame.
    pub async fn write_frame(&self, frame: &Frame) -> Result<()> {
        self.write_frames(std::slice::from_ref(frame)).await
    }

    /// Write frames contiguously under the write lock.
    pub async fn write_frames(&self, frames: &[Frame]) -> Result<()> {
        self.ensure_open()?;
        let writer = self.writer.read().await;
        let writer = writer.as_ref().ok_or(FrameError::Shutdown)?;
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(FrameError::Shutdown),
            result = writer.write_frames(frames) => result,
        }
    }

    /// Tear the transport down. Only the first call does anything.
    ///
    /// Pending reads and writes return [`FrameError::Shutdown`]. The write
    /// side is shut down, then both halves are dropped, closing the socket
    /// even while the transport itself stays alive. Errors raised while
    /// shutting the stream down are discarded.
    pub async fn close(&self) {
        let _guard = self.close_lock.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Cancelling first makes in-flight reads and writes drop their guards.
        self.shutdown.cancel();
        let writer = self.writer.write().await.take();
        if let Some(writer) = &writer {
            if let Err(err) = writer.shutdown().await {
                debug!(error = %err, remote = %self.remote_addr, "ignoring error during transport close");
            }
        }
        let reader = self.reader.lock().await.take();
        drop((reader, writer));
        debug!(remote = %self.remote_addr, "frame transport closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once [`close`](Self::close) has started.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    /// Set the per-read timeout. `None` disables it; a zero duration is rejected.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        validate_timeout(timeout)?;
        self.settings.set_read_timeout(timeout);
        Ok(())
    }

    /// Set the per-write timeout. `None` disables it; a zero duration is rejected.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        validate_timeout(timeout)?;
        self.settings.set_write_timeout(timeout);
        Ok(())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.settings.read_timeout()
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.settings.write_timeout()
    }

    /// Apply a negotiated frame-max to both directions.
    pub fn set_max_payload_size(&self, max_payload_size: usize) {
        self.settings.set_max_payload_size(max_payload_size);
    }

    pub fn max_payload_size(&self) -> usize {
        self.settings.max_payload_size()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The endpoint this transport was connected to, if it was built by `connect`.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(FrameError::Shutdown);
        }
        Ok(())
    }
}

impl std::fmt::Debug for FrameTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTransport")
            .field("endpoint", &self.endpoint)
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::codec::{encode_frame, FrameType};

    async fn pair() -> (FrameTransport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let endpoint = Endpoint::new("127.0.0.1", addr.port());
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let transport = FrameTransport::connect(endpoint, TransportConfig::default())
            .await
            .unwrap();
        (transport, accept.await.unwrap())
    }

    #[tokio::test]
    async fn sends_header_and_exchanges_frames() {
        let (transport, mut broker) = pair().await;
        assert_eq!(transport.remote_addr(), broker.local_addr().unwrap());
        assert_eq!(transport.endpoint().unwrap().host, "127.0.0.1");

        transport.send_protocol_header().await.unwrap();
        let mut header = [0u8; 8];
        broker.read_exact(&mut header).await.unwrap();
        assert_eq!(&header, b"AMQP\x00\x00\x09\x01");

        let mut wire = bytes::BytesMut::new();
        encode_frame(&Frame::method(0, Bytes::from_static(b"\x00\x0a\x00\x0a")), &mut wire)
            .unwrap();
        broker.write_all(&wire).await.unwrap();

        let frame = transport.read_frame().await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Method);
        assert_eq!(frame.channel, 0);

        transport.write_frame(&Frame::heartbeat()).await.unwrap();
        let mut beat = [0u8; 8];
        broker.read_exact(&mut beat).await.unwrap();
        assert_eq!(beat, [8, 0, 0, 0, 0, 0, 0, 0xCE]);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_unblocks_reader() {
        let (transport, _broker) = pair().await;
        let transport = Arc::new(transport);

        let reader = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.read_frame().await })
        };
        tokio::task::yield_now().await;

        tokio::join!(transport.close(), transport.close());
        transport.close().await;
        assert!(transport.is_closed());

        let result = reader.await.unwrap();
        assert!(matches!(result, Err(FrameError::Shutdown)));
        assert!(matches!(
            transport.write_frame(&Frame::heartbeat()).await,
            Err(FrameError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn close_releases_the_socket() {
        let (transport, mut broker) = pair().await;
        transport.close().await;

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), broker.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);

        // The transport is still alive here; only a released socket makes
        // the broker's writes fail.
        let mut write_failed = false;
        for _ in 0..20 {
            if broker.write_all(&[0u8; 1024]).await.is_err() {
                write_failed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(write_failed, "broker writes kept succeeding after close");
        assert!(transport.is_closed());
        assert!(matches!(transport.read_frame().await, Err(FrameError::Shutdown)));
    }

    #[tokio::test]
    async fn timeout_setters() {
        let (transport, _broker) = pair().await;

        transport
            .set_read_timeout(Some(Duration::from_millis(1500)))
            .unwrap();
        assert_eq!(transport.read_timeout(), Some(Duration::from_millis(1500)));
        transport.set_write_timeout(None).unwrap();
        assert_eq!(transport.write_timeout(), None);

        let err = transport.set_read_timeout(Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, FrameError::Io(ref io) if io.kind() == std::io::ErrorKind::InvalidInput));

        transport.close().await;
        assert!(transport.set_read_timeout(Some(Duration::ZERO)).is_ok());
        assert!(transport.set_write_timeout(Some(Duration::from_secs(1))).is_ok());
    }

    #[tokio::test]
    async fn peer_eof_on_boundary_is_connection_closed() {
        let (transport, broker) = pair().await;
        drop(broker);
        let err = transport.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn connect_failure_surfaces_as_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = Endpoint::new("127.0.0.1", port);
        let err = FrameTransport::connect(endpoint, TransportConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Transport(_)));
    }
}
