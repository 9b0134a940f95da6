use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Any duplex async byte stream a security upgrade can produce.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// A connected broker stream: raw TCP, or whatever the security upgrade returned.
///
/// This is the sole read/write surface for the lifetime of a connection. Socket
/// addresses are captured at connect time because upgraded streams hide the
/// underlying socket.
pub struct AmqpStream {
    inner: AmqpStreamInner,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

enum AmqpStreamInner {
    Tcp(TcpStream),
    Upgraded(Box<dyn AsyncStream>),
}

impl AmqpStream {
    /// Wrap a plain TCP stream.
    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self {
            inner: AmqpStreamInner::Tcp(stream),
            local_addr,
            peer_addr,
        })
    }

    /// Wrap an upgraded stream, keeping the addresses of the socket it runs over.
    pub fn from_upgraded(
        stream: Box<dyn AsyncStream>,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            inner: AmqpStreamInner::Upgraded(stream),
            local_addr,
            peer_addr,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether a security upgrade was applied.
    pub fn is_upgraded(&self) -> bool {
        matches!(self.inner, AmqpStreamInner::Upgraded(_))
    }
}

impl AsyncRead for AmqpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            AmqpStreamInner::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            AmqpStreamInner::Upgraded(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AmqpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            AmqpStreamInner::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            AmqpStreamInner::Upgraded(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            AmqpStreamInner::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            AmqpStreamInner::Upgraded(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            AmqpStreamInner::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            AmqpStreamInner::Upgraded(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for AmqpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            AmqpStreamInner::Tcp(_) => "tcp",
            AmqpStreamInner::Upgraded(_) => "upgraded",
        };
        f.debug_struct("AmqpStream")
            .field("type", &kind)
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}
