//! Channel abstraction over the established transports.
//!
//! A `Channel` is an ordered bidirectional byte stream: plain TCP, a Unix
//! socket, or TLS over either (directly or through a proxy tunnel). `BoxedIo`
//! erases the underlying transport so the TLS layer can wrap any of them.

use std::fmt;
use std::io::ErrorKind;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_boring::SslStream;

/// Any socket usable as a connection transport.
pub trait StreamSocket: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl StreamSocket for TcpStream {}
#[cfg(unix)]
impl StreamSocket for UnixStream {}
impl<S: StreamSocket> StreamSocket for SslStream<S> {}
impl StreamSocket for BoxedIo {}

/// Object-safe boxed transport, so TLS can run over TCP, Unix sockets, and
/// proxy tunnels alike.
pub struct BoxedIo {
    inner: Pin<Box<dyn StreamSocket>>,
}

impl BoxedIo {
    pub fn new<S: StreamSocket>(socket: S) -> Self {
        Self {
            inner: Box::pin(socket),
        }
    }
}

impl fmt::Debug for BoxedIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoxedIo")
    }
}

impl AsyncRead for BoxedIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for BoxedIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.inner.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_shutdown(cx)
    }
}

/// An established connection transport.
#[derive(Debug)]
pub enum Channel {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    Tls(SslStream<BoxedIo>),
}

impl Channel {
    /// Non-blocking liveness check.
    ///
    /// Detects FIN/RST on plain transports via a zero-length peek. TLS
    /// channels report active; their liveness is observed through reads.
    pub fn is_active(&self) -> bool {
        match self {
            Channel::Tcp(stream) => {
                if stream.peer_addr().is_err() {
                    return false;
                }
                let mut buf = [0u8; 1];
                match stream.try_read(&mut buf) {
                    Ok(0) => false,
                    Ok(_) => true,
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => true,
                    Err(_) => false,
                }
            }
            #[cfg(unix)]
            Channel::Unix(stream) => {
                let mut buf = [0u8; 1];
                match stream.try_read(&mut buf) {
                    Ok(0) => false,
                    Ok(_) => true,
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => true,
                    Err(_) => false,
                }
            }
            Channel::Tls(_) => true,
        }
    }

    /// True once the channel carries TLS.
    pub fn is_tls(&self) -> bool {
        matches!(self, Channel::Tls(_))
    }
}

impl AsyncRead for Channel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Channel::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Channel::Unix(s) => Pin::new(s).poll_read(cx, buf),
            Channel::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Channel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Channel::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Channel::Unix(s) => Pin::new(s).poll_write(cx, buf),
            Channel::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Channel::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Channel::Unix(s) => Pin::new(s).poll_flush(cx),
            Channel::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Channel::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Channel::Unix(s) => Pin::new(s).poll_shutdown(cx),
            Channel::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl StreamSocket for Channel {}

/// Terminal output of the connection factory: the established channel tagged
/// with the protocol ALPN (or its absence) selected.
#[derive(Debug)]
pub enum NegotiatedProtocol {
    Http1(Channel),
    Http2(Channel),
}

impl NegotiatedProtocol {
    pub fn channel(&self) -> &Channel {
        match self {
            NegotiatedProtocol::Http1(channel) | NegotiatedProtocol::Http2(channel) => channel,
        }
    }

    pub fn into_channel(self) -> Channel {
        match self {
            NegotiatedProtocol::Http1(channel) | NegotiatedProtocol::Http2(channel) => channel,
        }
    }

    pub fn is_http2(&self) -> bool {
        matches!(self, NegotiatedProtocol::Http2(_))
    }
}
