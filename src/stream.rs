use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsStream;

#[cfg(feature = "feature-native-tls")]
use tokio_native_tls::TlsStream as NativeTlsStream;

/// Unifies a plain TCP connection and a TLS-wrapped one behind a single
/// type, so the rest of the crate (handshake, read/write loops) doesn't
/// need to be generic over the transport.
pub enum SocketFlowStream {
    Plain(TcpStream),
    Secure(TlsStream<TcpStream>),
    #[cfg(feature = "feature-native-tls")]
    SecureNative(NativeTlsStream<TcpStream>),
}

impl SocketFlowStream {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            SocketFlowStream::Plain(stream) => stream.peer_addr(),
            SocketFlowStream::Secure(stream) => stream.get_ref().0.peer_addr(),
            #[cfg(feature = "feature-native-tls")]
            SocketFlowStream::SecureNative(stream) => stream.get_ref().get_ref().peer_addr(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            SocketFlowStream::Plain(stream) => stream.local_addr(),
            SocketFlowStream::Secure(stream) => stream.get_ref().0.local_addr(),
            #[cfg(feature = "feature-native-tls")]
            SocketFlowStream::SecureNative(stream) => stream.get_ref().get_ref().local_addr(),
        }
    }

    /// The raw TCP stream underneath, for applying socket options (keepalive,
    /// `SO_REUSEADDR`) regardless of whether TLS is in play.
    pub fn tcp_stream(&self) -> &TcpStream {
        match self {
            SocketFlowStream::Plain(stream) => stream,
            SocketFlowStream::Secure(stream) => &stream.get_ref().0,
            #[cfg(feature = "feature-native-tls")]
            SocketFlowStream::SecureNative(stream) => stream.get_ref().get_ref(),
        }
    }
}

impl AsyncRead for SocketFlowStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            SocketFlowStream::Secure(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "feature-native-tls")]
            SocketFlowStream::SecureNative(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketFlowStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            SocketFlowStream::Secure(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "feature-native-tls")]
            SocketFlowStream::SecureNative(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            SocketFlowStream::Secure(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "feature-native-tls")]
            SocketFlowStream::SecureNative(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            SocketFlowStream::Secure(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "feature-native-tls")]
            SocketFlowStream::SecureNative(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
