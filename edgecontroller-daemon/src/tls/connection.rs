//! Accepted TLS stream that tonic can serve.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use edgecontroller_auth::certificate_common_name;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tonic::transport::server::Connected;

use super::NodeConnectInfo;

/// Wrapper around TlsStream that implements tonic's Connected trait.
pub struct TlsConnection {
    inner: TlsStream<TcpStream>,
    info: NodeConnectInfo,
}

impl TlsConnection {
    pub fn new(tls_stream: TlsStream<TcpStream>, remote_addr: Option<SocketAddr>) -> Self {
        let (_, session) = tls_stream.get_ref();
        let server_name = session.server_name().map(str::to_string);
        let peer_node_id = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .and_then(|cert| certificate_common_name(cert.as_ref()).ok());

        Self {
            inner: tls_stream,
            info: NodeConnectInfo::new(remote_addr, server_name, peer_node_id),
        }
    }
}

impl Connected for TlsConnection {
    type ConnectInfo = NodeConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.info.clone()
    }
}

impl AsyncRead for TlsConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
