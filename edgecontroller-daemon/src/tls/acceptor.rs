//! TLS acceptor that picks its configuration from the ClientHello.

use std::io;
use std::sync::Arc;

use edgecontroller_auth::{ChannelIdentity, GateError, ServerNames};
use rustls::ServerConfig;
use rustls::server::Acceptor;
use tokio::net::TcpStream;
use tokio_rustls::LazyConfigAcceptor;
use tokio_rustls::server::TlsStream;

/// Accepts TLS connections for both listener identities on one socket.
///
/// Unknown or missing server names are refused before any certificate is sent.
#[derive(Clone)]
pub struct SniAcceptor {
    production: Arc<ServerConfig>,
    enrollment: Arc<ServerConfig>,
    names: ServerNames,
}

impl SniAcceptor {
    pub fn new(
        production: Arc<ServerConfig>,
        enrollment: Arc<ServerConfig>,
        names: ServerNames,
    ) -> Self {
        Self {
            production,
            enrollment,
            names,
        }
    }

    /// Configuration for a ClientHello carrying `server_name`.
    pub fn config_for(&self, server_name: Option<&str>) -> Result<Arc<ServerConfig>, GateError> {
        match ChannelIdentity::from_server_name(server_name, &self.names)? {
            ChannelIdentity::Production => Ok(Arc::clone(&self.production)),
            ChannelIdentity::Enrollment => Ok(Arc::clone(&self.enrollment)),
        }
    }

    /// Run the TLS handshake on `stream`.
    pub async fn accept(&self, stream: TcpStream) -> io::Result<TlsStream<TcpStream>> {
        let start = LazyConfigAcceptor::new(Acceptor::default(), stream).await?;
        let config = self
            .config_for(start.client_hello().server_name())
            .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e))?;
        start.into_stream(config).await
    }
}
