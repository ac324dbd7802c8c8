//! TLS channels to the controller.
//!
//! The controller serves two identities on one port, selected by the server
//! name in the ClientHello. Both chain to the controller's root CA.

use anyhow::{Context, Result};
use edgecontroller_auth::{ENROLLMENT_SERVER_NAME, PRODUCTION_SERVER_NAME};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};

/// `https://` URI for a `host:port` controller address.
pub fn controller_uri(addr: &str) -> String {
    let addr = addr
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    format!("https://{}", addr)
}

async fn connect(addr: &str, tls: ClientTlsConfig) -> Result<Channel> {
    Channel::from_shared(controller_uri(addr))
        .context("Invalid controller address")?
        .tls_config(tls)
        .context("Invalid TLS configuration")?
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", addr))
}

/// Channel for a node without credentials; only `RequestCredentials` is allowed on it.
pub async fn enrollment_channel(addr: &str, root_pem: &str) -> Result<Channel> {
    let tls = ClientTlsConfig::new()
        .domain_name(ENROLLMENT_SERVER_NAME)
        .ca_certificate(Certificate::from_pem(root_pem));
    connect(addr, tls).await
}

/// Mutually authenticated channel for an enrolled node.
pub async fn production_channel(
    addr: &str,
    root_pem: &str,
    cert_pem: &str,
    key_pem: &str,
) -> Result<Channel> {
    let tls = ClientTlsConfig::new()
        .domain_name(PRODUCTION_SERVER_NAME)
        .ca_certificate(Certificate::from_pem(root_pem))
        .identity(Identity::from_pem(cert_pem, key_pem));
    connect(addr, tls).await
}
