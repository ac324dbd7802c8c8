//! rustls server configurations for the two listener identities.

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};

use crate::pki::ServerIdentity;

/// TLS server configuration wrapper.
pub struct TlsServerConfig {
    pub config: Arc<ServerConfig>,
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn certified_key(
    identity: &ServerIdentity,
) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let cert = CertificateDer::from(identity.cert_der.clone());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.key_der.to_vec()));
    (vec![cert], key)
}

impl TlsServerConfig {
    /// Get the underlying rustls ServerConfig.
    pub fn into_rustls_config(self) -> Arc<ServerConfig> {
        self.config
    }

    /// Config for enrolled nodes: a client certificate chaining to one of
    /// `client_roots` (DER) is required.
    pub fn new_mtls(
        identity: &ServerIdentity,
        client_roots: &[Vec<u8>],
    ) -> Result<Self, TlsConfigError> {
        let mut root_store = RootCertStore::empty();
        for der in client_roots {
            root_store
                .add(CertificateDer::from(der.clone()))
                .map_err(|e| TlsConfigError::InvalidCert(e.to_string()))?;
        }
        if root_store.is_empty() {
            return Err(TlsConfigError::NoClientRoots);
        }

        let client_verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(root_store), provider())
                .build()
                .map_err(|e| TlsConfigError::Verifier(e.to_string()))?;

        let (chain, key) = certified_key(identity);
        let mut config = ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(rustls::DEFAULT_VERSIONS)
            .map_err(|e| TlsConfigError::Config(e.to_string()))?
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(chain, key)
            .map_err(|e| TlsConfigError::Config(e.to_string()))?;
        config.alpn_protocols = vec![b"h2".to_vec()];

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Config for enrolling nodes, which have no certificate yet.
    pub fn new_server_only(identity: &ServerIdentity) -> Result<Self, TlsConfigError> {
        let (chain, key) = certified_key(identity);
        let mut config = ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(rustls::DEFAULT_VERSIONS)
            .map_err(|e| TlsConfigError::Config(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| TlsConfigError::Config(e.to_string()))?;
        config.alpn_protocols = vec![b"h2".to_vec()];

        Ok(Self {
            config: Arc::new(config),
        })
    }
}

/// Errors that can occur during TLS configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("invalid certificate: {0}")]
    InvalidCert(String),
    #[error("no client trust anchors configured")]
    NoClientRoots,
    #[error("failed to build verifier: {0}")]
    Verifier(String),
    #[error("failed to build config: {0}")]
    Config(String),
}
