//! Certificate authority for node credentials.
//!
//! The controller holds a single self-signed root. Nodes generate their own
//! keys and send CSRs; the root signs them with the subject forced to the
//! node ID. The private key never leaves the controller's data directory.

mod root;
mod storage;

pub use root::{RootCa, ROOT_ORGANIZATION, ROOT_VALIDITY};
pub use storage::{CERT_FILE, KEY_FILE};

use thiserror::Error;
use zeroize::Zeroizing;

/// Errors from CA operations.
#[derive(Debug, Error)]
pub enum PkiError {
    #[error("invalid CSR: {0}")]
    InvalidCsr(String),

    #[error("invalid CA private key: {0}")]
    InvalidKey(String),

    #[error("invalid CA certificate: {0}")]
    InvalidCertificate(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("certificate generation failed: {0}")]
    CertificateGeneration(String),

    #[error("root certificate has expired")]
    RootExpired,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Caller-controlled fields of a leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafTemplate {
    /// Subject Common Name; the node ID.
    pub common_name: String,
}

impl LeafTemplate {
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            common_name: node_id.into(),
        }
    }
}

/// A certificate signed for a node.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub der: Vec<u8>,
    pub pem: String,
}

/// A certificate in the issuing chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaCertificate {
    pub der: Vec<u8>,
    pub pem: String,
}

/// TLS identity for one of the controller's listener names.
pub struct ServerIdentity {
    /// Server certificate (DER)
    pub cert_der: Vec<u8>,
    /// Server private key (PKCS#8 DER)
    pub key_der: Zeroizing<Vec<u8>>,
    /// Root certificate the server certificate chains to (DER)
    pub root_der: Vec<u8>,
}

/// Signs node CSRs and exposes the issuing chain.
///
/// Implementations must be safe to call from concurrent RPCs.
pub trait AuthorityService: Send + Sync {
    /// Sign a DER CSR using `template` for every identity field.
    ///
    /// The CSR is re-verified; nothing from its subject or extensions is kept.
    fn sign_csr(
        &self,
        csr_der: &[u8],
        template: &LeafTemplate,
    ) -> Result<IssuedCertificate, PkiError>;

    /// Issuing chain, issuer first and root last.
    fn ca_chain(&self) -> Result<Vec<CaCertificate>, PkiError>;
}
