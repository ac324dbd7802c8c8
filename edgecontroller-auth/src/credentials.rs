//! Issued node credentials.

use thiserror::Error;

use crate::cert::{CertError, certificate_common_name, decode_certificate_pem};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential id cannot be empty")]
    MissingId,

    #[error("credential certificate cannot be empty")]
    MissingCertificate,

    #[error("invalid certificate: {0}")]
    Certificate(#[from] CertError),

    #[error("certificate common name {found:?} does not match credential id {id:?}")]
    CommonNameMismatch { id: String, found: String },
}

/// A certificate issued to a node, keyed by node ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    /// Node ID; also the certificate's Common Name.
    pub id: String,
    /// PEM certificate.
    pub certificate: String,
}

impl IssuedCredential {
    pub fn new(id: impl Into<String>, certificate: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            certificate: certificate.into(),
        }
    }

    /// Check the credential is complete and self-consistent.
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.id.is_empty() {
            return Err(CredentialError::MissingId);
        }
        if self.certificate.is_empty() {
            return Err(CredentialError::MissingCertificate);
        }

        let der = decode_certificate_pem(&self.certificate)?;
        let cn = certificate_common_name(&der)?;
        if cn != self.id {
            return Err(CredentialError::CommonNameMismatch {
                id: self.id.clone(),
                found: cn,
            });
        }
        Ok(())
    }
}
