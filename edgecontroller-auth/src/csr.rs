//! Certificate signing request parsing and proof of possession.
//!
//! # Security
//!
//! - Input is limited to 16KB to prevent DoS
//! - The subject of a CSR is carried along but never trusted; the controller
//!   decides the certificate's identity from the pre-approval record

use thiserror::Error;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;

use crate::identity::Fingerprint;

/// Maximum accepted CSR size, PEM or DER.
pub const MAX_CSR_SIZE: usize = 16 * 1024;

/// PEM label of a PKCS#10 request.
pub const CSR_PEM_TAG: &str = "CERTIFICATE REQUEST";

/// Errors from CSR validation.
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("CSR cannot be empty")]
    Empty,

    #[error("CSR too large: {0} bytes (max {MAX_CSR_SIZE})")]
    TooLarge(usize),

    #[error("unable to decode CSR: {0}")]
    Pem(String),

    #[error("unable to parse CSR: {0}")]
    Parse(String),

    #[error("CSR signature does not verify")]
    BadSignature,
}

/// A CSR whose self-signature has been verified against its own public key.
#[derive(Debug, Clone)]
pub struct VerifiedCsr {
    der: Vec<u8>,
    spki_der: Vec<u8>,
    fingerprint: Fingerprint,
    claimed_common_name: Option<String>,
}

impl VerifiedCsr {
    /// Decode, parse and verify a PEM CSR.
    ///
    /// Checks run in a fixed order: empty, PEM block, ASN.1, signature.
    pub fn from_pem(pem: &str) -> Result<Self, CsrError> {
        if pem.is_empty() {
            return Err(CsrError::Empty);
        }
        if pem.len() > MAX_CSR_SIZE {
            return Err(CsrError::TooLarge(pem.len()));
        }

        let block = ::pem::parse(pem.as_bytes()).map_err(|e| CsrError::Pem(e.to_string()))?;
        if block.tag() != CSR_PEM_TAG {
            return Err(CsrError::Pem(format!(
                "expected {CSR_PEM_TAG} block, got {}",
                block.tag()
            )));
        }

        Self::from_der(block.contents())
    }

    /// Parse and verify a DER CSR.
    pub fn from_der(der: &[u8]) -> Result<Self, CsrError> {
        if der.is_empty() {
            return Err(CsrError::Empty);
        }
        if der.len() > MAX_CSR_SIZE {
            return Err(CsrError::TooLarge(der.len()));
        }

        let (rest, csr) =
            X509CertificationRequest::from_der(der).map_err(|e| CsrError::Parse(e.to_string()))?;
        if !rest.is_empty() {
            return Err(CsrError::Parse("trailing data after CSR".to_string()));
        }

        csr.verify_signature().map_err(|_| CsrError::BadSignature)?;

        let info = &csr.certification_request_info;
        let fingerprint = Fingerprint::from_spki_der(info.subject_pki.raw);
        let claimed_common_name = info
            .subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        Ok(Self {
            der: der.to_vec(),
            spki_der: info.subject_pki.raw.to_vec(),
            fingerprint,
            claimed_common_name,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// DER SubjectPublicKeyInfo of the requested key.
    pub fn public_key_der(&self) -> &[u8] {
        &self.spki_der
    }

    /// Fingerprint of the requested public key.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// The CN the requester put in the subject. Informational only.
    pub fn claimed_common_name(&self) -> Option<&str> {
        self.claimed_common_name.as_deref()
    }
}
