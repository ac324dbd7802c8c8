//! X.509 certificate helpers shared by the controller and the node tool.
//!
//! # Security
//!
//! - Input is limited to 16KB to prevent DoS
//! - The x509_parser library handles ASN.1 parsing safely

use thiserror::Error;
use x509_parser::prelude::*;

use crate::identity::Fingerprint;

/// Maximum certificate size (16KB is generous for a single cert)
pub const MAX_CERT_SIZE: usize = 16 * 1024;

/// Errors that can occur during certificate parsing.
#[derive(Debug, Error)]
pub enum CertError {
    #[error("certificate too large: {0} bytes (max {MAX_CERT_SIZE})")]
    TooLarge(usize),

    #[error("failed to decode certificate PEM: {0}")]
    Pem(String),

    #[error("failed to parse X.509 certificate: {0}")]
    ParseError(String),

    #[error("certificate has no common name")]
    MissingCommonName,
}

fn parse(cert_der: &[u8]) -> Result<X509Certificate<'_>, CertError> {
    if cert_der.len() > MAX_CERT_SIZE {
        return Err(CertError::TooLarge(cert_der.len()));
    }

    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CertError::ParseError(format!("{:?}", e)))?;
    Ok(cert)
}

/// Decode a single PEM `CERTIFICATE` block to DER.
pub fn decode_certificate_pem(pem: &str) -> Result<Vec<u8>, CertError> {
    let block = ::pem::parse(pem.as_bytes()).map_err(|e| CertError::Pem(e.to_string()))?;
    if block.tag() != "CERTIFICATE" {
        return Err(CertError::Pem(format!(
            "expected CERTIFICATE block, got {}",
            block.tag()
        )));
    }
    Ok(block.into_contents())
}

/// First Common Name of the certificate subject.
pub fn certificate_common_name(cert_der: &[u8]) -> Result<String, CertError> {
    let cert = parse(cert_der)?;
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    cn.ok_or(CertError::MissingCommonName)
}

/// Fingerprint of the certificate's `SubjectPublicKeyInfo`.
pub fn certificate_fingerprint(cert_der: &[u8]) -> Result<Fingerprint, CertError> {
    let cert = parse(cert_der)?;
    Ok(Fingerprint::from_spki_der(cert.public_key().raw))
}
