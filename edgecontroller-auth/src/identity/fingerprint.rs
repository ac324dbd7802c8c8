use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Number of SHA-256 bytes kept in a fingerprint.
pub const FINGERPRINT_LEN: usize = 16;

/// Length of the encoded fingerprint string.
const ENCODED_LEN: usize = 22;

/// Errors from identity handling.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid fingerprint format")]
    InvalidFingerprint,

    #[error("failed to generate key: {0}")]
    KeyGeneration(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("failed to build CSR: {0}")]
    Csr(String),
}

/// Identifier of a public key.
///
/// Computed over the DER `SubjectPublicKeyInfo` only, so two CSRs for the same
/// key produce the same fingerprint whatever their subject or extensions say.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint of a DER-encoded `SubjectPublicKeyInfo`.
    pub fn from_spki_der(spki_der: &[u8]) -> Self {
        let digest = Sha256::digest(spki_der);
        Self(URL_SAFE_NO_PAD.encode(&digest[..FINGERPRINT_LEN]))
    }

    /// Parse a fingerprint string, e.g. one typed in by an administrator.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        let s = s.trim();
        if s.len() != ENCODED_LEN {
            return Err(IdentityError::InvalidFingerprint);
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| IdentityError::InvalidFingerprint)?;
        if bytes.len() != FINGERPRINT_LEN {
            return Err(IdentityError::InvalidFingerprint);
        }

        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}
