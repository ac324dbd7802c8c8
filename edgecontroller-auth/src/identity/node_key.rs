use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PublicKeyData};
use zeroize::Zeroizing;

use super::{Fingerprint, IdentityError};

/// The node's private key.
///
/// No `Debug` implementation, so the key cannot end up in logs by accident.
pub struct NodeKey {
    key_pair: KeyPair,
}

impl NodeKey {
    /// Generate a fresh ECDSA P-256 key.
    pub fn generate() -> Result<Self, IdentityError> {
        let key_pair =
            KeyPair::generate().map_err(|e| IdentityError::KeyGeneration(e.to_string()))?;
        Ok(Self { key_pair })
    }

    /// Load a key from PKCS#8 PEM.
    pub fn from_pem(pem: &str) -> Result<Self, IdentityError> {
        let key_pair =
            KeyPair::from_pem(pem).map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        Ok(Self { key_pair })
    }

    /// PKCS#8 PEM encoding, wiped from memory on drop.
    pub fn to_pem(&self) -> Zeroizing<String> {
        Zeroizing::new(self.key_pair.serialize_pem())
    }

    /// Build a PEM CSR for this key.
    ///
    /// The controller ignores the subject; `common_name` is informational.
    pub fn csr_pem(&self, common_name: &str) -> Result<String, IdentityError> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;

        let csr = params
            .serialize_request(&self.key_pair)
            .map_err(|e| IdentityError::Csr(e.to_string()))?;
        csr.pem().map_err(|e| IdentityError::Csr(e.to_string()))
    }

    /// The fingerprint the controller will compute for this key.
    pub fn fingerprint(&self) -> Result<Fingerprint, IdentityError> {
        Ok(Fingerprint::from_spki_der(&self.key_pair.subject_public_key_info()))
    }

    /// Access the underlying key pair, e.g. to sign test certificates.
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }
}
