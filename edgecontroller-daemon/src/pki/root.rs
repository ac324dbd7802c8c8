use std::fs;
use std::path::Path;

use ::time::{Duration, OffsetDateTime};
use edgecontroller_auth::{
    Fingerprint, VerifiedCsr, certificate_fingerprint, decode_certificate_pem,
};
use rand::RngCore;
use rand::rngs::OsRng;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, PublicKeyData, SerialNumber, SubjectPublicKeyInfo,
};
use x509_parser::prelude::*;
use zeroize::Zeroizing;

use super::storage::{CERT_FILE, KEY_FILE, create_private_dir, read_optional, write_private};
use super::{
    AuthorityService, CaCertificate, IssuedCertificate, LeafTemplate, PkiError, ServerIdentity,
};

/// Organization name on the root certificate.
pub const ROOT_ORGANIZATION: &str = "Controller Authority";

/// Lifetime of a freshly generated root.
pub const ROOT_VALIDITY: Duration = Duration::days(3 * 365);

/// Root `not_before` is moved back by this much to absorb clock skew.
const ROOT_BACKDATE: Duration = Duration::seconds(15);

/// Lifetime of the listener certificates, capped by the root.
const SERVER_CERT_VALIDITY: Duration = Duration::days(365);

/// The controller's self-signed root CA.
pub struct RootCa {
    key: KeyPair,
    cert_pem: String,
    cert_der: Vec<u8>,
    not_after: OffsetDateTime,
    leaf_validity: Duration,
}

impl RootCa {
    /// Load the root CA from `dir`, creating whatever is missing.
    ///
    /// - missing key: generate one, which also forces a new certificate
    /// - missing certificate, or one for a different key: generate a new one
    /// - unreadable key or certificate: error
    pub fn init(dir: &Path, leaf_validity: Duration) -> Result<Self, PkiError> {
        create_private_dir(dir)?;
        let key_path = dir.join(KEY_FILE);
        let cert_path = dir.join(CERT_FILE);

        let key = match read_optional(&key_path)? {
            Some(pem) => KeyPair::from_pem(&pem).map_err(|e| PkiError::InvalidKey(e.to_string()))?,
            None => {
                let key = generate_key()?;
                write_private(&key_path, Zeroizing::new(key.serialize_pem()).as_bytes())?;
                tracing::info!(path = %key_path.display(), "Generated root CA key");
                key
            }
        };

        let cert_pem = match read_optional(&cert_path)? {
            Some(pem) if key_matches_certificate(&key, &pem)? => pem,
            existing => {
                if existing.is_some() {
                    tracing::warn!(
                        path = %cert_path.display(),
                        "Root CA certificate does not match key, regenerating"
                    );
                    fs::remove_file(&cert_path)?;
                }
                let pem = build_root_certificate(&key)?;
                write_private(&cert_path, pem.as_bytes())?;
                tracing::info!(path = %cert_path.display(), "Generated root CA certificate");
                pem
            }
        };

        Self::from_parts(key, cert_pem, leaf_validity)
    }

    /// Generate an in-memory root CA.
    pub fn generate(leaf_validity: Duration) -> Result<Self, PkiError> {
        let key = generate_key()?;
        let cert_pem = build_root_certificate(&key)?;
        Self::from_parts(key, cert_pem, leaf_validity)
    }

    fn from_parts(
        key: KeyPair,
        cert_pem: String,
        leaf_validity: Duration,
    ) -> Result<Self, PkiError> {
        let cert_der = decode_certificate_pem(&cert_pem)
            .map_err(|e| PkiError::InvalidCertificate(e.to_string()))?;
        let not_after = {
            let (_, cert) = X509Certificate::from_der(&cert_der)
                .map_err(|e| PkiError::InvalidCertificate(e.to_string()))?;
            OffsetDateTime::from_unix_timestamp(cert.validity().not_after.timestamp())
                .map_err(|e| PkiError::InvalidCertificate(e.to_string()))?
        };

        Ok(Self {
            key,
            cert_pem,
            cert_der,
            not_after,
            leaf_validity,
        })
    }

    /// PEM root certificate, for out-of-band distribution to nodes.
    pub fn root_cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn root_cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    fn issuer(&self) -> Result<Issuer<'_, &KeyPair>, PkiError> {
        Issuer::from_ca_cert_pem(&self.cert_pem, &self.key)
            .map_err(|e| PkiError::InvalidCertificate(format!("failed to create issuer: {}", e)))
    }

    /// `not_after` for a certificate starting now, never past the root's.
    fn capped_not_after(
        &self,
        now: OffsetDateTime,
        validity: Duration,
    ) -> Result<OffsetDateTime, PkiError> {
        if self.not_after <= now {
            return Err(PkiError::RootExpired);
        }
        Ok(std::cmp::min(now + validity, self.not_after))
    }

    /// Issue a TLS server certificate for `server_name` with a fresh key.
    pub fn new_tls_server_cert(&self, server_name: &str) -> Result<ServerIdentity, PkiError> {
        let key = generate_key()?;

        let mut params = CertificateParams::new(vec![server_name.to_string()]).map_err(|e| {
            PkiError::CertificateGeneration(format!("invalid server name '{}': {}", server_name, e))
        })?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, server_name);
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.serial_number = Some(random_serial());

        let now = OffsetDateTime::now_utc();
        params.not_before = now - ROOT_BACKDATE;
        params.not_after = self.capped_not_after(now, SERVER_CERT_VALIDITY)?;

        let issuer = self.issuer()?;
        let cert = params.signed_by(&key, &issuer).map_err(|e| {
            PkiError::CertificateGeneration(format!("failed to sign server cert: {}", e))
        })?;

        Ok(ServerIdentity {
            cert_der: cert.der().to_vec(),
            key_der: Zeroizing::new(key.serialize_der()),
            root_der: self.cert_der.clone(),
        })
    }
}

impl AuthorityService for RootCa {
    fn sign_csr(
        &self,
        csr_der: &[u8],
        template: &LeafTemplate,
    ) -> Result<IssuedCertificate, PkiError> {
        let csr =
            VerifiedCsr::from_der(csr_der).map_err(|e| PkiError::InvalidCsr(e.to_string()))?;

        // Only the public key survives from the request.
        let public_key = SubjectPublicKeyInfo::from_der(csr.public_key_der())
            .map_err(|e| PkiError::InvalidCsr(format!("unsupported public key: {}", e)))?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, template.common_name.as_str());
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        params.serial_number = Some(random_serial());
        params.use_authority_key_identifier_extension = true;

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = self.capped_not_after(now, self.leaf_validity)?;

        let issuer = self.issuer()?;
        let cert = params.signed_by(&public_key, &issuer).map_err(|e| {
            PkiError::CertificateGeneration(format!("failed to sign certificate: {}", e))
        })?;

        Ok(IssuedCertificate {
            der: cert.der().to_vec(),
            pem: cert.pem(),
        })
    }

    fn ca_chain(&self) -> Result<Vec<CaCertificate>, PkiError> {
        Ok(vec![CaCertificate {
            der: self.cert_der.clone(),
            pem: self.cert_pem.clone(),
        }])
    }
}

fn generate_key() -> Result<KeyPair, PkiError> {
    KeyPair::generate().map_err(|e| PkiError::KeyGeneration(e.to_string()))
}

/// Random positive 128-bit serial from the OS CSPRNG.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

fn build_root_certificate(key: &KeyPair) -> Result<String, PkiError> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, ROOT_ORGANIZATION);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.serial_number = Some(random_serial());

    let now = OffsetDateTime::now_utc();
    params.not_before = now - ROOT_BACKDATE;
    params.not_after = now + ROOT_VALIDITY;

    let cert = params.self_signed(key).map_err(|e| {
        PkiError::CertificateGeneration(format!("failed to create root cert: {}", e))
    })?;
    Ok(cert.pem())
}

/// Whether the PEM certificate carries the public half of `key`.
///
/// Unparseable certificates are an error rather than a mismatch, so a
/// corrupt file is never silently replaced.
fn key_matches_certificate(key: &KeyPair, cert_pem: &str) -> Result<bool, PkiError> {
    let cert_der = decode_certificate_pem(cert_pem)
        .map_err(|e| PkiError::InvalidCertificate(e.to_string()))?;
    let cert_fp = certificate_fingerprint(&cert_der)
        .map_err(|e| PkiError::InvalidCertificate(e.to_string()))?;

    let key_fp = Fingerprint::from_spki_der(&key.subject_public_key_info());
    Ok(cert_fp == key_fp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecontroller_auth::{NodeKey, certificate_common_name};

    const LEAF_VALIDITY: Duration = Duration::days(90);

    fn parse(der: &[u8]) -> X509Certificate<'_> {
        X509Certificate::from_der(der).expect("certificate should parse").1
    }

    fn csr_der(key: &NodeKey, cn: &str) -> Vec<u8> {
        let pem = key.csr_pem(cn).unwrap();
        ::pem::parse(pem.as_bytes()).unwrap().into_contents()
    }

    #[test]
    fn test_root_is_a_constrained_ca() {
        let ca = RootCa::generate(LEAF_VALIDITY).expect("CA generation should succeed");
        let root = parse(ca.root_cert_der());

        let bc = root.basic_constraints().unwrap().expect("basic constraints present");
        assert!(bc.value.ca);
        assert_eq!(bc.value.path_len_constraint, Some(0));

        let org = root
            .subject()
            .iter_organization()
            .next()
            .and_then(|o| o.as_str().ok());
        assert_eq!(org, Some(ROOT_ORGANIZATION));

        let now = OffsetDateTime::now_utc().unix_timestamp();
        assert!(root.validity().not_before.timestamp() < now);
        let min_lifetime = Duration::days(3 * 365 - 1).whole_seconds();
        assert!(root.validity().not_after.timestamp() > now + min_lifetime);
    }

    #[test]
    fn test_ca_chain_is_the_root() {
        let ca = RootCa::generate(LEAF_VALIDITY).unwrap();
        let chain = ca.ca_chain().unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].pem, ca.root_cert_pem());
        assert_eq!(chain[0].der, ca.root_cert_der());
    }

    #[test]
    fn test_ca_can_sign_csr() {
        let ca = RootCa::generate(LEAF_VALIDITY).unwrap();
        let node = NodeKey::generate().unwrap();

        let issued = ca
            .sign_csr(&csr_der(&node, "whatever-the-node-says"), &LeafTemplate::for_node("node-1"))
            .expect("CSR signing should succeed");

        assert_eq!(certificate_common_name(&issued.der).unwrap(), "node-1");
        assert_eq!(
            certificate_fingerprint(&issued.der).unwrap(),
            node.fingerprint().unwrap()
        );

        let leaf = parse(&issued.der);
        let root = parse(ca.root_cert_der());
        leaf.verify_signature(Some(root.public_key()))
            .expect("leaf should verify against root");

        let eku = leaf.extended_key_usage().unwrap().expect("EKU present");
        assert!(eku.value.client_auth);
        assert!(eku.value.server_auth);

        let bc = leaf.basic_constraints().unwrap();
        assert!(bc.map(|bc| !bc.value.ca).unwrap_or(true));
    }

    #[test]
    fn test_sign_csr_drops_requested_extensions() {
        let ca = RootCa::generate(LEAF_VALIDITY).unwrap();
        let node = NodeKey::generate().unwrap();
        let mut params = CertificateParams::new(vec!["evil.example".to_string()]).unwrap();
        params.custom_extensions = vec![rcgen::CustomExtension::from_oid_content(
            &[1, 3, 6, 1, 4, 1, 99999, 1],
            vec![0x05, 0x00],
        )];
        let csr = params.serialize_request(node.key_pair()).unwrap();
        let der = ::pem::parse(csr.pem().unwrap().as_bytes()).unwrap().into_contents();

        let issued = ca.sign_csr(&der, &LeafTemplate::for_node("node-2")).unwrap();
        let leaf = parse(&issued.der);
        assert_eq!(certificate_common_name(&issued.der).unwrap(), "node-2");
        assert!(leaf.subject_alternative_name().unwrap().is_none());
        assert!(
            leaf.extensions()
                .iter()
                .all(|ext| ext.oid.to_id_string() != "1.3.6.1.4.1.99999.1")
        );
    }

    #[test]
    fn test_sign_csr_rejects_garbage() {
        let ca = RootCa::generate(LEAF_VALIDITY).unwrap();
        let result = ca.sign_csr(b"definitely not DER", &LeafTemplate::for_node("node-1"));
        assert!(matches!(result, Err(PkiError::InvalidCsr(_))));
    }

    #[test]
    fn test_leaf_validity_is_capped_by_root() {
        let ca = RootCa::generate(Duration::days(10 * 365)).unwrap();
        let node = NodeKey::generate().unwrap();
        let issued = ca
            .sign_csr(&csr_der(&node, "n"), &LeafTemplate::for_node("node-3"))
            .unwrap();

        let leaf = parse(&issued.der);
        assert!(leaf.validity().not_after.timestamp() <= ca.not_after().unix_timestamp());
    }

    #[test]
    fn test_leaf_validity_uses_configured_lifetime() {
        let ca = RootCa::generate(Duration::days(1)).unwrap();
        let node = NodeKey::generate().unwrap();
        let issued = ca
            .sign_csr(&csr_der(&node, "n"), &LeafTemplate::for_node("node-4"))
            .unwrap();

        let leaf = parse(&issued.der);
        let validity = leaf.validity();
        let lifetime = validity.not_after.timestamp() - validity.not_before.timestamp();
        assert!((lifetime - 86_400).abs() <= 1);
    }

    #[test]
    fn test_serials_are_positive_and_unique() {
        let ca = RootCa::generate(LEAF_VALIDITY).unwrap();
        let node = NodeKey::generate().unwrap();
        let der = csr_der(&node, "n");

        let a = ca.sign_csr(&der, &LeafTemplate::for_node("node-5")).unwrap();
        let b = ca.sign_csr(&der, &LeafTemplate::for_node("node-5")).unwrap();
        let (a, b) = (parse(&a.der), parse(&b.der));

        assert_ne!(a.raw_serial(), b.raw_serial());
        assert_eq!(a.raw_serial()[0] & 0x80, 0);
        assert_eq!(b.raw_serial()[0] & 0x80, 0);
    }

    #[test]
    fn test_server_cert_names_the_listener() {
        let ca = RootCa::generate(LEAF_VALIDITY).unwrap();
        let identity = ca
            .new_tls_server_cert(edgecontroller_auth::ENROLLMENT_SERVER_NAME)
            .expect("server cert generation should succeed");

        assert_eq!(
            certificate_common_name(&identity.cert_der).unwrap(),
            edgecontroller_auth::ENROLLMENT_SERVER_NAME
        );
        let cert = parse(&identity.cert_der);
        let root = parse(&identity.root_der);
        cert.verify_signature(Some(root.public_key())).unwrap();

        let san = cert.subject_alternative_name().unwrap().expect("SAN present");
        assert!(san.value.general_names.iter().any(|name| matches!(
            name,
            GeneralName::DNSName(dns) if *dns == edgecontroller_auth::ENROLLMENT_SERVER_NAME
        )));
    }

    #[test]
    fn test_init_creates_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let ca_dir = dir.path().join("certificates").join("ca");

        let first = RootCa::init(&ca_dir, LEAF_VALIDITY).expect("init should succeed");
        assert!(ca_dir.join(KEY_FILE).exists());
        assert!(ca_dir.join(CERT_FILE).exists());

        let second = RootCa::init(&ca_dir, LEAF_VALIDITY).expect("reload should succeed");
        assert_eq!(first.root_cert_pem(), second.root_cert_pem());
    }

    #[test]
    fn test_init_regenerates_missing_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let first = RootCa::init(dir.path(), LEAF_VALIDITY).unwrap();
        let key_before = fs::read_to_string(dir.path().join(KEY_FILE)).unwrap();

        fs::remove_file(dir.path().join(CERT_FILE)).unwrap();
        let second = RootCa::init(dir.path(), LEAF_VALIDITY).unwrap();

        assert_ne!(first.root_cert_pem(), second.root_cert_pem());
        assert_eq!(key_before, fs::read_to_string(dir.path().join(KEY_FILE)).unwrap());
        assert_eq!(
            certificate_fingerprint(first.root_cert_der()).unwrap(),
            certificate_fingerprint(second.root_cert_der()).unwrap()
        );
    }

    #[test]
    fn test_init_regenerates_certificate_for_new_key() {
        let dir = tempfile::tempdir().unwrap();
        let first = RootCa::init(dir.path(), LEAF_VALIDITY).unwrap();

        fs::remove_file(dir.path().join(KEY_FILE)).unwrap();
        let second = RootCa::init(dir.path(), LEAF_VALIDITY).unwrap();

        assert_ne!(
            certificate_fingerprint(first.root_cert_der()).unwrap(),
            certificate_fingerprint(second.root_cert_der()).unwrap()
        );
        let on_disk = fs::read_to_string(dir.path().join(CERT_FILE)).unwrap();
        assert_eq!(on_disk, second.root_cert_pem());
    }

    #[test]
    fn test_init_rejects_corrupt_key() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(KEY_FILE), "garbage").unwrap();
        assert!(matches!(
            RootCa::init(dir.path(), LEAF_VALIDITY),
            Err(PkiError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_init_rejects_corrupt_certificate() {
        let dir = tempfile::tempdir().unwrap();
        RootCa::init(dir.path(), LEAF_VALIDITY).unwrap();
        fs::write(dir.path().join(CERT_FILE), "garbage").unwrap();
        assert!(matches!(
            RootCa::init(dir.path(), LEAF_VALIDITY),
            Err(PkiError::InvalidCertificate(_))
        ));
    }
}
