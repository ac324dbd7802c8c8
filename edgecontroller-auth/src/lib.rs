//! Node identity and enrollment policy for the edge controller.
//!
//! This crate is IO-free:
//! - No filesystem operations
//! - No network calls
//! - No database interactions
//! - No logging
//!
//! The controller daemon and the node tool both build on it:
//! - [`identity::Fingerprint`] - stable node identifier derived from a public key
//! - [`csr::VerifiedCsr`] - a CSR whose proof of possession has been checked
//! - [`gate::TrustGate`] - which RPCs each TLS server name may reach
//! - [`credentials::IssuedCredential`] - the node certificate as persisted
//!
//! # Example
//!
//! ```
//! use edgecontroller_auth::{NodeKey, VerifiedCsr};
//!
//! let key = NodeKey::generate().unwrap();
//! let csr = VerifiedCsr::from_pem(&key.csr_pem("edge-node").unwrap()).unwrap();
//! assert_eq!(csr.fingerprint(), &key.fingerprint().unwrap());
//! ```

pub mod cert;
pub mod credentials;
pub mod csr;
pub mod gate;
pub mod identity;

pub use cert::{
    CertError, certificate_common_name, certificate_fingerprint, decode_certificate_pem,
};
pub use credentials::{CredentialError, IssuedCredential};
pub use csr::{CsrError, VerifiedCsr};
pub use gate::{
    ChannelIdentity, ENROLLMENT_SERVER_NAME, GateError, PRODUCTION_SERVER_NAME,
    REQUEST_CREDENTIALS_METHOD, ServerNames, TrustGate,
};
pub use identity::{Fingerprint, IdentityError, NodeKey};
