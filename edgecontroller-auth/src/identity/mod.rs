//! Node identity types.
//!
//! - [`Fingerprint`] - truncated SHA-256 over a DER `SubjectPublicKeyInfo`,
//!   URL-safe base64 without padding
//! - [`NodeKey`] - the node's ECDSA P-256 key, used to build enrollment CSRs
//!
//! The fingerprint is an identifier, not a secret. Administrators copy it into
//! a pre-approval record as the node's serial.

mod fingerprint;
mod node_key;

pub use fingerprint::{FINGERPRINT_LEN, Fingerprint, IdentityError};
pub use node_key::NodeKey;
