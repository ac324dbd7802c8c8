//! Key generation and the values an administrator approves.

use anyhow::{Context, Result};
use edgecontroller_auth::Fingerprint;

use crate::node_dir::NodeDir;

/// Subject requested in CSRs; the controller replaces it with the node ID.
pub const CSR_COMMON_NAME: &str = "edgenode";

/// Create the node key if missing and return its fingerprint.
pub fn run_keygen(dir: &NodeDir) -> Result<(Fingerprint, bool)> {
    let (key, created) = dir.load_or_generate_key()?;
    let fingerprint = key.fingerprint().context("Failed to derive key fingerprint")?;
    Ok((fingerprint, created))
}

/// PEM CSR for the node key, for `edgecontroller node approve --csr`.
pub fn run_csr(dir: &NodeDir) -> Result<String> {
    let key = dir.load_key()?;
    key.csr_pem(CSR_COMMON_NAME).context("Failed to build CSR")
}
