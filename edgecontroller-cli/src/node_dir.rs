//! On-disk layout of a node's key and credentials.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use edgecontroller_auth::NodeKey;
use edgecontroller_proto::Credentials;

pub const KEY_FILE: &str = "node.key";
pub const CERT_FILE: &str = "node.crt";
pub const CA_CHAIN_FILE: &str = "ca-chain.pem";
pub const CA_POOL_FILE: &str = "ca-pool.pem";
pub const NODE_ID_FILE: &str = "node.id";

/// Directory holding a node's identity.
pub struct NodeDir {
    dir: PathBuf,
}

impl NodeDir {
    /// Open `dir`, or the default location, creating it if needed.
    pub fn open(dir: Option<PathBuf>) -> Result<Self> {
        let dir = match dir {
            Some(dir) => dir,
            None => dirs::data_local_dir()
                .context("Could not determine data directory")?
                .join("edgenode"),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        }

        Ok(Self { dir })
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Load the node key, generating one on first use.
    ///
    /// Returns the key and whether it was just created.
    pub fn load_or_generate_key(&self) -> Result<(NodeKey, bool)> {
        let key_path = self.path(KEY_FILE);
        if key_path.exists() {
            return Ok((self.load_key()?, false));
        }

        let key = NodeKey::generate().context("Failed to generate node key")?;
        write_private(&key_path, key.to_pem().as_bytes())?;
        Ok((key, true))
    }

    pub fn load_key(&self) -> Result<NodeKey> {
        let key_path = self.path(KEY_FILE);
        let pem = fs::read_to_string(&key_path).with_context(|| {
            format!(
                "Failed to read {} (run `edgenode keygen` first)",
                key_path.display()
            )
        })?;
        NodeKey::from_pem(&pem).context("Failed to parse node key")
    }

    /// Store credentials returned by the controller.
    pub fn write_credentials(&self, credentials: &Credentials) -> Result<()> {
        fs::write(self.path(CERT_FILE), &credentials.certificate)
            .context("Failed to write node certificate")?;
        fs::write(self.path(CA_CHAIN_FILE), credentials.ca_chain.concat())
            .context("Failed to write CA chain")?;
        fs::write(self.path(CA_POOL_FILE), credentials.ca_pool.concat())
            .context("Failed to write CA pool")?;
        if !credentials.id.is_empty() {
            fs::write(self.path(NODE_ID_FILE), format!("{}\n", credentials.id))
                .context("Failed to write node ID")?;
        }
        Ok(())
    }
}

fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        file.write_all(contents)?;
    }

    #[cfg(not(unix))]
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}
