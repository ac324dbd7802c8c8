//! Persistence for pre-approved nodes, their credentials and addresses.
//!
//! The issuance workflow only needs [`NodeStore`]; administration goes
//! through [`SqliteNodeStore`] directly.

mod models;
mod sqlite;

pub use models::{Node, NodeGrpcTarget, NodeSummary};
pub use sqlite::SqliteNodeStore;

use edgecontroller_auth::{Fingerprint, IssuedCredential};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a node with serial {0} already exists")]
    DuplicateSerial(String),
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Storage the credential workflow depends on.
#[tonic::async_trait]
pub trait NodeStore: Send + Sync {
    /// Pre-approved nodes whose serial is `serial`, oldest first.
    async fn find_nodes_by_serial(&self, serial: &Fingerprint) -> Result<Vec<Node>, StoreError>;

    /// Persist a credential and the node's gRPC address in one transaction.
    ///
    /// Both are keyed by node ID and overwrite any earlier enrollment.
    async fn record_enrollment(
        &self,
        credential: &IssuedCredential,
        grpc_target: &str,
    ) -> Result<(), StoreError>;
}
