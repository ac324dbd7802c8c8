/// Administrator-created pre-approval record.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub location: String,
    /// Fingerprint of the key the node will enroll with.
    pub serial: String,
}

/// Where the controller reaches a node's own gRPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct NodeGrpcTarget {
    pub id: String,
    pub node_id: String,
    pub grpc_target: String,
}

/// A node together with its last recorded address, for listings.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct NodeSummary {
    pub id: String,
    pub name: String,
    pub location: String,
    pub serial: String,
    pub grpc_target: Option<String>,
    pub enrolled_at: Option<i64>,
}
