//! Test harnesses for the credential workflow.
//!
//! The workflow runs against a real root CA and an in-memory SQLite store,
//! wrapped so tests can count and fail individual store calls.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use edgecontroller_auth::{Fingerprint, IssuedCredential, NodeKey};
use edgecontroller_daemon::pki::{
    AuthorityService, CaCertificate, IssuedCertificate, LeafTemplate, PkiError, RootCa,
};
use edgecontroller_daemon::proxy::{NodeConnected, ProxyError, ProxyNotifier, ProxyRegistrar};
use edgecontroller_daemon::services::CredentialIssuer;
use edgecontroller_daemon::store::{Node, NodeStore, SqliteNodeStore, StoreError};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::broadcast;

/// Port nodes serve their own gRPC API on, as configured in tests.
pub const NODE_GRPC_PORT: u16 = 8081;

/// Address a test node appears to connect from.
pub fn node_peer() -> SocketAddr {
    "192.0.2.10:53012".parse().expect("valid address")
}

pub async fn memory_store() -> SqliteNodeStore {
    // A single connection, so every query sees the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    SqliteNodeStore::new(pool)
        .await
        .expect("Failed to create tables")
}

// ============================================================================
// Collaborator doubles
// ============================================================================

/// Store wrapper that counts calls and can be told to fail.
pub struct CountingStore {
    pub inner: SqliteNodeStore,
    pub lookups: AtomicUsize,
    pub writes: AtomicUsize,
    pub fail_lookups: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl CountingStore {
    pub fn new(inner: SqliteNodeStore) -> Self {
        Self {
            inner,
            lookups: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            fail_lookups: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[tonic::async_trait]
impl NodeStore for CountingStore {
    async fn find_nodes_by_serial(&self, serial: &Fingerprint) -> Result<Vec<Node>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        self.inner.find_nodes_by_serial(serial).await
    }

    async fn record_enrollment(
        &self,
        credential: &IssuedCredential,
        grpc_target: &str,
    ) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        self.inner.record_enrollment(credential, grpc_target).await
    }
}

/// Authority that signs normally but reports an empty chain.
pub struct EmptyChainAuthority(pub Arc<RootCa>);

impl AuthorityService for EmptyChainAuthority {
    fn sign_csr(
        &self,
        csr_der: &[u8],
        template: &LeafTemplate,
    ) -> Result<IssuedCertificate, PkiError> {
        self.0.sign_csr(csr_der, template)
    }

    fn ca_chain(&self) -> Result<Vec<CaCertificate>, PkiError> {
        Ok(Vec::new())
    }
}

/// Notifier that always fails.
pub struct FailingNotifier;

impl ProxyNotifier for FailingNotifier {
    fn node_connected(&self, _event: NodeConnected) -> Result<(), ProxyError> {
        Err(ProxyError::NoSubscribers)
    }
}

// ============================================================================
// Test controller
// ============================================================================

/// A controller's workflow wired to test collaborators.
pub struct TestController {
    pub ca: Arc<RootCa>,
    pub store: Arc<CountingStore>,
    pub registrar: ProxyRegistrar,
    pub events: broadcast::Receiver<NodeConnected>,
}

impl TestController {
    pub async fn new() -> Self {
        let ca = Arc::new(
            RootCa::generate(time::Duration::days(90)).expect("CA generation should succeed"),
        );
        let store = Arc::new(CountingStore::new(memory_store().await));
        let registrar = ProxyRegistrar::default();
        let events = registrar.subscribe();

        Self {
            ca,
            store,
            registrar,
            events,
        }
    }

    /// Issuer using the real root CA.
    pub fn issuer(&self) -> CredentialIssuer {
        self.issuer_with(self.ca.clone(), Arc::new(self.registrar.clone()))
    }

    pub fn issuer_with(
        &self,
        authority: Arc<dyn AuthorityService>,
        notifier: Arc<dyn ProxyNotifier>,
    ) -> CredentialIssuer {
        CredentialIssuer::new(self.store.clone(), authority, notifier, NODE_GRPC_PORT)
    }

    /// Pre-approve `key` and return the node record.
    pub async fn approve(&self, name: &str, key: &NodeKey) -> Node {
        let serial = key.fingerprint().expect("fingerprint should derive");
        self.store
            .inner
            .create_node(name, "test-lab", &serial)
            .await
            .expect("node should be created")
    }
}

/// A node's key and the CSR it sends.
pub struct TestNode {
    pub key: NodeKey,
}

impl TestNode {
    pub fn new() -> Self {
        Self {
            key: NodeKey::generate().expect("key generation should succeed"),
        }
    }

    pub fn csr_pem(&self) -> String {
        self.key.csr_pem("edge-node").expect("CSR should build")
    }
}
