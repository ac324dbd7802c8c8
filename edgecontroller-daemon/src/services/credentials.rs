//! Credential issuance: the `openness.auth.AuthService` implementation.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use edgecontroller_auth::{IssuedCredential, VerifiedCsr};
use edgecontroller_proto::auth_service_server::AuthService;
use edgecontroller_proto::{Credentials, Identity};
use thiserror::Error;
use tonic::{Code, Request, Response, Status};

use crate::pki::{AuthorityService, LeafTemplate};
use crate::proxy::{NodeConnected, ProxyNotifier};
use crate::store::NodeStore;
use crate::tls::NodeConnectInfo;

/// Why a credential request failed.
///
/// Messages are safe to return to the caller; details stay in the logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IssueError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    FailedPrecondition(String),
    #[error("{0}")]
    Internal(String),
}

impl IssueError {
    pub fn code(&self) -> Code {
        match self {
            IssueError::InvalidArgument(_) => Code::InvalidArgument,
            IssueError::Unauthenticated(_) => Code::Unauthenticated,
            IssueError::FailedPrecondition(_) => Code::FailedPrecondition,
            IssueError::Internal(_) => Code::Internal,
        }
    }
}

impl From<IssueError> for Status {
    fn from(err: IssueError) -> Self {
        Status::new(err.code(), err.to_string())
    }
}

/// Address the controller will dial to reach the node's own gRPC server.
fn node_grpc_target(peer: Option<SocketAddr>, port: u16) -> Result<String, IssueError> {
    let peer = peer.ok_or_else(|| {
        IssueError::FailedPrecondition("missing peer address".to_string())
    })?;
    let ip: IpAddr = peer.ip().to_canonical();
    if ip.is_unspecified() {
        return Err(IssueError::InvalidArgument(format!(
            "bad remote address in peer data: {}",
            peer
        )));
    }
    Ok(SocketAddr::new(ip, port).to_string())
}

/// Turns a CSR from a pre-approved key into node credentials.
#[derive(Clone)]
pub struct CredentialIssuer {
    store: Arc<dyn NodeStore>,
    authority: Arc<dyn AuthorityService>,
    notifier: Arc<dyn ProxyNotifier>,
    node_grpc_port: u16,
}

impl CredentialIssuer {
    pub fn new(
        store: Arc<dyn NodeStore>,
        authority: Arc<dyn AuthorityService>,
        notifier: Arc<dyn ProxyNotifier>,
        node_grpc_port: u16,
    ) -> Self {
        Self {
            store,
            authority,
            notifier,
            node_grpc_port,
        }
    }

    /// Validate `csr_pem`, sign it for the approved node and record the enrollment.
    ///
    /// Nothing touches the store until the CSR's signature has verified, and
    /// nothing is written unless the whole response can be built.
    pub async fn issue(
        &self,
        csr_pem: &str,
        peer: Option<SocketAddr>,
    ) -> Result<Credentials, IssueError> {
        let csr = VerifiedCsr::from_pem(csr_pem)
            .map_err(|e| IssueError::InvalidArgument(e.to_string()))?;
        let fingerprint = csr.fingerprint();

        tracing::info!(
            fingerprint = %fingerprint,
            claimed_cn = ?csr.claimed_common_name(),
            peer = ?peer,
            "Credential request"
        );

        let node = match self.store.find_nodes_by_serial(fingerprint).await {
            Ok(nodes) => nodes.into_iter().next(),
            Err(e) => {
                tracing::error!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "Node approval lookup failed"
                );
                None
            }
        };
        let Some(node) = node else {
            tracing::warn!(fingerprint = %fingerprint, "Credential request from unapproved key");
            return Err(IssueError::Unauthenticated("node not approved".to_string()));
        };

        let issued = self
            .authority
            .sign_csr(csr.der(), &LeafTemplate::for_node(&node.id))
            .map_err(|e| {
                tracing::error!(node_id = %node.id, error = %e, "Failed to sign CSR");
                IssueError::Internal("unable to sign CSR".to_string())
            })?;

        let chain = self.authority.ca_chain().map_err(|e| {
            tracing::error!(error = %e, "Failed to get CA chain");
            IssueError::Internal("unable to get CA chain".to_string())
        })?;
        let Some(root) = chain.last() else {
            tracing::error!("Failed to get CA chain: CA chain is empty");
            return Err(IssueError::Internal("CA chain is empty".to_string()));
        };
        let ca_pool = vec![root.pem.clone()];
        let ca_chain: Vec<String> = chain.iter().map(|c| c.pem.clone()).collect();

        let credential = IssuedCredential::new(&node.id, issued.pem);
        credential.validate().map_err(|e| {
            tracing::error!(node_id = %node.id, error = %e, "Issued credential is inconsistent");
            IssueError::Internal("unable to sign CSR".to_string())
        })?;

        let grpc_target = node_grpc_target(peer, self.node_grpc_port)?;

        self.store
            .record_enrollment(&credential, &grpc_target)
            .await
            .map_err(|e| {
                tracing::error!(node_id = %node.id, error = %e, "Failed to store node credentials");
                IssueError::Internal("unable to store credentials".to_string())
            })?;

        let event = NodeConnected {
            node_id: node.id.clone(),
            grpc_target: grpc_target.clone(),
        };
        if let Err(e) = self.notifier.node_connected(event) {
            tracing::warn!(node_id = %node.id, error = %e, "Failed to register node with proxy");
        }

        tracing::info!(
            node_id = %node.id,
            fingerprint = %fingerprint,
            grpc_target = %grpc_target,
            "Node enrolled"
        );

        Ok(Credentials {
            id: node.id,
            certificate: credential.certificate,
            ca_chain,
            ca_pool,
        })
    }
}

/// gRPC front end for [`CredentialIssuer`].
#[derive(Clone)]
pub struct AuthServiceImpl {
    issuer: CredentialIssuer,
}

impl AuthServiceImpl {
    pub fn new(issuer: CredentialIssuer) -> Self {
        Self { issuer }
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn request_credentials(
        &self,
        request: Request<Identity>,
    ) -> Result<Response<Credentials>, Status> {
        let peer = request
            .extensions()
            .get::<NodeConnectInfo>()
            .and_then(|info| info.remote_addr)
            .or_else(|| request.remote_addr());
        let identity = request.into_inner();

        let credentials = self.issuer.issue(&identity.csr, peer).await?;
        Ok(Response::new(credentials))
    }
}
