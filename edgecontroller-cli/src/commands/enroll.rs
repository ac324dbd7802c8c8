//! Enrollment command for obtaining node credentials.
//!
//! Implements the node side of the enrollment flow:
//! 1. Load the node key (created by `edgenode keygen`)
//! 2. Send a CSR over the enrollment server name, trusting the given root
//! 3. Store the certificate and CA bundles
//! 4. Reconnect with the production server name to confirm the credentials

use anyhow::{Context, Result, bail};
use edgecontroller_proto::auth_service_client::AuthServiceClient;
use edgecontroller_proto::{Credentials, Identity};
use tonic_reflection::pb::v1::ServerReflectionRequest;
use tonic_reflection::pb::v1::server_reflection_client::ServerReflectionClient;
use tonic_reflection::pb::v1::server_reflection_request::MessageRequest;
use tonic_reflection::pb::v1::server_reflection_response::MessageResponse;

use super::keygen::CSR_COMMON_NAME;
use crate::node_dir::NodeDir;
use crate::tls::{enrollment_channel, production_channel};

/// Outcome of a successful enrollment.
#[derive(Debug)]
pub struct EnrollmentResult {
    pub node_id: String,
    /// Services the controller lists over the production channel.
    pub services: Vec<String>,
}

/// Run the enrollment flow against `controller`.
///
/// # Arguments
/// * `controller` - `host:port` of the controller's gRPC endpoint
/// * `root_pem` - controller root certificate, distributed out of band
pub async fn run_enrollment(
    dir: &NodeDir,
    controller: &str,
    root_pem: &str,
) -> Result<EnrollmentResult> {
    let key = dir.load_key()?;
    let fingerprint = key.fingerprint().context("Failed to derive key fingerprint")?;
    let csr = key.csr_pem(CSR_COMMON_NAME).context("Failed to build CSR")?;

    tracing::info!(fingerprint = %fingerprint, controller, "Requesting credentials");

    let channel = enrollment_channel(controller, root_pem).await?;
    let credentials = AuthServiceClient::new(channel)
        .request_credentials(Identity { csr })
        .await
        .context("Credential request failed")?
        .into_inner();

    if credentials.certificate.is_empty() || credentials.ca_pool.is_empty() {
        bail!("Controller returned incomplete credentials");
    }
    dir.write_credentials(&credentials)?;
    tracing::info!(node_id = %credentials.id, "Credentials stored");

    let services = confirm_credentials(controller, &credentials, key.to_pem().as_str())
        .await
        .context("Issued credentials were not accepted")?;

    Ok(EnrollmentResult {
        node_id: credentials.id,
        services,
    })
}

/// List the controller's services over a mutually authenticated channel.
async fn confirm_credentials(
    controller: &str,
    credentials: &Credentials,
    key_pem: &str,
) -> Result<Vec<String>> {
    let channel = production_channel(
        controller,
        &credentials.ca_pool.concat(),
        &credentials.certificate,
        key_pem,
    )
    .await?;

    let request = ServerReflectionRequest {
        host: String::new(),
        message_request: Some(MessageRequest::ListServices(String::new())),
    };
    let mut responses = ServerReflectionClient::new(channel)
        .server_reflection_info(tokio_stream::iter([request]))
        .await
        .context("Reflection request failed")?
        .into_inner();

    let response = responses
        .message()
        .await
        .context("Reflection stream failed")?
        .context("Controller closed the reflection stream")?;

    match response.message_response {
        Some(MessageResponse::ListServicesResponse(list)) => {
            Ok(list.service.into_iter().map(|s| s.name).collect())
        }
        Some(MessageResponse::ErrorResponse(e)) => {
            bail!("Reflection error: {}", e.error_message)
        }
        _ => bail!("Unexpected reflection response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use edgecontroller_auth::{ServerNames, TrustGate};
    use edgecontroller_daemon::pki::RootCa;
    use edgecontroller_daemon::proxy::ProxyRegistrar;
    use edgecontroller_daemon::services::{
        AuthServiceImpl, CredentialIssuer, EnrollmentRateLimiter,
    };
    use edgecontroller_daemon::store::SqliteNodeStore;
    use edgecontroller_daemon::{ControllerServer, build_acceptor};
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio::sync::broadcast;

    use crate::commands::run_keygen;
    use crate::node_dir::{CA_POOL_FILE, CERT_FILE};

    struct Controller {
        addr: String,
        root_pem: String,
        store: SqliteNodeStore,
        _shutdown: broadcast::Sender<()>,
    }

    async fn start_controller() -> Controller {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteNodeStore::new(pool).await.unwrap();
        let ca = Arc::new(RootCa::generate(time::Duration::days(90)).unwrap());
        let names = ServerNames::default();

        let issuer = CredentialIssuer::new(
            Arc::new(store.clone()),
            ca.clone(),
            Arc::new(ProxyRegistrar::default()),
            8081,
        );
        let server = ControllerServer::new(
            build_acceptor(&ca, &names).unwrap(),
            TrustGate::new(names),
            AuthServiceImpl::new(issuer),
            EnrollmentRateLimiter::new(100, 100),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (shutdown, _) = broadcast::channel(1);
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = server.serve(listener, &server_shutdown).await;
        });

        Controller {
            addr,
            root_pem: ca.root_cert_pem().to_string(),
            store,
            _shutdown: shutdown,
        }
    }

    #[tokio::test]
    async fn test_enrollment_writes_credentials() {
        let controller = start_controller().await;
        let temp = TempDir::new().unwrap();
        let dir = NodeDir::open(Some(temp.path().to_path_buf())).unwrap();

        let (fingerprint, _) = run_keygen(&dir).unwrap();
        let node = controller
            .store
            .create_node("edge-01", "lab", &fingerprint)
            .await
            .unwrap();

        let result = run_enrollment(&dir, &controller.addr, &controller.root_pem)
            .await
            .unwrap();

        assert_eq!(result.node_id, node.id);
        assert!(result
            .services
            .iter()
            .any(|s| s == "openness.auth.AuthService"));
        assert!(
            std::fs::read_to_string(dir.path(CERT_FILE))
                .unwrap()
                .contains("BEGIN CERTIFICATE")
        );
        assert_eq!(std::fs::read_to_string(dir.path(CA_POOL_FILE)).unwrap(), controller.root_pem);
    }

    #[tokio::test]
    async fn test_enrollment_unapproved_key() {
        let controller = start_controller().await;
        let temp = TempDir::new().unwrap();
        let dir = NodeDir::open(Some(temp.path().to_path_buf())).unwrap();
        run_keygen(&dir).unwrap();

        let err = run_enrollment(&dir, &controller.addr, &controller.root_pem)
            .await
            .unwrap_err();

        let status = err
            .chain()
            .find_map(|e| e.downcast_ref::<tonic::Status>())
            .expect("error should carry a gRPC status");
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert!(!dir.path(CERT_FILE).exists());
    }
}
