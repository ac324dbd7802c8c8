//! The controller's gRPC endpoint: SNI-selected TLS, trust gate, services.

use std::io;
use std::time::Duration;

use edgecontroller_auth::{ServerNames, TrustGate};
use edgecontroller_proto::FILE_DESCRIPTOR_SET;
use edgecontroller_proto::auth_service_server::AuthServiceServer;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_stream::Stream;
use tonic::transport::Server;

use crate::gate::TrustGateLayer;
use crate::pki::{PkiError, RootCa};
use crate::services::{AuthServiceImpl, EnrollmentRateLimiter, RateLimitInterceptor};
use crate::tls::{SniAcceptor, TlsConfigError, TlsConnection, TlsServerConfig};

/// Connections that don't complete the TLS handshake within this time are dropped.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("PKI error: {0}")]
    Pki(#[from] PkiError),
    #[error("TLS configuration error: {0}")]
    Tls(#[from] TlsConfigError),
    #[error("reflection service error: {0}")]
    Reflection(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Issue both listener identities from `ca` and build the acceptor.
///
/// Production connections must present a certificate chaining to `ca`.
pub fn build_acceptor(ca: &RootCa, names: &ServerNames) -> Result<SniAcceptor, ServerError> {
    let production_identity = ca.new_tls_server_cert(&names.production)?;
    let enrollment_identity = ca.new_tls_server_cert(&names.enrollment)?;

    let production =
        TlsServerConfig::new_mtls(&production_identity, &[ca.root_cert_der().to_vec()])?
            .into_rustls_config();
    let enrollment = TlsServerConfig::new_server_only(&enrollment_identity)?.into_rustls_config();

    Ok(SniAcceptor::new(production, enrollment, names.clone()))
}

/// Accept TCP connections and yield completed TLS handshakes.
///
/// Handshakes run concurrently so a slow client cannot stall the listener.
pub fn tls_incoming(
    listener: TcpListener,
    acceptor: SniAcceptor,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> impl Stream<Item = Result<TlsConnection, io::Error>> {
    async_stream::stream! {
        let mut handshakes = JoinSet::new();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, peer_addr)) => {
                            let acceptor = acceptor.clone();
                            handshakes.spawn(async move {
                                let result = tokio::time::timeout(
                                    TLS_HANDSHAKE_TIMEOUT,
                                    acceptor.accept(tcp_stream),
                                )
                                .await;
                                (peer_addr, result)
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "TCP accept failed");
                        }
                    }
                }

                Some(joined) = handshakes.join_next() => {
                    match joined {
                        Ok((peer_addr, Ok(Ok(tls_stream)))) => {
                            tracing::debug!(peer = %peer_addr, "TLS handshake successful");
                            let conn = TlsConnection::new(tls_stream, Some(peer_addr));
                            yield Ok::<_, io::Error>(conn);
                        }
                        Ok((peer_addr, Ok(Err(e)))) => {
                            // Unknown server names and missing client certificates end up here.
                            tracing::debug!(peer = %peer_addr, error = %e, "TLS handshake failed");
                        }
                        Ok((peer_addr, Err(_))) => {
                            tracing::warn!(
                                peer = %peer_addr,
                                timeout_secs = ?TLS_HANDSHAKE_TIMEOUT,
                                "TLS handshake timed out"
                            );
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "TLS handshake task failed");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }
    }
}

/// Everything needed to serve the controller's gRPC port.
pub struct ControllerServer {
    acceptor: SniAcceptor,
    gate: TrustGate,
    auth: AuthServiceImpl,
    limiter: EnrollmentRateLimiter,
}

impl ControllerServer {
    pub fn new(
        acceptor: SniAcceptor,
        gate: TrustGate,
        auth: AuthServiceImpl,
        limiter: EnrollmentRateLimiter,
    ) -> Self {
        Self {
            acceptor,
            gate,
            auth,
            limiter,
        }
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<(), ServerError> {
        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| ServerError::Reflection(e.to_string()))?;

        tracing::info!(addr = %listener.local_addr()?, "gRPC listener bound");

        let incoming = tls_incoming(listener, self.acceptor, shutdown.subscribe());
        let mut signal_rx = shutdown.subscribe();

        Server::builder()
            .layer(TrustGateLayer::new(self.gate))
            .add_service(reflection)
            .add_service(AuthServiceServer::with_interceptor(
                self.auth,
                RateLimitInterceptor::new(self.limiter),
            ))
            .serve_with_incoming_shutdown(incoming, async move {
                let _ = signal_rx.recv().await;
            })
            .await?;

        tracing::info!("gRPC server stopped");
        Ok(())
    }
}
