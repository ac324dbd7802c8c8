//! Tower layer enforcing the [`TrustGate`] on every gRPC call.
//!
//! Runs once per HTTP/2 request, so once per unary call and once when a
//! stream is opened. The server name comes from the connection's
//! [`NodeConnectInfo`]; the method is the request path. Rejected calls get a
//! trailers-only gRPC response and never reach a service.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use edgecontroller_auth::{GateError, TrustGate};
use tonic::Status;
use tonic::body::BoxBody;
use tower::{Layer, Service};

use crate::tls::NodeConnectInfo;

/// Map a gate rejection to its gRPC status.
pub fn gate_status(err: &GateError) -> Status {
    if err.is_precondition() {
        Status::failed_precondition(err.to_string())
    } else {
        Status::permission_denied(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct TrustGateLayer {
    gate: Arc<TrustGate>,
}

impl TrustGateLayer {
    pub fn new(gate: TrustGate) -> Self {
        Self {
            gate: Arc::new(gate),
        }
    }
}

impl<S> Layer<S> for TrustGateLayer {
    type Service = TrustGateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TrustGateService {
            inner,
            gate: Arc::clone(&self.gate),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrustGateService<S> {
    inner: S,
    gate: Arc<TrustGate>,
}

impl<S, B> Service<http::Request<B>> for TrustGateService<S>
where
    S: Service<http::Request<B>, Response = http::Response<BoxBody>>,
    S::Future: Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        let (decision, node_id) = {
            let info = req.extensions().get::<NodeConnectInfo>();
            let server_name = info.and_then(|info| info.server_name.as_deref());
            let node_id = info.and_then(|info| info.peer_node_id.clone());
            (self.gate.check(server_name, req.uri().path()), node_id)
        };

        match decision {
            Ok(identity) => {
                tracing::trace!(
                    method = %req.uri().path(),
                    channel = ?identity,
                    node_id = ?node_id,
                    "Call admitted"
                );
                req.extensions_mut().insert(identity);
                Box::pin(self.inner.call(req))
            }
            Err(e) => {
                tracing::warn!(
                    method = %req.uri().path(),
                    error = %e,
                    "Call rejected by trust gate"
                );
                let response = gate_status(&e).into_http();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}
