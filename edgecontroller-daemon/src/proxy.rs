//! Registration of enrolled nodes with the controller's node proxy.
//!
//! After a node enrolls, whatever proxies controller-to-node gRPC traffic needs
//! to know where to reach it. Delivery is fire-and-forget: a missing or slow
//! subscriber never fails an enrollment.

use thiserror::Error;
use tokio::sync::broadcast;

/// Default buffered events per subscriber.
pub const DEFAULT_CAPACITY: usize = 64;

/// A node finished enrollment and can be reached at `grpc_target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConnected {
    pub node_id: String,
    pub grpc_target: String,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no proxy subscribed")]
    NoSubscribers,
}

/// Receives node registrations from the credential workflow.
pub trait ProxyNotifier: Send + Sync {
    fn node_connected(&self, event: NodeConnected) -> Result<(), ProxyError>;
}

/// Broadcasts registrations to any number of in-process subscribers.
#[derive(Debug, Clone)]
pub struct ProxyRegistrar {
    tx: broadcast::Sender<NodeConnected>,
}

impl ProxyRegistrar {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeConnected> {
        self.tx.subscribe()
    }
}

impl Default for ProxyRegistrar {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProxyNotifier for ProxyRegistrar {
    fn node_connected(&self, event: NodeConnected) -> Result<(), ProxyError> {
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|_| ProxyError::NoSubscribers)
    }
}

/// Log every registration until the registrar is dropped.
pub async fn log_registrations(mut rx: broadcast::Receiver<NodeConnected>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                tracing::info!(
                    node_id = %event.node_id,
                    grpc_target = %event.grpc_target,
                    "Node registered with proxy"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Proxy registration log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
