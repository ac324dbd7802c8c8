//! Per-connection TLS facts made available to request handlers.

use std::net::SocketAddr;

/// Connection info extracted from an accepted TLS stream.
///
/// Available via `request.extensions()` in gRPC handlers and tower layers.
#[derive(Debug, Clone, Default)]
pub struct NodeConnectInfo {
    /// Remote socket address of the node
    pub remote_addr: Option<SocketAddr>,
    /// Server name the node asked for in its ClientHello
    pub server_name: Option<String>,
    /// Common Name of the node's client certificate (production only)
    pub peer_node_id: Option<String>,
}

impl NodeConnectInfo {
    pub fn new(
        remote_addr: Option<SocketAddr>,
        server_name: Option<String>,
        peer_node_id: Option<String>,
    ) -> Self {
        Self {
            remote_addr,
            server_name,
            peer_node_id,
        }
    }
}
