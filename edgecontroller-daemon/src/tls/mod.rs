//! TLS for the controller's gRPC port.
//!
//! One port, two identities: the ClientHello's server name picks either the
//! production config (client certificate required) or the enrollment config
//! (no client certificate).

mod acceptor;
mod connect_info;
mod connection;
mod server;

pub use acceptor::SniAcceptor;
pub use connect_info::NodeConnectInfo;
pub use connection::TlsConnection;
pub use server::{TlsConfigError, TlsServerConfig};
