//! Edge controller daemon.
//!
//! Runs the controller's root CA and the node enrollment endpoint:
//!
//! - [`pki`] - root CA lifecycle and CSR signing
//! - [`tls`] - one listener, two TLS identities chosen by server name
//! - [`gate`] - per-call enforcement of the enrollment trust gate
//! - [`services`] - `openness.auth.AuthService` and its rate limiter
//! - [`store`] - SQLite persistence for nodes, credentials and addresses
//! - [`proxy`] - notification of newly reachable nodes

pub mod config;
pub mod gate;
pub mod pki;
pub mod proxy;
pub mod server;
pub mod services;
pub mod store;
pub mod tls;

pub use config::ControllerConfig;
pub use server::{ControllerServer, ServerError, build_acceptor};
