//! Controller configuration from flags, environment and `.env`.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Args;

/// Settings shared by every controller subcommand.
#[derive(Debug, Clone, Args)]
pub struct ControllerConfig {
    /// Directory holding the CA and the database
    #[arg(long, env = "EDGECONTROLLER_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Address of the gRPC listener
    #[arg(
        long,
        env = "EDGECONTROLLER_GRPC_ADDR",
        default_value = "0.0.0.0:8081",
        global = true
    )]
    pub grpc_addr: SocketAddr,

    /// SQLite database file (default: <data-dir>/controller.db)
    #[arg(long, env = "EDGECONTROLLER_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Port of each node's own gRPC server
    #[arg(
        long,
        env = "EDGECONTROLLER_NODE_GRPC_PORT",
        default_value_t = 8081,
        global = true
    )]
    pub node_grpc_port: u16,

    /// Lifetime of issued node certificates, in days
    #[arg(
        long,
        env = "EDGECONTROLLER_LEAF_VALIDITY_DAYS",
        default_value_t = 90,
        value_parser = clap::value_parser!(u32).range(1..),
        global = true
    )]
    pub leaf_validity_days: u32,

    /// Sustained credential requests per second
    #[arg(long, env = "EDGECONTROLLER_ENROLL_RPS", default_value_t = 2, global = true)]
    pub enroll_rps: u32,

    /// Credential request burst size
    #[arg(long, env = "EDGECONTROLLER_ENROLL_BURST", default_value_t = 10, global = true)]
    pub enroll_burst: u32,
}

impl ControllerConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("edgecontroller")
        })
    }

    /// Where the root CA key and certificate live.
    pub fn ca_dir(&self) -> PathBuf {
        self.data_dir().join("certificates").join("ca")
    }

    pub fn db_path(&self) -> PathBuf {
        self.db
            .clone()
            .unwrap_or_else(|| self.data_dir().join("controller.db"))
    }

    pub fn leaf_validity(&self) -> time::Duration {
        time::Duration::days(i64::from(self.leaf_validity_days))
    }
}
