//! edgenode - obtain controller credentials for an edge node

mod commands;
mod node_dir;
mod tls;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use node_dir::NodeDir;

/// edgenode - edge node enrollment
#[derive(Parser)]
#[command(name = "edgenode", version, about)]
struct Cli {
    /// Directory holding the node key and credentials
    #[arg(long, global = true, env = "EDGENODE_DIR")]
    dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the node key (if missing) and print its fingerprint
    Keygen,

    /// Print a CSR for the node key
    Csr,

    /// Request credentials from the controller
    Enroll {
        /// Controller gRPC address (host:port)
        #[arg(long, env = "EDGENODE_CONTROLLER")]
        controller: String,

        /// Controller root certificate (PEM)
        #[arg(long, env = "EDGENODE_CA")]
        ca: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let _ = rustls::crypto::ring::default_provider().install_default();

    let dir = NodeDir::open(cli.dir)?;

    match cli.command {
        Commands::Keygen => {
            let (fingerprint, created) = commands::run_keygen(&dir)?;
            if created {
                eprintln!("Generated {}", dir.path(node_dir::KEY_FILE).display());
            }
            println!("{}", fingerprint);
        }
        Commands::Csr => {
            print!("{}", commands::run_csr(&dir)?);
        }
        Commands::Enroll { controller, ca } => {
            let root_pem = std::fs::read_to_string(&ca)
                .with_context(|| format!("Failed to read {}", ca.display()))?;

            let result = commands::run_enrollment(&dir, &controller, &root_pem).await?;

            println!("Enrolled as node {}", result.node_id);
            println!("Certificate: {}", dir.path(node_dir::CERT_FILE).display());
            if cli.verbose {
                for service in &result.services {
                    println!("  {}", service);
                }
            }
        }
    }

    Ok(())
}
