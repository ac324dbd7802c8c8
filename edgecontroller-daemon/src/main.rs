//! Edge controller - issues node credentials and serves the enrollment endpoint.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use edgecontroller_auth::{Fingerprint, ServerNames, TrustGate, VerifiedCsr};
use edgecontroller_daemon::pki::RootCa;
use edgecontroller_daemon::proxy::{ProxyRegistrar, log_registrations};
use edgecontroller_daemon::services::{AuthServiceImpl, CredentialIssuer, EnrollmentRateLimiter};
use edgecontroller_daemon::store::SqliteNodeStore;
use edgecontroller_daemon::{ControllerConfig, ControllerServer, build_acceptor};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

/// Edge controller - node enrollment and credential issuance
#[derive(Parser)]
#[command(name = "edgecontroller", version, about)]
struct Cli {
    #[command(flatten)]
    config: ControllerConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the controller (default if no command given)
    Serve,

    /// Root CA management
    Ca {
        #[command(subcommand)]
        action: CaAction,
    },

    /// Node pre-approval
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
}

#[derive(Subcommand)]
enum CaAction {
    /// Print the root certificate nodes must trust (creates the CA if missing)
    Print,
}

#[derive(Subcommand)]
enum NodeAction {
    /// Pre-approve a node by the fingerprint of its key
    Approve {
        /// Human-readable node name
        #[arg(long)]
        name: String,

        /// Where the node is deployed
        #[arg(long, default_value = "")]
        location: String,

        /// Key fingerprint, as printed by `edgenode keygen`
        #[arg(long, conflicts_with = "csr", required_unless_present = "csr")]
        serial: Option<String>,

        /// Take the fingerprint from this PEM CSR instead
        #[arg(long)]
        csr: Option<PathBuf>,
    },

    /// List nodes and their recorded addresses
    List,

    /// Remove a node together with its credential and address
    Delete {
        /// Node ID, as printed by `node approve`
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Ca { action }) => cmd_ca(&cli.config, action),
        Some(Commands::Node { action }) => cmd_node(&cli.config, action).await,
        Some(Commands::Serve) | None => cmd_serve(&cli.config).await,
    }
}

// ============================================================================
// Administration
// ============================================================================

fn cmd_ca(config: &ControllerConfig, action: CaAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        CaAction::Print => {
            let ca = RootCa::init(&config.ca_dir(), config.leaf_validity())?;
            print!("{}", ca.root_cert_pem());
        }
    }
    Ok(())
}

async fn open_store(
    config: &ControllerConfig,
) -> Result<SqliteNodeStore, Box<dyn std::error::Error>> {
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %db_path.display(), "Opening database");
    Ok(SqliteNodeStore::open(&db_path).await?)
}

async fn cmd_node(
    config: &ControllerConfig,
    action: NodeAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(config).await?;

    match action {
        NodeAction::Approve {
            name,
            location,
            serial,
            csr,
        } => {
            let serial = match (serial, csr) {
                (Some(serial), _) => Fingerprint::parse(&serial)?,
                (None, Some(path)) => {
                    let pem = std::fs::read_to_string(&path)?;
                    VerifiedCsr::from_pem(&pem)?.fingerprint().clone()
                }
                (None, None) => return Err("either --serial or --csr is required".into()),
            };

            let node = store.create_node(&name, &location, &serial).await?;
            tracing::info!(node_id = %node.id, serial = %node.serial, "Node approved");
            println!("{}", node.id);
        }
        NodeAction::List => {
            let nodes = store.list_nodes().await?;
            if nodes.is_empty() {
                println!("No nodes approved.");
            } else {
                println!("{:<36}  {:<22}  {:<20}  {}", "ID", "SERIAL", "NAME", "GRPC TARGET");
                for node in nodes {
                    println!(
                        "{:<36}  {:<22}  {:<20}  {}",
                        node.id,
                        node.serial,
                        node.name,
                        node.grpc_target.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        NodeAction::Delete { id } => {
            store.delete_node(&id).await?;
            tracing::info!(node_id = %id, "Node deleted");
        }
    }
    Ok(())
}

// ============================================================================
// Server
// ============================================================================

async fn cmd_serve(config: &ControllerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let store = Arc::new(open_store(config).await?);

    let ca = Arc::new(RootCa::init(&config.ca_dir(), config.leaf_validity())?);
    tracing::info!(not_after = %ca.not_after(), "Root CA ready");
    // Nodes need this certificate out of band to trust the enrollment endpoint.
    tracing::info!("Root CA certificate:\n{}", ca.root_cert_pem());

    let names = ServerNames::default();
    let acceptor = build_acceptor(&ca, &names)?;

    let registrar = ProxyRegistrar::default();
    let registration_log = tokio::spawn(log_registrations(registrar.subscribe()));

    let issuer = CredentialIssuer::new(
        store,
        ca,
        Arc::new(registrar),
        config.node_grpc_port,
    );
    let server = ControllerServer::new(
        acceptor,
        TrustGate::new(names),
        AuthServiceImpl::new(issuer),
        EnrollmentRateLimiter::new(config.enroll_rps, config.enroll_burst),
    );

    let listener = TcpListener::bind(config.grpc_addr).await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let signal_task = tokio::spawn(wait_for_signal(shutdown_tx.clone()));

    server.serve(listener, &shutdown_tx).await?;

    signal_task.abort();
    registration_log.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    let _ = shutdown_tx.send(());
}
