//! valkey-topology - snapshot and reconcile Valkey cluster topologies.
//!
//! This is the main entry point that:
//! - Parses the command line
//! - Initializes structured logging (optionally teed to the document's log file)
//! - Runs one controller operation and maps its outcome to the exit status

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

use valkey_topology::client::Connector;
use valkey_topology::{
    Controller, Endpoint, NodeRecord, NodeRole, ReconcileConfig, Result, TopologyDocument,
    TopologySource, ValkeyClientConfig, ValkeyConnector,
};

/// Snapshot a Valkey cluster topology or reconcile a cluster toward one.
#[derive(Parser)]
#[command(name = "valkey-topology", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Password for AUTH on every node.
    #[arg(long, global = true)]
    password: Option<String>,

    /// Connection timeout in seconds.
    #[arg(long, global = true, default_value_t = 10)]
    connect_timeout_secs: u64,

    /// Command timeout in seconds.
    #[arg(long, global = true, default_value_t = 30)]
    command_timeout_secs: u64,

    /// Seconds between gossip convergence checks.
    #[arg(long, global = true, default_value_t = 5)]
    retry_interval_secs: u64,

    /// Convergence checks before giving up on a joining node.
    #[arg(long, global = true, default_value_t = 10)]
    max_retries: u32,

    /// MIGRATE timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 5000)]
    migrate_timeout_ms: u64,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Add a node; with --master it joins as a slave of that master.
    Add {
        /// Any live cluster node (ip:port).
        connect: String,
        /// Node to add (ip:port).
        node: String,
        /// Master for the new node (ip:port).
        #[arg(long)]
        master: Option<String>,
    },
    /// Make every other node forget a node.
    Delete {
        /// Any live cluster node (ip:port).
        connect: String,
        /// Node to forget (ip:port).
        target: String,
        /// Topology document naming more nodes to reach the cluster through.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Another live node to fall back on (ip:port).
        #[arg(long)]
        host: Option<String>,
    },
    /// Write the live topology as a document.
    Save {
        /// Any live cluster node (ip:port).
        address: String,
        /// Output file; stdout when omitted.
        #[arg(long, short)]
        file: Option<PathBuf>,
    },
    /// Converge the cluster on a topology document.
    Restore {
        /// Topology document.
        config: PathBuf,
    },
}

impl Command {
    /// Document this command reads, if any.
    fn document_path(&self) -> Option<&PathBuf> {
        match self {
            Command::Delete { file, .. } => file.as_ref(),
            Command::Restore { config } => Some(config),
            Command::Add { .. } | Command::Save { .. } => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // the document names the log file, so it is read before logging starts
    let document = cli
        .command
        .document_path()
        .map(TopologyDocument::load)
        .transpose();

    let logfile = document
        .as_ref()
        .ok()
        .and_then(Option::as_ref)
        .map(|d| d.logfile.as_str())
        .filter(|f| !f.is_empty());
    if let Err(e) = init_tracing(cli.json_logs, logfile) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let document = match document {
        Ok(document) => document,
        Err(e) => {
            error!(error = %e, "Failed to load topology document");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Received shutdown signal, cancelling");
            cancel.cancel();
        }
    });

    match run(cli, document, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Operation failed");
            if e.is_retryable() {
                info!("Cluster state may be partially changed; re-run once the cause is fixed");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(
    json: bool,
    logfile: Option<&str>,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("valkey_topology=info".parse()?);

    // stdout carries snapshot output, so logs go to stderr
    let writer = match logfile {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(std::io::stderr.and(Mutex::new(file)))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn run(
    cli: Cli,
    document: Option<TopologyDocument>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut client_config = ValkeyClientConfig::default()
        .with_connection_timeout(Duration::from_secs(cli.connect_timeout_secs))
        .with_command_timeout(Duration::from_secs(cli.command_timeout_secs));
    if let Some(password) = cli.password {
        client_config = client_config.with_password(password);
    }
    let connector = ValkeyConnector::new(client_config);

    let config = ReconcileConfig::default()
        .with_retry_interval(Duration::from_secs(cli.retry_interval_secs))
        .with_max_retries(cli.max_retries)
        .with_migrate_timeout_ms(cli.migrate_timeout_ms);

    match cli.command {
        Command::Add {
            connect,
            node,
            master,
        } => {
            let mut controller =
                Controller::bootstrap(connector, config, TopologySource::Host(connect), cancel)
                    .await?;

            let address = Endpoint::parse(&node)?.to_string();
            let mut record = match master {
                Some(master) => NodeRecord::new(address.clone(), NodeRole::Slave)
                    .with_master(Endpoint::parse(&master)?.to_string()),
                None => NodeRecord::new(address.clone(), NodeRole::Master),
            };
            if let Some(existing) = controller.observed().get(&address) {
                info!(address = %address, role = %existing.role, "Node already in cluster");
                record.id = existing.id.clone();
            }
            let role = record.role;
            controller.desired_mut().insert(record);

            let result = controller.add_host(&address, role).await;
            finish(controller, result).await
        }
        Command::Delete {
            connect,
            target,
            host,
            ..
        } => {
            let mut controller = Controller::new(connector, config).with_cancellation(cancel);
            if let Some(document) = &document {
                controller = controller.with_document(document)?;
            }
            controller.add_seed(&connect)?;
            if let Some(host) = &host {
                controller.add_seed(host)?;
            }

            let result = async {
                controller.refresh().await?;
                controller.forget_all(&target).await
            }
            .await;
            finish(controller, result).await
        }
        Command::Save { address, file } => {
            let mut controller =
                Controller::bootstrap(connector, config, TopologySource::Host(address), cancel)
                    .await?;
            controller.describe();
            let result = controller.take_snapshot(file.as_deref());
            finish(controller, result).await
        }
        Command::Restore { .. } => {
            let mut controller = Controller::new(connector, config).with_cancellation(cancel);
            if let Some(document) = &document {
                controller = controller.with_document(document)?;
            }

            let result = async {
                controller.refresh().await?;
                controller.describe();
                controller.restore().await
            }
            .await;
            finish(controller, result).await
        }
    }
}

/// Close every connection, then hand back the operation's result.
async fn finish<C: Connector>(mut controller: Controller<C>, result: Result<()>) -> Result<()> {
    controller.shutdown().await;
    result
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the process cannot be
/// cancelled cleanly without them.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
