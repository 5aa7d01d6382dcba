//! Error types for the controller.
//!
//! Every reconciliation step returns these; nothing below the binary decides
//! to stop the process.

use std::path::PathBuf;

use thiserror::Error;

use crate::client::{ParseError, ValkeyError};

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Address is not a valid `host:port`
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Declared role cannot be reconciled
    #[error("Unknown role {role} for node {node}")]
    UnknownRole { node: String, role: String },

    /// A slave's declared master is itself a slave
    #[error("Node {node} cannot replicate from {master}: it is a slave")]
    InvalidMasterRole { node: String, master: String },

    /// Declared master is in neither the desired nor the observed table
    #[error("Master {master} of node {node} not found")]
    MasterNotFound { node: String, master: String },

    /// Master dependency chain loops back on itself
    #[error("Master dependency cycle: {}", .0.join(" -> "))]
    MasterCycle(Vec<String>),

    /// Gossip never showed the new node everywhere
    #[error("Node {address} not visible cluster-wide after {attempts} attempts")]
    ConvergenceTimeout { address: String, attempts: u32 },

    /// A wire command returned an error
    #[error("Command {command} on {address} failed: {source}")]
    CommandFailed {
        address: String,
        command: &'static str,
        #[source]
        source: ValkeyError,
    },

    /// Slot move failed before ownership was finalized
    #[error("Migration of slot {slot} from {source_address} to {target} failed: {reason}")]
    MigrationFailed {
        slot: u16,
        source_address: String,
        target: String,
        reason: String,
    },

    /// `CLUSTER NODES` could not be turned into a topology
    #[error("Malformed topology: {0}")]
    MalformedTopology(#[source] ParseError),

    /// Document read/write failure
    #[error("File error on {}: {source}", .path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document is not valid JSON for a topology
    #[error("Invalid topology document{}: {source}", describe_path(.path))]
    Document {
        path: Option<PathBuf>,
        #[source]
        source: serde_json::Error,
    },

    /// Node is not in the observed topology
    #[error("Node {0} not found in the cluster")]
    NodeNotFound(String),

    /// Node is still in the cluster bus handshake
    #[error("Node {0} is still in handshake")]
    NodeInHandshake(String),

    /// No known node answered
    #[error("No reachable node among {0:?}")]
    NoReachableNode(Vec<String>),

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

fn describe_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" {}", p.display()))
        .unwrap_or_default()
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidAddress(address) => Error::InvalidAddress(address),
            other => Error::MalformedTopology(other),
        }
    }
}

impl Error {
    /// Check if re-running against a fresh view of the cluster may succeed.
    ///
    /// Configuration mistakes never do; wire and convergence failures may.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ConvergenceTimeout { .. }
            | Error::CommandFailed { .. }
            | Error::MigrationFailed { .. }
            | Error::NodeInHandshake(_)
            | Error::NoReachableNode(_) => true,
            Error::InvalidAddress(_)
            | Error::UnknownRole { .. }
            | Error::InvalidMasterRole { .. }
            | Error::MasterNotFound { .. }
            | Error::MasterCycle(_)
            | Error::MalformedTopology(_)
            | Error::FileIo { .. }
            | Error::Document { .. }
            | Error::NodeNotFound(_)
            | Error::Cancelled => false,
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
