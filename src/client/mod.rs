//! Valkey client module for cluster management operations.
//!
//! This module wraps the `fred` client for the handful of cluster
//! administration commands the reconciler needs, and parses what nodes report
//! about each other.
//!
//! ## Architecture
//!
//! - `valkey_client`: fred-backed single node client and connector
//! - `types`: Parsed types for `CLUSTER NODES` output
//! - `cluster_ops`: The `ClusterOps` and `Connector` traits the reconciler is written against

pub mod cluster_ops;
pub mod types;
pub mod valkey_client;

pub use cluster_ops::{ClusterOps, Connector};
pub use types::{
    ClusterNode, ClusterSetSlotState, LinkStatus, NodeFlags, NodeRole, ParseError,
    ParsedClusterNodes,
};
pub use valkey_client::{ValkeyClient, ValkeyClientConfig, ValkeyConnector, ValkeyError};
