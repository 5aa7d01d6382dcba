//! valkey-topology library crate
//!
//! Snapshots the topology of a Valkey (or Redis) cluster and reconciles a
//! live cluster toward a declared topology: joining and forgetting nodes,
//! fixing master/replica roles, and moving slot ownership with live key
//! migration.

pub mod client;
pub mod controller;
pub mod slots;
pub mod topology;

pub use client::{ClusterOps, Connector, NodeRole, ValkeyClientConfig, ValkeyConnector};
pub use controller::{Controller, Error, ReconcileConfig, Result, TopologySource};
pub use topology::{Endpoint, NodeRecord, TopologyDocument, TopologyTable};
