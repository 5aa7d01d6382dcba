//! Reconciliation engine.
//!
//! A [`Controller`] owns the desired and observed topologies for one
//! invocation and drives the cluster from one to the other:
//!
//! - `membership`: `add_host` (join with gossip convergence) and `forget_all`
//! - `roles`: failover/replicate corrections per node
//! - `slots`: slot assignment and the live migration protocol
//! - `restore`: the fixed restore order and snapshots

pub mod context;
pub mod error;
mod membership;
mod restore;
mod roles;
mod slots;

pub use context::{Controller, ReconcileConfig, TopologySource};
pub use error::{Error, Result};
