//! Topology model: node records, the desired/observed tables, discovery from
//! `CLUSTER NODES`, and the JSON document form.

pub mod discovery;
pub mod document;
pub mod endpoint;
pub mod model;

pub use discovery::{observed_from_nodes, parse_observed, parse_observed_from};
pub use document::{NodeDescriptor, TopologyDocument};
pub use endpoint::Endpoint;
pub use model::{NodeRecord, TopologyTable};
