//! Cluster administration commands as a trait.
//!
//! The reconciler only ever talks to nodes through [`ClusterOps`], and only
//! opens connections through [`Connector`]. [`ValkeyClient`] is the fred-backed
//! implementation; tests provide an in-memory one.
//!
//! [`ValkeyClient`]: super::ValkeyClient

use std::future::Future;

use super::types::{ClusterSetSlotState, ParsedClusterNodes};
use super::valkey_client::ValkeyError;
use crate::topology::Endpoint;

/// Commands the reconciler sends to a single cluster node.
pub trait ClusterOps: Send + Sync {
    /// Raw `CLUSTER NODES` text as seen by this node.
    fn cluster_nodes_raw(&self) -> impl Future<Output = Result<String, ValkeyError>> + Send;

    /// `CLUSTER MEET ip port`.
    fn cluster_meet(
        &self,
        ip: &str,
        port: u16,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// `CLUSTER FORGET node-id`.
    fn cluster_forget(&self, node_id: &str)
    -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// `CLUSTER REPLICATE master-id`.
    fn cluster_replicate(
        &self,
        master_node_id: &str,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// `CLUSTER FAILOVER` with no flag.
    fn cluster_failover(&self) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// `CLUSTER ADDSLOTS slot...`.
    fn cluster_add_slots(
        &self,
        slots: Vec<u16>,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// `CLUSTER SETSLOT slot state [node-id]`.
    fn cluster_setslot(
        &self,
        slot: u16,
        state: ClusterSetSlotState,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// `CLUSTER COUNTKEYSINSLOT slot`.
    fn cluster_count_keys_in_slot(
        &self,
        slot: u16,
    ) -> impl Future<Output = Result<u64, ValkeyError>> + Send;

    /// `CLUSTER GETKEYSINSLOT slot count`.
    fn cluster_get_keys_in_slot(
        &self,
        slot: u16,
        count: u64,
    ) -> impl Future<Output = Result<Vec<String>, ValkeyError>> + Send;

    /// `MIGRATE host port key db timeout`, moving one key to another node.
    fn migrate(
        &self,
        host: &str,
        port: u16,
        key: &str,
        db: u8,
        timeout_ms: u64,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// Close the connection.
    fn close(&self) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// Parsed `CLUSTER NODES`.
    fn cluster_nodes(
        &self,
    ) -> impl Future<Output = Result<ParsedClusterNodes, ValkeyError>> + Send {
        async move {
            let raw = self.cluster_nodes_raw().await?;
            let nodes = ParsedClusterNodes::parse(&raw)?;
            Ok(nodes)
        }
    }
}

/// Opens connections to cluster nodes.
pub trait Connector: Send + Sync {
    type Conn: ClusterOps + 'static;

    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Conn, ValkeyError>> + Send;
}
