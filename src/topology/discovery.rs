//! Builds the observed table from `CLUSTER NODES`.

use tracing::debug;

use crate::client::types::{ClusterNode, NodeRole, ParseError, ParsedClusterNodes};
use crate::topology::endpoint::Endpoint;
use crate::topology::model::{NodeRecord, TopologyTable};

/// Build an observed table from parsed `CLUSTER NODES` output.
///
/// A node that has never been met reports its own line with an empty host;
/// when `source` (the node the reply came from) is given, its host fills in.
/// Slave master ids are resolved to addresses; a slave whose master is not
/// listed is an inconsistency and fails the whole refresh.
pub fn observed_from_nodes(
    parsed: &ParsedClusterNodes,
    source: Option<&Endpoint>,
) -> Result<TopologyTable, ParseError> {
    let address_of = |node: &ClusterNode| match source {
        Some(source) if node.is_myself() && node.ip.is_empty() => {
            Endpoint::new(source.host(), node.port).to_string()
        }
        _ => node.endpoint().to_string(),
    };

    let mut table: TopologyTable = parsed
        .nodes
        .iter()
        .map(|node| NodeRecord {
            id: node.node_id.clone(),
            address: address_of(node),
            role: node.role,
            master_address: None,
            slots: node.slots.iter().copied().collect(),
            link: node.link,
            pending: node.pending.iter().cloned().collect(),
        })
        .collect();

    for node in parsed.nodes.iter().filter(|n| n.role == NodeRole::Slave) {
        let master = node
            .master_id
            .as_deref()
            .and_then(|id| table.by_id(id))
            .map(|m| m.address.clone())
            .ok_or_else(|| ParseError::UnknownMaster {
                node: node.address.clone(),
                master_id: node.master_id.clone().unwrap_or_else(|| "-".to_string()),
            })?;
        if let Some(record) = table.get_mut(&address_of(node)) {
            record.master_address = Some(master);
        }
    }

    debug!(nodes = table.len(), "Built observed topology");
    Ok(table)
}

/// Parse raw `CLUSTER NODES` text into an observed table.
pub fn parse_observed(raw: &str) -> Result<TopologyTable, ParseError> {
    observed_from_nodes(&ParsedClusterNodes::parse(raw)?, None)
}

/// Like [`parse_observed`], for a reply fetched from `source`.
pub fn parse_observed_from(raw: &str, source: &Endpoint) -> Result<TopologyTable, ParseError> {
    observed_from_nodes(&ParsedClusterNodes::parse(raw)?, Some(source))
}
