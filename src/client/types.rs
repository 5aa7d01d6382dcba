//! Types for parsed Valkey cluster information.
//!
//! These types represent the parsed output of `CLUSTER NODES` and the
//! vocabulary shared by the wire client and the topology model: node roles,
//! link status, and the `CLUSTER SETSLOT` states.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::slots::{InvalidSlotRange, SlotRange};
use crate::topology::Endpoint;

/// Minimum number of space separated fields in a `CLUSTER NODES` line.
pub const MIN_NODE_FIELDS: usize = 8;

/// `[slot->-node]` (migrating) or `[slot-<-node]` (importing).
static PENDING_SLOT_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\[(\d+)-([<>])-([0-9A-Za-z]+)\]$"));

/// Errors that can occur when parsing cluster data.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed cluster nodes line '{line}': {reason}")]
    MalformedLine { line: String, reason: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Node {node} replicates unknown master {master_id}")]
    UnknownMaster { node: String, master_id: String },

    #[error(transparent)]
    SlotRange(#[from] InvalidSlotRange),
}

impl ParseError {
    fn malformed(line: &str, reason: impl Into<String>) -> Self {
        ParseError::MalformedLine {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

/// Role of a cluster node.
///
/// The numeric form (`0`, `1`, `2`) is what the topology document stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum NodeRole {
    /// Node is a master serving hash slots.
    Master,
    /// Node is a replica of a master.
    Slave,
    /// Node is still in the cluster bus handshake.
    Handshake,
}

impl TryFrom<u8> for NodeRole {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NodeRole::Master),
            1 => Ok(NodeRole::Slave),
            2 => Ok(NodeRole::Handshake),
            other => Err(format!("unknown node role {}", other)),
        }
    }
}

impl From<NodeRole> for u8 {
    fn from(role: NodeRole) -> Self {
        match role {
            NodeRole::Master => 0,
            NodeRole::Slave => 1,
            NodeRole::Handshake => 2,
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Slave => write!(f, "slave"),
            NodeRole::Handshake => write!(f, "handshake"),
        }
    }
}

/// State of the cluster bus link to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Connected,
}

impl TryFrom<u8> for LinkStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LinkStatus::Disconnected),
            1 => Ok(LinkStatus::Connected),
            other => Err(format!("unknown link status {}", other)),
        }
    }
}

impl From<LinkStatus> for u8 {
    fn from(status: LinkStatus) -> Self {
        match status {
            LinkStatus::Disconnected => 0,
            LinkStatus::Connected => 1,
        }
    }
}

impl FromStr for LinkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "connected" => Ok(LinkStatus::Connected),
            "disconnected" => Ok(LinkStatus::Disconnected),
            other => Err(format!("unknown link state '{}'", other)),
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Connected => write!(f, "connected"),
            LinkStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// State argument for `CLUSTER SETSLOT <slot> <state> [node-id]`.
///
/// `Migrating` carries the destination id, `Importing` the source id, and
/// `Node` the final owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterSetSlotState {
    Migrating(String),
    Importing(String),
    Node(String),
    Stable,
}

impl ClusterSetSlotState {
    /// Subcommand keyword as sent on the wire.
    pub fn keyword(&self) -> &'static str {
        match self {
            ClusterSetSlotState::Migrating(_) => "MIGRATING",
            ClusterSetSlotState::Importing(_) => "IMPORTING",
            ClusterSetSlotState::Node(_) => "NODE",
            ClusterSetSlotState::Stable => "STABLE",
        }
    }

    /// Node id argument, if the state takes one.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            ClusterSetSlotState::Migrating(id)
            | ClusterSetSlotState::Importing(id)
            | ClusterSetSlotState::Node(id) => Some(id),
            ClusterSetSlotState::Stable => None,
        }
    }
}

impl fmt::Display for ClusterSetSlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node_id() {
            Some(id) => write!(f, "{} {}", self.keyword().to_lowercase(), id),
            None => write!(f, "{}", self.keyword().to_lowercase()),
        }
    }
}

/// Flags indicating the state of a cluster node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// This is the local node (myself).
    pub myself: bool,
    /// Node is a master.
    pub master: bool,
    /// Node is a replica.
    pub slave: bool,
    /// Node is in PFAIL state (potentially failed).
    pub pfail: bool,
    /// Node is in FAIL state.
    pub fail: bool,
    /// Node is in handshake state.
    pub handshake: bool,
    /// Node has no address yet.
    pub noaddr: bool,
    /// Node has no flags set.
    pub noflags: bool,
}

impl NodeFlags {
    /// Parse flags from the CLUSTER NODES output.
    pub fn parse(flags_str: &str) -> Self {
        let mut flags = NodeFlags::default();
        for flag in flags_str.split(',') {
            match flag.trim() {
                "myself" => flags.myself = true,
                "master" => flags.master = true,
                "slave" => flags.slave = true,
                "pfail" | "fail?" => flags.pfail = true,
                "fail" => flags.fail = true,
                "handshake" => flags.handshake = true,
                "noaddr" => flags.noaddr = true,
                "noflags" => flags.noflags = true,
                _ => {}
            }
        }
        flags
    }

    /// Get the role based on flags, if the flags name one.
    pub fn role(&self) -> Option<NodeRole> {
        if self.handshake {
            Some(NodeRole::Handshake)
        } else if self.master {
            Some(NodeRole::Master)
        } else if self.slave {
            Some(NodeRole::Slave)
        } else {
            None
        }
    }
}

/// A cluster node as reported by `CLUSTER NODES`.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    /// Unique node ID (40 hex characters).
    pub node_id: String,
    /// IP address and client port, without the cluster bus suffix.
    pub address: String,
    /// IP address only.
    pub ip: String,
    /// Client port.
    pub port: u16,
    /// Node flags.
    pub flags: NodeFlags,
    /// Role derived from the flags.
    pub role: NodeRole,
    /// Master node ID if this is a replica.
    pub master_id: Option<String>,
    /// Link state of the cluster bus.
    pub link: LinkStatus,
    /// Slot ranges owned by this node (masters only).
    pub slots: Vec<SlotRange>,
    /// Slots this node is currently migrating or importing.
    pub pending: Vec<(u16, ClusterSetSlotState)>,
}

impl ClusterNode {
    /// Client endpoint of this node.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip.clone(), self.port)
    }

    /// Check if this is a master node.
    pub fn is_master(&self) -> bool {
        self.role == NodeRole::Master
    }

    /// Check if this is the local node.
    pub fn is_myself(&self) -> bool {
        self.flags.myself
    }

    /// Check if the node is connected.
    pub fn is_connected(&self) -> bool {
        self.link == LinkStatus::Connected
    }

    /// Get total number of slots owned by this node.
    pub fn slot_count(&self) -> u32 {
        self.slots.iter().map(|r| u32::from(r.count())).sum()
    }

    /// Parse a single line from `CLUSTER NODES` output.
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        // id addr flags master ping-sent pong-recv config-epoch link slot...
        let [node_id, addr, flags, master, _, _, _, link, slot_tokens @ ..] = parts.as_slice()
        else {
            return Err(ParseError::malformed(
                line,
                format!("expected at least {} fields", MIN_NODE_FIELDS),
            ));
        };

        // ip:port@cport[,hostname] or ip:port
        let ip_port = addr.split('@').next().unwrap_or(addr);
        let (ip, port) = ip_port
            .rsplit_once(':')
            .ok_or_else(|| ParseError::malformed(line, format!("invalid address {}", ip_port)))?;
        let port: u16 = port
            .parse()
            .map_err(|_| ParseError::malformed(line, format!("invalid port {}", port)))?;

        let flags = NodeFlags::parse(flags);
        let role = flags
            .role()
            .ok_or_else(|| ParseError::malformed(line, "flags name no known role"))?;

        let master_id = match *master {
            "-" => None,
            id => Some(id.to_string()),
        };

        let link: LinkStatus = link
            .parse()
            .map_err(|reason: String| ParseError::malformed(line, reason))?;

        let mut slots = Vec::new();
        let mut pending = Vec::new();
        for token in slot_tokens {
            if token.starts_with('[') {
                pending.push(parse_pending_slot(line, token)?);
            } else {
                let range = SlotRange::parse(token)
                    .map_err(|e| ParseError::malformed(line, e.to_string()))?;
                slots.push(range);
            }
        }

        Ok(ClusterNode {
            node_id: node_id.to_string(),
            address: ip_port.to_string(),
            ip: ip.to_string(),
            port,
            flags,
            role,
            master_id,
            link,
            slots,
            pending,
        })
    }
}

fn parse_pending_slot(line: &str, token: &str) -> Result<(u16, ClusterSetSlotState), ParseError> {
    let re = PENDING_SLOT_RE
        .as_ref()
        .map_err(|e| ParseError::malformed(line, e.to_string()))?;
    let caps = re
        .captures(token)
        .ok_or_else(|| ParseError::malformed(line, format!("invalid slot marker {}", token)))?;

    let slot: u16 = caps
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| ParseError::malformed(line, format!("invalid slot marker {}", token)))?;
    let peer = caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default();
    let state = match caps.get(2).map(|m| m.as_str()) {
        Some(">") => ClusterSetSlotState::Migrating(peer),
        _ => ClusterSetSlotState::Importing(peer),
    };
    Ok((slot, state))
}

/// Parsed output of `CLUSTER NODES` command.
#[derive(Debug, Clone, Default)]
pub struct ParsedClusterNodes {
    /// All nodes in the cluster.
    pub nodes: Vec<ClusterNode>,
}

impl ParsedClusterNodes {
    /// Parse the output of `CLUSTER NODES` command.
    ///
    /// Lines with fewer than [`MIN_NODE_FIELDS`] fields are skipped; any other
    /// malformed line fails the whole parse.
    pub fn parse(output: &str) -> Result<Self, ParseError> {
        let mut nodes = Vec::new();
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.split_whitespace().count() < MIN_NODE_FIELDS {
                debug!(line = %line, "Skipping short cluster nodes line");
                continue;
            }
            nodes.push(ClusterNode::parse_line(line)?);
        }

        Ok(ParsedClusterNodes { nodes })
    }

    /// Get all master nodes.
    pub fn masters(&self) -> Vec<&ClusterNode> {
        self.nodes.iter().filter(|n| n.is_master()).collect()
    }

    /// Get the local node (marked with "myself" flag).
    pub fn myself(&self) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.is_myself())
    }

    /// Check whether any node listed has the given canonical address.
    pub fn contains_address(&self, address: &str) -> bool {
        self.nodes
            .iter()
            .any(|n| n.endpoint().to_string() == address)
    }
}
