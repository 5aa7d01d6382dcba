//! Node records and the address-keyed topology tables.
//!
//! The controller keeps two [`TopologyTable`]s: `desired`, loaded from a
//! document or a seed probe, and `observed`, rebuilt from `CLUSTER NODES`.

use std::collections::{BTreeMap, BTreeSet};

use crate::client::types::{ClusterSetSlotState, LinkStatus, NodeRole};
use crate::slots::SlotRange;

/// One node, as declared or as observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Node id; empty for a desired node that has not been seen live.
    pub id: String,
    /// Canonical `host:port`.
    pub address: String,
    pub role: NodeRole,
    /// Address of the master this node replicates, if it is a slave.
    pub master_address: Option<String>,
    /// Owned slot ranges, sorted and disjoint.
    pub slots: BTreeSet<SlotRange>,
    pub link: LinkStatus,
    /// In-flight SETSLOT states reported for this node.
    pub pending: BTreeMap<u16, ClusterSetSlotState>,
}

impl NodeRecord {
    /// Create a record with no id, slots, or master.
    pub fn new(address: impl Into<String>, role: NodeRole) -> Self {
        Self {
            id: String::new(),
            address: address.into(),
            role,
            master_address: None,
            slots: BTreeSet::new(),
            link: LinkStatus::default(),
            pending: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_master(mut self, master_address: impl Into<String>) -> Self {
        self.master_address = Some(master_address.into());
        self
    }

    pub fn with_slots(mut self, slots: impl IntoIterator<Item = SlotRange>) -> Self {
        self.slots.extend(slots);
        self
    }

    pub fn with_link(mut self, link: LinkStatus) -> Self {
        self.link = link;
        self
    }

    pub fn is_master(&self) -> bool {
        self.role == NodeRole::Master
    }

    pub fn is_slave(&self) -> bool {
        self.role == NodeRole::Slave
    }

    pub fn is_connected(&self) -> bool {
        self.link == LinkStatus::Connected
    }

    /// Check whether this node owns the slot.
    pub fn owns(&self, slot: u16) -> bool {
        self.slots.iter().any(|r| r.contains(slot))
    }

    /// Range containing the slot, if owned.
    pub fn range_containing(&self, slot: u16) -> Option<SlotRange> {
        self.slots.iter().find(|r| r.contains(slot)).copied()
    }

    /// Total number of owned slots.
    pub fn slot_count(&self) -> u32 {
        self.slots.iter().map(|r| u32::from(r.count())).sum()
    }

    /// Slots as `a-b c d-e` for log output.
    pub fn slots_display(&self) -> String {
        self.slots
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Address-keyed table of node records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyTable {
    nodes: BTreeMap<String, NodeRecord>,
}

impl TopologyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any record with the same address.
    pub fn insert(&mut self, record: NodeRecord) -> Option<NodeRecord> {
        self.nodes.insert(record.address.clone(), record)
    }

    pub fn remove(&mut self, address: &str) -> Option<NodeRecord> {
        self.nodes.remove(address)
    }

    pub fn get(&self, address: &str) -> Option<&NodeRecord> {
        self.nodes.get(address)
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.nodes.contains_key(address)
    }

    /// Find a record by node id.
    pub fn by_id(&self, id: &str) -> Option<&NodeRecord> {
        if id.is_empty() {
            return None;
        }
        self.nodes.values().find(|n| n.id == id)
    }

    /// Iterate records in address order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    /// Addresses in order.
    pub fn addresses(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// All master records.
    pub fn masters(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values().filter(|n| n.is_master())
    }

    /// All records whose cluster bus link is down.
    pub fn disconnected(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values().filter(|n| !n.is_connected())
    }

    /// Master owning the slot, ignoring slaves and slotless masters.
    pub fn owner_of(&self, slot: u16) -> Option<&NodeRecord> {
        self.masters().find(|n| n.owns(slot))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<NodeRecord> for TopologyTable {
    fn from_iter<T: IntoIterator<Item = NodeRecord>>(iter: T) -> Self {
        let mut table = TopologyTable::new();
        for record in iter {
            table.insert(record);
        }
        table
    }
}

impl IntoIterator for TopologyTable {
    type Item = NodeRecord;
    type IntoIter = std::collections::btree_map::IntoValues<String, NodeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_values()
    }
}
