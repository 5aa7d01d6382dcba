//! In-memory Valkey cluster for driving the controller without servers.
//!
//! Every node is kept in one shared [`ClusterState`]. Connections returned by
//! [`MockConnector`] apply cluster commands to that state and render
//! `CLUSTER NODES` from each node's own view, so gossip lag, failovers, and
//! slot moves behave the way the controller expects from real nodes.
//!
//! Every command except `CLUSTER NODES` is appended to a call log that tests
//! assert ordering against.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use valkey_topology::client::{ClusterOps, ClusterSetSlotState, Connector, ValkeyError};
use valkey_topology::slots::compact_slots;
use valkey_topology::topology::Endpoint;

/// One simulated node.
#[derive(Debug, Clone)]
pub struct MockNode {
    pub id: String,
    pub address: String,
    pub is_master: bool,
    pub master_id: Option<String>,
    pub slots: BTreeSet<u16>,
    pub keys: BTreeMap<u16, Vec<String>>,
    pub migrating: BTreeMap<u16, String>,
    pub importing: BTreeMap<u16, String>,
    /// Ids this node lists in `CLUSTER NODES`, itself included.
    pub known: BTreeSet<String>,
    /// Down nodes refuse connections and show as disconnected to peers.
    pub down: bool,
    /// Shown to peers with the `handshake` flag.
    pub handshake: bool,
    /// Lists itself with an empty host until it takes part in a MEET.
    pub unmet: bool,
}

impl MockNode {
    fn new(address: &str) -> Self {
        let id = node_id_for(address);
        Self {
            id: id.clone(),
            address: address.to_string(),
            is_master: true,
            master_id: None,
            slots: BTreeSet::new(),
            keys: BTreeMap::new(),
            migrating: BTreeMap::new(),
            importing: BTreeMap::new(),
            known: BTreeSet::from([id]),
            down: false,
            handshake: false,
            unmet: false,
        }
    }

    fn slot_of_key(&self, key: &str) -> Option<u16> {
        self.keys
            .iter()
            .find(|(_, keys)| keys.iter().any(|k| k == key))
            .map(|(slot, _)| *slot)
    }
}

/// Deterministic 40-character id derived from the address.
pub fn node_id_for(address: &str) -> String {
    let digits: String = address.chars().filter(char::is_ascii_digit).collect();
    format!("{:0>40}", digits)
}

/// Shared state of the simulated cluster.
#[derive(Debug, Default)]
pub struct ClusterState {
    pub nodes: BTreeMap<String, MockNode>,
    /// Commands in issue order, as `"<address> <COMMAND> <args...>"`.
    pub calls: Vec<String>,
    /// `CLUSTER NODES` reads a peer needs before it learns about a met node.
    /// `None` means gossip never delivers.
    pub gossip_lag: Option<u32>,
    /// Outstanding gossip: (observer address, learned id, reads remaining).
    pending_gossip: Vec<(String, String, u32)>,
    /// Fail the `MIGRATE` after this many succeeded.
    pub fail_migrate_after: Option<usize>,
    migrates_done: usize,
    /// Commands (by name) that fail on a given address.
    pub failing: BTreeSet<(String, String)>,
}

impl ClusterState {
    fn node(&self, address: &str) -> Result<&MockNode, ValkeyError> {
        self.nodes
            .get(address)
            .ok_or_else(|| ValkeyError::Connection(format!("no node at {}", address)))
    }

    fn node_mut(&mut self, address: &str) -> Result<&mut MockNode, ValkeyError> {
        self.nodes
            .get_mut(address)
            .ok_or_else(|| ValkeyError::Connection(format!("no node at {}", address)))
    }

    fn address_of(&self, id: &str) -> Option<String> {
        self.nodes
            .values()
            .find(|n| n.id == id)
            .map(|n| n.address.clone())
    }

    fn check(&self, address: &str, command: &str) -> Result<(), ValkeyError> {
        let node = self.node(address)?;
        if node.down {
            return Err(ValkeyError::Connection(format!("{} is down", address)));
        }
        if self
            .failing
            .contains(&(address.to_string(), command.to_string()))
        {
            return Err(reply_error(format!("{} rejected on {}", command, address)));
        }
        Ok(())
    }

    fn render(&mut self, observer: &str) -> Result<String, ValkeyError> {
        self.deliver_gossip(observer);
        let me = self.node(observer)?;
        let mut lines = Vec::new();
        for id in &me.known {
            let Some(node) = self.nodes.values().find(|n| &n.id == id) else {
                continue;
            };
            let endpoint = Endpoint::parse(&node.address)
                .map_err(|e| ValkeyError::Connection(e.to_string()))?;

            let mut flags = Vec::new();
            if node.id == me.id {
                flags.push("myself");
            }
            if node.handshake && node.id != me.id {
                flags.push("handshake");
            } else {
                flags.push(if node.is_master { "master" } else { "slave" });
            }
            if node.down {
                flags.push("fail");
            }
            let link = if node.down { "disconnected" } else { "connected" };

            let host = if node.id == me.id && node.unmet {
                ""
            } else {
                endpoint.host()
            };
            let mut line = format!(
                "{} {}:{}@{} {} {} 0 0 1 {}",
                node.id,
                host,
                endpoint.port(),
                endpoint.cluster_bus_port(),
                flags.join(","),
                node.master_id.as_deref().unwrap_or("-"),
                link,
            );
            for range in compact_slots(node.slots.iter().copied()) {
                line.push(' ');
                line.push_str(&range.to_string());
            }
            if node.id == me.id {
                for (slot, peer) in &node.migrating {
                    line.push_str(&format!(" [{}->-{}]", slot, peer));
                }
                for (slot, peer) in &node.importing {
                    line.push_str(&format!(" [{}-<-{}]", slot, peer));
                }
            }
            lines.push(line);
        }
        Ok(lines.join("\n") + "\n")
    }

    fn deliver_gossip(&mut self, observer: &str) {
        let mut learned = Vec::new();
        for (who, id, remaining) in &mut self.pending_gossip {
            if who == observer {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    learned.push(id.clone());
                }
            }
        }
        self.pending_gossip
            .retain(|(who, _, remaining)| who != observer || *remaining > 0);
        if let Some(node) = self.nodes.get_mut(observer) {
            node.known.extend(learned);
        }
    }

    fn meet(&mut self, origin: &str, target: &str) -> Result<(), ValkeyError> {
        let origin_known = self.node(origin)?.known.clone();
        let origin_id = self.node(origin)?.id.clone();
        let target_id = self.node(target)?.id.clone();

        self.node_mut(target)?.known.extend(origin_known.iter().cloned());
        self.node_mut(origin)?.known.insert(target_id.clone());
        self.node_mut(target)?.unmet = false;
        self.node_mut(origin)?.unmet = false;

        for id in origin_known.iter().filter(|id| **id != origin_id) {
            let Some(peer) = self.address_of(id) else {
                continue;
            };
            match self.gossip_lag {
                Some(0) => {
                    self.node_mut(&peer)?.known.insert(target_id.clone());
                }
                Some(lag) => self.pending_gossip.push((peer, target_id.clone(), lag)),
                None => {}
            }
        }
        Ok(())
    }

    fn owner_of(&self, slot: u16) -> Option<&MockNode> {
        self.nodes.values().find(|n| n.slots.contains(&slot))
    }
}

fn reply_error(message: String) -> ValkeyError {
    ValkeyError::UnexpectedReply {
        command: "mock".to_string(),
        reply: message,
    }
}

/// Handle to a simulated cluster, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MockCluster {
    pub fn new() -> Self {
        let cluster = Self::default();
        cluster.state().gossip_lag = Some(0);
        cluster
    }

    pub fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().expect("mock cluster state poisoned")
    }

    /// A standalone node that knows only itself.
    pub fn add_node(&self, address: &str) -> String {
        let node = MockNode::new(address);
        let id = node.id.clone();
        self.state().nodes.insert(address.to_string(), node);
        id
    }

    /// A master owning `slots`, already meshed with every existing node.
    pub fn add_master(&self, address: &str, slots: impl IntoIterator<Item = u16>) -> String {
        let id = self.add_node(address);
        self.mesh(address);
        self.state()
            .nodes
            .get_mut(address)
            .expect("node just added")
            .slots
            .extend(slots);
        id
    }

    /// A slave of `master`, already meshed with every existing node.
    pub fn add_slave(&self, address: &str, master: &str) -> String {
        let id = self.add_node(address);
        self.mesh(address);
        let master_id = node_id_for(master);
        let mut state = self.state();
        let node = state.nodes.get_mut(address).expect("node just added");
        node.is_master = false;
        node.master_id = Some(master_id);
        id
    }

    /// Make `address` and every other node know each other.
    fn mesh(&self, address: &str) {
        let mut state = self.state();
        let ids: BTreeSet<String> = state.nodes.values().map(|n| n.id.clone()).collect();
        for node in state.nodes.values_mut() {
            if node.address == address {
                node.known.extend(ids.iter().cloned());
            } else {
                node.known.insert(node_id_for(address));
            }
        }
    }

    pub fn add_keys(&self, address: &str, slot: u16, keys: &[&str]) {
        let mut state = self.state();
        let node = state.nodes.get_mut(address).expect("unknown node");
        node.keys
            .entry(slot)
            .or_default()
            .extend(keys.iter().map(|k| k.to_string()));
    }

    pub fn set_down(&self, address: &str, down: bool) {
        self.state().nodes.get_mut(address).expect("unknown node").down = down;
    }

    /// A standalone node that reports itself without a host.
    pub fn add_unmet_node(&self, address: &str) -> String {
        let id = self.add_node(address);
        self.state().nodes.get_mut(address).expect("node just added").unmet = true;
        id
    }

    pub fn set_handshake(&self, address: &str, handshake: bool) {
        self.state().nodes.get_mut(address).expect("unknown node").handshake = handshake;
    }

    pub fn set_gossip_lag(&self, lag: Option<u32>) {
        self.state().gossip_lag = lag;
    }

    pub fn fail_migrate_after(&self, succeeded: usize) {
        self.state().fail_migrate_after = Some(succeeded);
    }

    pub fn fail_command(&self, address: &str, command: &str) {
        self.state()
            .failing
            .insert((address.to_string(), command.to_string()));
    }

    pub fn node(&self, address: &str) -> MockNode {
        self.state().nodes.get(address).cloned().expect("unknown node")
    }

    pub fn id(&self, address: &str) -> String {
        node_id_for(address)
    }

    /// Logged commands.
    pub fn commands(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn clear_commands(&self) {
        self.state().calls.clear();
    }

    /// Position of the first logged command starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.state().calls.iter().position(|c| c.starts_with(prefix))
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            cluster: self.clone(),
        }
    }
}

/// Opens [`MockConnection`]s to nodes of a [`MockCluster`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    cluster: MockCluster,
}

impl Connector for MockConnector {
    type Conn = MockConnection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<MockConnection, ValkeyError> {
        let address = endpoint.to_string();
        self.cluster.state().check(&address, "CONNECT")?;
        Ok(MockConnection {
            cluster: self.cluster.clone(),
            address,
        })
    }
}

/// A connection to one simulated node.
#[derive(Debug)]
pub struct MockConnection {
    cluster: MockCluster,
    address: String,
}

impl MockConnection {
    fn begin(
        &self,
        command: &str,
        args: &[String],
    ) -> Result<MutexGuard<'_, ClusterState>, ValkeyError> {
        let mut state = self.cluster.state();
        let mut entry = format!("{} {}", self.address, command);
        for arg in args {
            entry.push(' ');
            entry.push_str(arg);
        }
        state.calls.push(entry);
        state.check(&self.address, command)?;
        Ok(state)
    }
}

impl ClusterOps for MockConnection {
    async fn cluster_nodes_raw(&self) -> Result<String, ValkeyError> {
        let mut state = self.cluster.state();
        state.check(&self.address, "CLUSTER NODES")?;
        state.render(&self.address)
    }

    async fn cluster_meet(&self, ip: &str, port: u16) -> Result<(), ValkeyError> {
        let target = Endpoint::new(ip, port).to_string();
        let mut state = self.begin("CLUSTER MEET", &[ip.to_string(), port.to_string()])?;
        state.check(&target, "MEET")?;
        state.meet(&self.address, &target)
    }

    async fn cluster_forget(&self, node_id: &str) -> Result<(), ValkeyError> {
        let mut state = self.begin("CLUSTER FORGET", &[node_id.to_string()])?;
        let node = state.node_mut(&self.address)?;
        if node.id == node_id {
            return Err(reply_error("I tried hard but I can't forget myself".to_string()));
        }
        if !node.known.remove(node_id) {
            return Err(reply_error(format!("Unknown node {}", node_id)));
        }
        Ok(())
    }

    async fn cluster_replicate(&self, master_node_id: &str) -> Result<(), ValkeyError> {
        let mut state = self.begin("CLUSTER REPLICATE", &[master_node_id.to_string()])?;
        let master = state
            .address_of(master_node_id)
            .ok_or_else(|| reply_error(format!("Unknown node {}", master_node_id)))?;
        if !state.node(&master)?.is_master {
            return Err(reply_error("I can only replicate a master".to_string()));
        }
        let node = state.node_mut(&self.address)?;
        if !node.slots.is_empty() {
            return Err(reply_error(
                "To set a master the node must be empty".to_string(),
            ));
        }
        node.is_master = false;
        node.master_id = Some(master_node_id.to_string());
        Ok(())
    }

    async fn cluster_failover(&self) -> Result<(), ValkeyError> {
        let mut state = self.begin("CLUSTER FAILOVER", &[])?;
        let node = state.node(&self.address)?;
        let Some(old_master_id) = node.master_id.clone().filter(|_| !node.is_master) else {
            return Err(reply_error(
                "You should send CLUSTER FAILOVER to a replica".to_string(),
            ));
        };
        let new_id = node.id.clone();
        let old_master = state
            .address_of(&old_master_id)
            .ok_or_else(|| reply_error("master unknown".to_string()))?;

        let old = state.node_mut(&old_master)?;
        let slots = std::mem::take(&mut old.slots);
        let keys = std::mem::take(&mut old.keys);
        old.is_master = false;
        old.master_id = Some(new_id.clone());

        for node in state.nodes.values_mut() {
            if node.master_id.as_deref() == Some(old_master_id.as_str()) && node.id != new_id {
                node.master_id = Some(new_id.clone());
            }
        }

        let promoted = state.node_mut(&self.address)?;
        promoted.is_master = true;
        promoted.master_id = None;
        promoted.slots = slots;
        promoted.keys = keys;
        Ok(())
    }

    async fn cluster_add_slots(&self, slots: Vec<u16>) -> Result<(), ValkeyError> {
        let args: Vec<String> = slots.iter().map(u16::to_string).collect();
        let mut state = self.begin("CLUSTER ADDSLOTS", &args)?;
        if let Some(slot) = slots.iter().find(|s| state.owner_of(**s).is_some()) {
            return Err(reply_error(format!("Slot {} is already busy", slot)));
        }
        state.node_mut(&self.address)?.slots.extend(slots);
        Ok(())
    }

    async fn cluster_setslot(
        &self,
        slot: u16,
        state_arg: ClusterSetSlotState,
    ) -> Result<(), ValkeyError> {
        let mut args = vec![slot.to_string(), state_arg.keyword().to_string()];
        args.extend(state_arg.node_id().map(str::to_string));
        let mut state = self.begin("CLUSTER SETSLOT", &args)?;
        let node = state.node_mut(&self.address)?;
        match state_arg {
            ClusterSetSlotState::Migrating(id) => {
                node.migrating.insert(slot, id);
            }
            ClusterSetSlotState::Importing(id) => {
                node.importing.insert(slot, id);
            }
            ClusterSetSlotState::Node(id) => {
                node.migrating.remove(&slot);
                node.importing.remove(&slot);
                if node.id == id {
                    node.slots.insert(slot);
                } else {
                    node.slots.remove(&slot);
                }
            }
            ClusterSetSlotState::Stable => {
                node.migrating.remove(&slot);
                node.importing.remove(&slot);
            }
        }
        Ok(())
    }

    async fn cluster_count_keys_in_slot(&self, slot: u16) -> Result<u64, ValkeyError> {
        let state = self.begin("CLUSTER COUNTKEYSINSLOT", &[slot.to_string()])?;
        let count = state
            .node(&self.address)?
            .keys
            .get(&slot)
            .map_or(0, Vec::len);
        Ok(count as u64)
    }

    async fn cluster_get_keys_in_slot(
        &self,
        slot: u16,
        count: u64,
    ) -> Result<Vec<String>, ValkeyError> {
        let state = self.begin("CLUSTER GETKEYSINSLOT", &[slot.to_string(), count.to_string()])?;
        let keys = state
            .node(&self.address)?
            .keys
            .get(&slot)
            .map(|keys| keys.iter().take(count as usize).cloned().collect())
            .unwrap_or_default();
        Ok(keys)
    }

    async fn migrate(
        &self,
        host: &str,
        port: u16,
        key: &str,
        db: u8,
        timeout_ms: u64,
    ) -> Result<(), ValkeyError> {
        let target = Endpoint::new(host, port).to_string();
        let mut state = self.begin(
            "MIGRATE",
            &[
                host.to_string(),
                port.to_string(),
                key.to_string(),
                db.to_string(),
                timeout_ms.to_string(),
            ],
        )?;
        state.check(&target, "MIGRATE")?;
        if state
            .fail_migrate_after
            .is_some_and(|limit| state.migrates_done >= limit)
        {
            return Err(reply_error("IOERR error or timeout writing to target".to_string()));
        }

        let source = state.node_mut(&self.address)?;
        let slot = source
            .slot_of_key(key)
            .ok_or_else(|| reply_error("NOKEY".to_string()))?;
        if let Some(keys) = source.keys.get_mut(&slot) {
            keys.retain(|k| k != key);
        }
        state
            .node_mut(&target)?
            .keys
            .entry(slot)
            .or_default()
            .push(key.to_string());
        state.migrates_done += 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), ValkeyError> {
        Ok(())
    }
}
