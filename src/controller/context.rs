//! Controller state shared by every reconciliation step.
//!
//! The [`Controller`] owns both topology tables and the connection pool for
//! one invocation. All commands and poll sleeps race its cancellation token.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::{ClusterOps, Connector, ValkeyError};
use crate::topology::{Endpoint, TopologyDocument, TopologyTable, parse_observed_from};

use super::error::{Error, Result};

/// Default time between gossip convergence checks.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of convergence checks before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default `MIGRATE` timeout in milliseconds.
pub const DEFAULT_MIGRATE_TIMEOUT_MS: u64 = 5000;

/// Default number of keys requested per `CLUSTER GETKEYSINSLOT`.
pub const DEFAULT_KEY_BATCH: u64 = 1000;

/// Tunables for reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Time between gossip convergence checks.
    pub retry_interval: Duration,
    /// Convergence checks before `ConvergenceTimeout`.
    pub max_retries: u32,
    /// Per-key `MIGRATE` timeout.
    pub migrate_timeout_ms: u64,
    /// Database index passed to `MIGRATE`.
    pub migrate_db: u8,
    /// Keys enumerated per `CLUSTER GETKEYSINSLOT`.
    pub key_batch: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            migrate_timeout_ms: DEFAULT_MIGRATE_TIMEOUT_MS,
            migrate_db: 0,
            key_batch: DEFAULT_KEY_BATCH,
        }
    }
}

impl ReconcileConfig {
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_migrate_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.migrate_timeout_ms = timeout_ms;
        self
    }

    pub fn with_migrate_db(mut self, db: u8) -> Self {
        self.migrate_db = db;
        self
    }

    pub fn with_key_batch(mut self, batch: u64) -> Self {
        self.key_batch = batch.max(1);
        self
    }
}

/// Where the desired topology comes from.
#[derive(Debug, Clone)]
pub enum TopologySource {
    /// A topology document on disk.
    File(PathBuf),
    /// Whatever a live seed node currently reports.
    Host(String),
}

/// Reconciliation controller for one cluster.
pub struct Controller<C: Connector> {
    connector: C,
    config: ReconcileConfig,
    pub(crate) desired: TopologyTable,
    pub(crate) observed: TopologyTable,
    connections: HashMap<String, Arc<C::Conn>>,
    /// Nodes tried first for cluster-wide reads; the last one that answered leads.
    seeds: Vec<String>,
    /// Node whose `CLUSTER NODES` reply built the current `observed`.
    answered: Option<String>,
    logfile: String,
    cancel: CancellationToken,
}

impl<C: Connector> Controller<C> {
    /// Create a controller with empty tables.
    pub fn new(connector: C, config: ReconcileConfig) -> Self {
        Self {
            connector,
            config,
            desired: TopologyTable::new(),
            observed: TopologyTable::new(),
            connections: HashMap::new(),
            seeds: Vec::new(),
            answered: None,
            logfile: String::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use an external cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Take the desired table and log destination from a document.
    pub fn with_document(mut self, document: &TopologyDocument) -> Result<Self> {
        self.desired = document.to_table()?;
        self.logfile = document.logfile.clone();
        Ok(self)
    }

    /// Replace the desired table.
    pub fn with_desired(mut self, desired: TopologyTable) -> Self {
        self.desired = desired;
        self
    }

    /// Add a node to try for cluster-wide reads and `CLUSTER MEET`.
    pub fn add_seed(&mut self, address: &str) -> Result<()> {
        let address = Endpoint::parse(address)?.to_string();
        if !self.seeds.contains(&address) {
            self.seeds.push(address);
        }
        Ok(())
    }

    /// Load the desired topology and take the first observed snapshot.
    ///
    /// A `Host` source makes the live topology the desired one.
    #[instrument(skip(connector, config, cancel))]
    pub async fn bootstrap(
        connector: C,
        config: ReconcileConfig,
        source: TopologySource,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut controller = Self::new(connector, config).with_cancellation(cancel);
        match source {
            TopologySource::File(path) => {
                let document = TopologyDocument::load(&path)?;
                controller = controller.with_document(&document)?;
                controller.refresh().await?;
            }
            TopologySource::Host(address) => {
                controller.add_seed(&address)?;
                controller.refresh().await?;
                controller.desired = controller.observed.clone();
            }
        }
        info!(
            desired = controller.desired.len(),
            observed = controller.observed.len(),
            "Controller ready"
        );
        Ok(controller)
    }

    pub fn desired(&self) -> &TopologyTable {
        &self.desired
    }

    pub fn desired_mut(&mut self) -> &mut TopologyTable {
        &mut self.desired
    }

    pub fn observed(&self) -> &TopologyTable {
        &self.observed
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn logfile(&self) -> &str {
        &self.logfile
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Connection to `address`, opened on first use and cached.
    pub(crate) async fn connection(&mut self, address: &str) -> Result<Arc<C::Conn>> {
        if let Some(conn) = self.connections.get(address) {
            return Ok(Arc::clone(conn));
        }

        let endpoint = Endpoint::parse(address)?;
        debug!(address = %address, "Opening connection");
        let conn = self
            .call(address, "CONNECT", self.connector.connect(&endpoint))
            .await?;
        let conn = Arc::new(conn);
        self.connections.insert(address.to_string(), Arc::clone(&conn));
        Ok(conn)
    }

    pub(crate) fn connector(&self) -> &C {
        &self.connector
    }

    /// Cached connection to `address`, without opening one.
    pub(crate) fn cached_connection(&self, address: &str) -> Option<Arc<C::Conn>> {
        self.connections.get(address).cloned()
    }

    /// Keep a connection opened outside [`Controller::connection`].
    pub(crate) fn cache_connection(&mut self, address: &str, conn: Arc<C::Conn>) {
        self.connections.entry(address.to_string()).or_insert(conn);
    }

    /// Drop and close a cached connection.
    pub(crate) async fn drop_connection(&mut self, address: &str) {
        if let Some(conn) = self.connections.remove(address)
            && let Err(e) = conn.close().await
        {
            debug!(address = %address, error = %e, "Error closing connection");
        }
    }

    /// Await a wire command, mapping failures to `CommandFailed`.
    pub(crate) async fn call<T>(
        &self,
        address: &str,
        command: &'static str,
        fut: impl Future<Output = std::result::Result<T, ValkeyError>>,
    ) -> Result<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = fut => result.map_err(|source| Error::CommandFailed {
                address: address.to_string(),
                command,
                source,
            }),
        }
    }

    /// Sleep unless cancelled.
    pub(crate) async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Rebuild `observed` from the first node that answers `CLUSTER NODES`.
    ///
    /// Unreachable nodes are skipped; a reply that does not parse is fatal.
    #[instrument(skip(self))]
    pub async fn refresh(&mut self) -> Result<()> {
        let candidates = self.refresh_candidates();

        for address in &candidates {
            match self.fetch_observed(address).await {
                Ok(table) => {
                    debug!(source = %address, nodes = table.len(), "Refreshed observed topology");
                    self.observed = table;
                    self.answered = Some(address.clone());
                    self.promote_seed(address);
                    return Ok(());
                }
                Err(e @ (Error::MalformedTopology(_) | Error::Cancelled)) => return Err(e),
                Err(e) => {
                    warn!(address = %address, error = %e, "Node unavailable for refresh");
                    self.drop_connection(address).await;
                }
            }
        }

        Err(Error::NoReachableNode(candidates))
    }

    async fn fetch_observed(&mut self, address: &str) -> Result<TopologyTable> {
        let source = Endpoint::parse(address)?;
        let conn = self.connection(address).await?;
        let raw = self
            .call(address, "CLUSTER NODES", conn.cluster_nodes_raw())
            .await?;
        Ok(parse_observed_from(&raw, &source)?)
    }

    /// Seeds, then connected observed nodes, then desired nodes.
    fn refresh_candidates(&self) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        let observed = self
            .observed
            .iter()
            .filter(|n| n.is_connected())
            .map(|n| &n.address);
        for address in self
            .seeds
            .iter()
            .chain(observed)
            .chain(self.desired.iter().map(|n| &n.address))
        {
            if !candidates.contains(address) {
                candidates.push(address.clone());
            }
        }
        candidates
    }

    fn promote_seed(&mut self, address: &str) {
        self.seeds.retain(|s| s != address);
        self.seeds.insert(0, address.to_string());
    }

    /// Stop using a node for cluster-wide reads.
    pub(crate) fn forget_seed(&mut self, address: &str) {
        self.seeds.retain(|s| s != address);
        if self.answered.as_deref() == Some(address) {
            self.answered = None;
        }
    }

    /// A live node other than `exclude` to issue cluster-wide commands from.
    ///
    /// The node that answered the last refresh is preferred even when it
    /// lists itself under another address.
    pub(crate) fn origin_for(&self, exclude: &str) -> Result<String> {
        let live_seed = self
            .seeds
            .iter()
            .filter(|s| s.as_str() != exclude)
            .find(|s| self.observed.get(s).is_some_and(|n| n.is_connected()));

        self.answered
            .iter()
            .find(|s| s.as_str() != exclude)
            .or(live_seed)
            .or_else(|| {
                self.observed
                    .iter()
                    .filter(|n| n.address != exclude && n.is_connected())
                    .map(|n| &n.address)
                    .next()
            })
            .cloned()
            .ok_or_else(|| Error::NoReachableNode(self.seeds.clone()))
    }

    /// Log both tables.
    pub fn describe(&self) {
        for (label, table) in [("desired", &self.desired), ("observed", &self.observed)] {
            info!(table = label, nodes = table.len(), "Topology");
            for node in table.iter() {
                info!(
                    table = label,
                    address = %node.address,
                    role = %node.role,
                    master = node.master_address.as_deref().unwrap_or("-"),
                    id = %node.id,
                    link = %node.link,
                    slots = %node.slots_display(),
                    "Node"
                );
            }
        }
    }

    /// Close every cached connection.
    pub async fn shutdown(&mut self) {
        let addresses: Vec<String> = self.connections.keys().cloned().collect();
        for address in addresses {
            self.drop_connection(&address).await;
        }
        debug!("Closed all connections");
    }
}
