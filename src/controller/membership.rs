//! Joining nodes to the cluster and forgetting them.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tracing::{debug, info, instrument, warn};

use crate::client::{ClusterOps, Connector, NodeRole, ValkeyError};
use crate::topology::Endpoint;

use super::context::Controller;
use super::error::{Error, Result};

impl<C: Connector> Controller<C> {
    /// Join `address` to the cluster with the given role.
    ///
    /// A slave's declared master (from the desired table) is joined first when
    /// it is not yet in the cluster.
    #[instrument(skip(self), fields(role = %role))]
    pub async fn add_host(&mut self, address: &str, role: NodeRole) -> Result<()> {
        let mut visited = Vec::new();
        self.join(address.to_string(), role, &mut visited).await
    }

    fn join<'a>(
        &'a mut self,
        address: String,
        role: NodeRole,
        visited: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let endpoint = Endpoint::parse(&address)?;
            let address = endpoint.to_string();

            if role == NodeRole::Handshake {
                return Err(Error::UnknownRole {
                    node: address,
                    role: role.to_string(),
                });
            }

            if visited.contains(&address) {
                let mut chain = visited.clone();
                chain.push(address);
                return Err(Error::MasterCycle(chain));
            }
            visited.push(address.clone());

            if role == NodeRole::Slave {
                self.check_master_chain(&address)?;
            }

            info!(address = %address, role = %role, "Adding node");
            let origin = self.origin_for(&address)?;
            let conn = self.connection(&origin).await?;
            self.call(
                &origin,
                "CLUSTER MEET",
                conn.cluster_meet(endpoint.host(), endpoint.port()),
            )
            .await?;

            self.wait_for_convergence(&address).await?;
            self.refresh().await?;

            if role == NodeRole::Slave {
                let master = self.declared_master(&address)?;
                if !self.observed.contains(&master) {
                    let master_role = self
                        .desired
                        .get(&master)
                        .map(|n| n.role)
                        .ok_or_else(|| Error::MasterNotFound {
                            node: address.clone(),
                            master: master.clone(),
                        })?;
                    info!(
                        address = %address,
                        master = %master,
                        "Master not in cluster, adding it first"
                    );
                    self.join(master.clone(), master_role, visited).await?;
                }
                self.replicate(&address, &master).await?;
                self.refresh().await?;
            }

            info!(address = %address, "Node added");
            Ok(())
        }
        .boxed()
    }

    /// Master address declared for `address` in the desired table.
    pub(crate) fn declared_master(&self, address: &str) -> Result<String> {
        self.desired
            .get(address)
            .and_then(|n| n.master_address.clone())
            .ok_or_else(|| Error::MasterNotFound {
                node: address.to_string(),
                master: "(none declared)".to_string(),
            })
    }

    /// Follow declared masters from `address` and fail on a loop.
    fn check_master_chain(&self, address: &str) -> Result<()> {
        let mut chain = vec![address.to_string()];
        let mut current = address.to_string();
        while let Some(node) = self.desired.get(&current)
            && node.is_slave()
            && let Some(master) = node.master_address.clone()
        {
            let looped = chain.contains(&master);
            chain.push(master.clone());
            if looped {
                return Err(Error::MasterCycle(chain));
            }
            current = master;
        }
        Ok(())
    }

    /// Point `address` at `master` with `CLUSTER REPLICATE`.
    pub(crate) async fn replicate(&mut self, address: &str, master: &str) -> Result<()> {
        let master_node = self
            .observed
            .get(master)
            .ok_or_else(|| Error::MasterNotFound {
                node: address.to_string(),
                master: master.to_string(),
            })?;
        match master_node.role {
            NodeRole::Slave => {
                return Err(Error::InvalidMasterRole {
                    node: address.to_string(),
                    master: master.to_string(),
                });
            }
            NodeRole::Handshake => return Err(Error::NodeInHandshake(master.to_string())),
            NodeRole::Master => {}
        }
        let master_id = master_node.id.clone();

        info!(address = %address, master = %master, master_id = %master_id, "Replicating");
        let conn = self.connection(address).await?;
        self.call(address, "CLUSTER REPLICATE", conn.cluster_replicate(&master_id))
            .await
    }

    /// Poll until every known slave lists `address`.
    async fn wait_for_convergence(&mut self, address: &str) -> Result<()> {
        let attempts = self.config().max_retries.max(1);
        let interval = self.config().retry_interval;

        for attempt in 1..=attempts {
            if self.visible_everywhere(address).await? {
                debug!(address = %address, attempt, "Node visible cluster-wide");
                return Ok(());
            }
            debug!(address = %address, attempt, attempts, "Waiting for gossip");
            if attempt < attempts {
                self.pause(interval).await?;
            }
        }

        Err(Error::ConvergenceTimeout {
            address: address.to_string(),
            attempts,
        })
    }

    /// One convergence round. Masters count as having seen the node; every
    /// other connected node must report it in its own `CLUSTER NODES`.
    ///
    /// A peer that cannot be reached counts as not having seen it yet.
    async fn visible_everywhere(&mut self, address: &str) -> Result<bool> {
        let peers: Vec<String> = self
            .observed
            .iter()
            .filter(|n| n.address != address && n.is_connected() && !n.is_master())
            .map(|n| n.address.clone())
            .collect();

        let connector = self.connector();
        let checks = peers.into_iter().map(|peer| {
            let cached = self.cached_connection(&peer);
            async move {
                let outcome = async {
                    let conn = match cached {
                        Some(conn) => conn,
                        None => Arc::new(connector.connect(&Endpoint::parse(&peer)?).await?),
                    };
                    let nodes = conn.cluster_nodes().await?;
                    Ok::<_, ValkeyError>((conn, nodes))
                }
                .await;
                (peer, outcome)
            }
        });

        let results = tokio::select! {
            _ = self.cancellation_token().cancelled() => return Err(Error::Cancelled),
            results = join_all(checks) => results,
        };

        let mut seen_everywhere = true;
        for (peer, outcome) in results {
            match outcome {
                Ok((conn, nodes)) => {
                    self.cache_connection(&peer, conn);
                    if !nodes.contains_address(address) {
                        debug!(peer = %peer, address = %address, "Node not yet visible");
                        seen_everywhere = false;
                    }
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Convergence check failed");
                    seen_everywhere = false;
                }
            }
        }
        Ok(seen_everywhere)
    }

    /// Remove `address` from every other reachable node's view.
    #[instrument(skip(self))]
    pub async fn forget_all(&mut self, address: &str) -> Result<()> {
        let address = Endpoint::parse(address)?.to_string();
        let target = self
            .observed
            .get(&address)
            .ok_or_else(|| Error::NodeNotFound(address.clone()))?;
        let target_id = target.id.clone();

        let peers: Vec<String> = self
            .observed
            .iter()
            .filter(|n| n.address != address)
            .filter(|n| {
                if !n.is_connected() {
                    debug!(peer = %n.address, "Skipping disconnected node");
                }
                n.is_connected()
            })
            .map(|n| n.address.clone())
            .collect();

        info!(address = %address, node_id = %target_id, peers = peers.len(), "Forgetting node");
        for peer in peers {
            let conn = self.connection(&peer).await?;
            self.call(&peer, "CLUSTER FORGET", conn.cluster_forget(&target_id))
                .await?;
        }

        self.forget_seed(&address);
        self.drop_connection(&address).await;
        self.refresh().await
    }
}
