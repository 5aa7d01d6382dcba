//! Role reconciliation: make each desired node the master or slave it is
//! declared as.

use tracing::{debug, info, instrument, warn};

use crate::client::{ClusterOps, Connector, NodeRole};
use crate::topology::NodeRecord;

use super::context::Controller;
use super::error::{Error, Result};

impl<C: Connector> Controller<C> {
    /// Reconcile the role of every desired node, then refresh once.
    #[instrument(skip(self))]
    pub async fn reconcile_roles(&mut self) -> Result<()> {
        let nodes: Vec<NodeRecord> = self.desired.iter().cloned().collect();
        info!(nodes = nodes.len(), "Checking node roles");

        for node in &nodes {
            self.reconcile_role(node).await?;
        }

        self.refresh().await
    }

    async fn reconcile_role(&mut self, desired: &NodeRecord) -> Result<()> {
        let address = desired.address.as_str();

        if desired.role == NodeRole::Handshake {
            return Err(Error::UnknownRole {
                node: address.to_string(),
                role: desired.role.to_string(),
            });
        }

        let Some(current) = self.observed.get(address) else {
            info!(address = %address, "Node not in cluster, adding it");
            return self.add_host(address, desired.role).await;
        };

        if current.role == NodeRole::Handshake {
            return Err(Error::NodeInHandshake(address.to_string()));
        }

        if current.role == desired.role {
            if desired.is_slave() && current.master_address != desired.master_address {
                warn!(
                    address = %address,
                    declared = desired.master_address.as_deref().unwrap_or("-"),
                    actual = current.master_address.as_deref().unwrap_or("-"),
                    "Slave replicates a different master than declared"
                );
            } else {
                debug!(address = %address, role = %desired.role, "Role already correct");
            }
            return Ok(());
        }

        info!(
            address = %address,
            desired = %desired.role,
            observed = %current.role,
            "Node has the wrong role, fixing it"
        );

        match desired.role {
            NodeRole::Master => {
                // later nodes in this pass must see the promotion
                self.failover(address).await?;
                self.wait_for_role(address, NodeRole::Master).await
            }
            NodeRole::Slave => {
                let master = self.declared_master(address)?;

                if !self.observed.contains(&master) {
                    let master_role = self
                        .desired
                        .get(&master)
                        .map(|n| n.role)
                        .ok_or_else(|| Error::MasterNotFound {
                            node: address.to_string(),
                            master: master.clone(),
                        })?;
                    self.add_host(&master, master_role).await?;
                }

                if self.observed.get(&master).is_some_and(|m| m.is_slave()) {
                    info!(
                        address = %address,
                        master = %master,
                        "Declared master is a slave, failing it over first"
                    );
                    self.failover(&master).await?;
                    self.wait_for_role(&master, NodeRole::Master).await?;
                }

                self.replicate(address, &master).await
            }
            NodeRole::Handshake => Err(Error::UnknownRole {
                node: address.to_string(),
                role: desired.role.to_string(),
            }),
        }
    }

    /// `CLUSTER FAILOVER` on a slave, promoting it over its master.
    pub(crate) async fn failover(&mut self, address: &str) -> Result<()> {
        info!(address = %address, "Failing over");
        let conn = self.connection(address).await?;
        self.call(address, "CLUSTER FAILOVER", conn.cluster_failover())
            .await
    }

    /// Refresh until `address` is observed with `role`.
    async fn wait_for_role(&mut self, address: &str, role: NodeRole) -> Result<()> {
        let attempts = self.config().max_retries.max(1);
        let interval = self.config().retry_interval;

        for attempt in 1..=attempts {
            self.refresh().await?;
            if self.observed.get(address).is_some_and(|n| n.role == role) {
                debug!(address = %address, role = %role, attempt, "Role change observed");
                return Ok(());
            }
            if attempt < attempts {
                self.pause(interval).await?;
            }
        }

        Err(Error::ConvergenceTimeout {
            address: address.to_string(),
            attempts,
        })
    }
}
