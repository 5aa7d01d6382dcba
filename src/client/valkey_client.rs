//! Valkey client wrapper using the fred crate.
//!
//! Each [`ValkeyClient`] is a centralized (single node) connection. Cluster
//! administration commands are addressed to one specific node, so the cluster
//! aware routing in fred is never used here.

use std::time::Duration;

use fred::prelude::*;
use fred::types::{ClusterHash, CustomCommand};
use thiserror::Error;
use tracing::{debug, instrument};

use super::cluster_ops::{ClusterOps, Connector};
use super::types::ClusterSetSlotState;
use crate::topology::Endpoint;

/// Errors that can occur during Valkey operations.
#[derive(Error, Debug)]
pub enum ValkeyError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] crate::client::types::ParseError),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },
}

/// Connection settings shared by every node connection.
#[derive(Clone, Debug)]
pub struct ValkeyClientConfig {
    /// Connection timeout.
    pub connection_timeout: Duration,
    /// Command timeout.
    pub command_timeout: Duration,
    /// Password for authentication.
    pub password: Option<String>,
}

impl Default for ValkeyClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            password: None,
        }
    }
}

impl ValkeyClientConfig {
    /// Set password.
    pub fn with_password(mut self, password: String) -> Self {
        self.password = Some(password);
        self
    }

    /// Set connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// Valkey client bound to one cluster node.
pub struct ValkeyClient {
    client: Client,
    endpoint: Endpoint,
}

impl ValkeyClient {
    /// Connect to a single node.
    #[instrument(skip(config), fields(address = %endpoint))]
    pub async fn connect(
        endpoint: &Endpoint,
        config: &ValkeyClientConfig,
    ) -> Result<Self, ValkeyError> {
        let server_config = ServerConfig::Centralized {
            server: Server::new(endpoint.host(), endpoint.port()),
        };

        let mut redis_config = Config {
            server: server_config,
            ..Default::default()
        };

        if let Some(ref password) = config.password {
            redis_config.password = Some(password.clone());
        }

        let command_timeout = config.command_timeout;
        let connection_timeout = config.connection_timeout;

        let client = Builder::from_config(redis_config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = command_timeout;
            })
            .with_connection_config(|conn| {
                conn.connection_timeout = connection_timeout;
            })
            .build()?;

        debug!("Connecting to Valkey node");
        match tokio::time::timeout(connection_timeout, client.init()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ValkeyError::Connection(e.to_string())),
            Err(_) => {
                return Err(ValkeyError::Timeout {
                    operation: format!("connect {}", endpoint),
                    duration: connection_timeout,
                });
            }
        }
        debug!("Connected to Valkey node");

        Ok(Self {
            client,
            endpoint: endpoint.clone(),
        })
    }

    /// Send `CLUSTER <args...>` as a raw command.
    ///
    /// fred's typed `cluster_setslot` drops the node id for MIGRATING and
    /// IMPORTING, so those go through here.
    async fn cluster_custom(&self, args: Vec<String>) -> Result<Value, ValkeyError> {
        let cmd = CustomCommand::new_static("CLUSTER", ClusterHash::Random, false);
        let reply: Value = self.client.custom(cmd, args).await?;
        Ok(reply)
    }
}

impl ClusterOps for ValkeyClient {
    #[instrument(skip(self), fields(address = %self.endpoint))]
    async fn cluster_nodes_raw(&self) -> Result<String, ValkeyError> {
        let response: String = self.client.cluster_nodes().await?;
        Ok(response)
    }

    #[instrument(skip(self), fields(address = %self.endpoint))]
    async fn cluster_meet(&self, ip: &str, port: u16) -> Result<(), ValkeyError> {
        self.client.cluster_meet(ip, port).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(address = %self.endpoint))]
    async fn cluster_forget(&self, node_id: &str) -> Result<(), ValkeyError> {
        self.client.cluster_forget(node_id).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(address = %self.endpoint))]
    async fn cluster_replicate(&self, master_node_id: &str) -> Result<(), ValkeyError> {
        self.client.cluster_replicate(master_node_id).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(address = %self.endpoint))]
    async fn cluster_failover(&self) -> Result<(), ValkeyError> {
        self.client.cluster_failover(None).await?;
        Ok(())
    }

    #[instrument(skip(self, slots), fields(address = %self.endpoint, slot_count = slots.len()))]
    async fn cluster_add_slots(&self, slots: Vec<u16>) -> Result<(), ValkeyError> {
        self.client.cluster_add_slots(slots).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(address = %self.endpoint, state = %state))]
    async fn cluster_setslot(
        &self,
        slot: u16,
        state: ClusterSetSlotState,
    ) -> Result<(), ValkeyError> {
        let mut args = vec![
            "SETSLOT".to_string(),
            slot.to_string(),
            state.keyword().to_string(),
        ];
        if let Some(id) = state.node_id() {
            args.push(id.to_string());
        }
        self.cluster_custom(args).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(address = %self.endpoint))]
    async fn cluster_count_keys_in_slot(&self, slot: u16) -> Result<u64, ValkeyError> {
        let count: u64 = self.client.cluster_count_keys_in_slot(slot).await?;
        Ok(count)
    }

    #[instrument(skip(self), fields(address = %self.endpoint))]
    async fn cluster_get_keys_in_slot(
        &self,
        slot: u16,
        count: u64,
    ) -> Result<Vec<String>, ValkeyError> {
        let keys: Vec<String> = self.client.cluster_get_keys_in_slot(slot, count).await?;
        Ok(keys)
    }

    #[instrument(skip(self, key), fields(address = %self.endpoint))]
    async fn migrate(
        &self,
        host: &str,
        port: u16,
        key: &str,
        db: u8,
        timeout_ms: u64,
    ) -> Result<(), ValkeyError> {
        // MIGRATE host port key db timeout
        let cmd = CustomCommand::new_static("MIGRATE", ClusterHash::Random, false);
        let args = vec![
            host.to_string(),
            port.to_string(),
            key.to_string(),
            db.to_string(),
            timeout_ms.to_string(),
        ];
        let reply: String = self.client.custom(cmd, args).await?;
        match reply.as_str() {
            "OK" | "NOKEY" => Ok(()),
            other => Err(ValkeyError::UnexpectedReply {
                command: "MIGRATE".to_string(),
                reply: other.to_string(),
            }),
        }
    }

    async fn close(&self) -> Result<(), ValkeyError> {
        self.client.quit().await?;
        Ok(())
    }
}

/// Opens [`ValkeyClient`] connections with a shared configuration.
#[derive(Clone, Debug, Default)]
pub struct ValkeyConnector {
    config: ValkeyClientConfig,
}

impl ValkeyConnector {
    pub fn new(config: ValkeyClientConfig) -> Self {
        Self { config }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ValkeyClientConfig {
        &self.config
    }
}

impl Connector for ValkeyConnector {
    type Conn = ValkeyClient;

    async fn connect(&self, endpoint: &Endpoint) -> Result<ValkeyClient, ValkeyError> {
        ValkeyClient::connect(endpoint, &self.config).await
    }
}
