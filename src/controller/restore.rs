//! Restore and snapshot drivers.

use std::io;
use std::path::Path;

use tracing::{info, instrument};

use crate::client::Connector;
use crate::topology::TopologyDocument;

use super::context::Controller;
use super::error::Result;

impl<C: Connector> Controller<C> {
    /// Converge the cluster on the desired topology.
    ///
    /// Runs, in order and each to completion: forget disconnected nodes, fix
    /// roles, fix slot ownership.
    #[instrument(skip(self))]
    pub async fn restore(&mut self) -> Result<()> {
        info!("Removing disconnected nodes");
        self.remove_disconnected().await?;

        info!("Reconciling roles");
        self.reconcile_roles().await?;

        info!("Reconciling slots");
        self.reconcile_slots().await?;

        info!("Restore complete");
        Ok(())
    }

    /// Forget every node observed as disconnected.
    pub async fn remove_disconnected(&mut self) -> Result<()> {
        let targets: Vec<String> = self
            .observed
            .disconnected()
            .map(|n| n.address.clone())
            .collect();

        for address in targets {
            // an earlier refresh may already have dropped it
            if !self.observed.contains(&address) {
                continue;
            }
            self.forget_all(&address).await?;
        }
        Ok(())
    }

    /// The observed topology as a document.
    pub fn snapshot(&self) -> TopologyDocument {
        TopologyDocument::from_table(&self.observed, self.logfile())
    }

    /// Write the observed topology to `path`, or to stdout when `None`.
    #[instrument(skip(self))]
    pub fn take_snapshot(&self, path: Option<&Path>) -> Result<()> {
        let document = self.snapshot();
        match path {
            Some(path) => {
                document.save(path)?;
                info!(path = %path.display(), nodes = document.schema.len(), "Snapshot saved");
            }
            None => document.write_to(&mut io::stdout().lock())?,
        }
        Ok(())
    }
}
