//! Slot reconciliation and live slot migration.

use tracing::{debug, info, instrument, warn};

use crate::client::{ClusterOps, ClusterSetSlotState, Connector, NodeRole};
use crate::slots::{MigrationState, SlotMigrationTracker, SlotStep, conflicting_slots, next_step};
use crate::topology::{Endpoint, NodeRecord};

use super::context::Controller;
use super::error::{Error, Result};

impl<C: Connector> Controller<C> {
    /// Give every desired master the slots it declares.
    ///
    /// Unowned slots are added directly; slots owned by another master are
    /// migrated one contiguous run at a time, refreshing after each run.
    #[instrument(skip(self))]
    pub async fn reconcile_slots(&mut self) -> Result<()> {
        let nodes: Vec<NodeRecord> = self
            .desired
            .iter()
            .filter(|n| !n.slots.is_empty())
            .cloned()
            .collect();
        info!(nodes = nodes.len(), "Checking slot ownership");

        for node in &nodes {
            self.reconcile_node_slots(node).await?;
        }

        for conflict in conflicting_slots(&self.observed) {
            warn!(
                slots = %conflict.range,
                first = %conflict.first,
                second = %conflict.second,
                "Slots claimed by more than one master"
            );
        }
        Ok(())
    }

    async fn reconcile_node_slots(&mut self, desired: &NodeRecord) -> Result<()> {
        let address = desired.address.as_str();

        if desired.is_slave() {
            warn!(address = %address, "Slave declares slots, skipping them");
            return Ok(());
        }
        if !self.observed.contains(address) {
            return Err(Error::NodeNotFound(address.to_string()));
        }

        let mut assigned = 0u32;
        for range in &desired.slots {
            let mut slot = u32::from(range.start);
            while let Ok(current) = u16::try_from(slot)
                && current <= range.end
            {
                let step = next_step(&self.observed, address, current, range.end);
                match &step {
                    SlotStep::Assign { slot } => {
                        self.add_slot(address, *slot).await?;
                        assigned += 1;
                    }
                    SlotStep::AlreadyOwned { end } => {
                        debug!(
                            address = %address,
                            from = current,
                            to = *end,
                            "Slots already owned"
                        );
                    }
                    SlotStep::Migrate { source, start, end } => {
                        self.migrate_run(source, address, *start, *end).await?;
                        self.refresh().await?;
                    }
                }
                slot = step.next_slot(current);
            }
        }

        if assigned > 0 {
            info!(address = %address, slots = assigned, "Assigned unowned slots");
            self.refresh().await?;
        }
        Ok(())
    }

    /// `CLUSTER ADDSLOTS` for one unowned slot.
    async fn add_slot(&mut self, address: &str, slot: u16) -> Result<()> {
        debug!(address = %address, slot, "Adding unowned slot");
        let conn = self.connection(address).await?;
        self.call(address, "CLUSTER ADDSLOTS", conn.cluster_add_slots(vec![slot]))
            .await
    }

    /// Move every slot in `[start, end]` from `source` to `target`.
    async fn migrate_run(
        &mut self,
        source: &str,
        target: &str,
        start: u16,
        end: u16,
    ) -> Result<()> {
        info!(source = %source, target = %target, from = start, to = end, "Migrating slots");
        for slot in start..=end {
            self.migrate_slot(source, target, slot).await?;
        }
        Ok(())
    }

    /// Move one slot with its keys from `source` to `target`.
    ///
    /// Any failure before ownership is set leaves the slot migrating on the
    /// source and importing on the target.
    #[instrument(skip(self))]
    pub async fn migrate_slot(&mut self, source: &str, target: &str, slot: u16) -> Result<()> {
        let mut tracker = SlotMigrationTracker::new(slot, source, target);

        match self.run_migration(&mut tracker).await {
            Ok(()) => {
                tracker.complete();
                info!(slot, keys = tracker.keys_migrated, "Slot migrated");
                Ok(())
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                let stage = tracker.state.to_string();
                let finalized = tracker.state.is_finalized();
                tracker.fail(e.to_string());
                warn!(slot, stage = %stage, finalized, "Slot migration failed");
                Err(Error::MigrationFailed {
                    slot,
                    source_address: source.to_string(),
                    target: target.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn run_migration(&mut self, tracker: &mut SlotMigrationTracker) -> Result<()> {
        let slot = tracker.slot;
        let source = tracker.source.clone();
        let target = tracker.target.clone();
        let source_id = self.node_id(&source)?;
        let target_id = self.node_id(&target)?;

        self.set_slot(&source, slot, ClusterSetSlotState::Migrating(target_id.clone()))
            .await?;
        tracker.advance(MigrationState::Migrating);

        self.set_slot(&target, slot, ClusterSetSlotState::Importing(source_id))
            .await?;
        tracker.advance(MigrationState::Importing);

        self.move_keys(tracker).await?;

        tracker.advance(MigrationState::Finalizing);
        let owner = ClusterSetSlotState::Node(target_id);
        self.set_slot(&source, slot, owner.clone()).await?;
        self.set_slot(&target, slot, owner.clone()).await?;

        let others: Vec<String> = self
            .observed
            .masters()
            .filter(|n| n.address != source && n.address != target && n.is_connected())
            .map(|n| n.address.clone())
            .collect();
        for address in others {
            self.set_slot(&address, slot, owner.clone()).await?;
        }
        Ok(())
    }

    /// Migrate every key counted in the slot, one `MIGRATE` per key.
    async fn move_keys(&mut self, tracker: &mut SlotMigrationTracker) -> Result<()> {
        let slot = tracker.slot;
        let source = tracker.source.clone();
        let target = Endpoint::parse(&tracker.target)?;
        let batch = self.config().key_batch;
        let db = self.config().migrate_db;
        let timeout_ms = self.config().migrate_timeout_ms;

        let conn = self.connection(&source).await?;
        let total = self
            .call(&source, "CLUSTER COUNTKEYSINSLOT", conn.cluster_count_keys_in_slot(slot))
            .await?;
        tracker.start_transfer(total);
        debug!(slot, keys = total, "Counted keys in slot");

        let mut remaining = total;
        while remaining > 0 {
            let keys = self
                .call(
                    &source,
                    "CLUSTER GETKEYSINSLOT",
                    conn.cluster_get_keys_in_slot(slot, remaining.min(batch)),
                )
                .await?;
            if keys.is_empty() {
                break;
            }

            for key in &keys {
                self.call(
                    &source,
                    "MIGRATE",
                    conn.migrate(target.host(), target.port(), key, db, timeout_ms),
                )
                .await?;
                tracker.record_keys_migrated(1);
            }
            remaining = remaining.saturating_sub(keys.len() as u64);
        }
        Ok(())
    }

    /// `CLUSTER SETSLOT`; a no-op for slaves.
    async fn set_slot(
        &mut self,
        address: &str,
        slot: u16,
        state: ClusterSetSlotState,
    ) -> Result<()> {
        if self
            .observed
            .get(address)
            .is_some_and(|n| n.role == NodeRole::Slave)
        {
            debug!(address = %address, slot, "Skipping SETSLOT on slave");
            return Ok(());
        }
        let conn = self.connection(address).await?;
        self.call(address, "CLUSTER SETSLOT", conn.cluster_setslot(slot, state))
            .await
    }

    fn node_id(&self, address: &str) -> Result<String> {
        self.observed
            .get(address)
            .map(|n| n.id.clone())
            .ok_or_else(|| Error::NodeNotFound(address.to_string()))
    }
}
