//! Slot migration state machine.
//!
//! One slot moves from source `S` to destination `D` in this order:
//! 1. SETSLOT MIGRATING(D) on S
//! 2. SETSLOT IMPORTING(S) on D
//! 3. MIGRATE every key in the slot from S to D
//! 4. SETSLOT NODE(D) on S, on D, then on every other master
//!
//! A failure before step 4 leaves the slot migrating/importing; it is never
//! finalized to D.

use std::fmt;

/// State of a single slot migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MigrationState {
    /// Migration not started.
    #[default]
    Pending,
    /// Source node is migrating (SETSLOT MIGRATING sent).
    Migrating,
    /// Destination node is importing (SETSLOT IMPORTING sent).
    Importing,
    /// Keys are being transferred.
    TransferringKeys {
        /// Number of keys moved so far.
        moved: u64,
        /// Number of keys remaining.
        remaining: u64,
    },
    /// Ownership is being set to the destination.
    Finalizing,
    /// Migration complete.
    Complete,
    /// Migration failed.
    Failed {
        /// Error description.
        error: String,
    },
}

impl MigrationState {
    /// No further transitions are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationState::Complete | MigrationState::Failed { .. }
        )
    }

    /// Ownership may already point at the destination somewhere.
    pub fn is_finalized(&self) -> bool {
        matches!(self, MigrationState::Finalizing | MigrationState::Complete)
    }

    fn can_advance_to(&self, next: &MigrationState) -> bool {
        use MigrationState::*;
        match (self, next) {
            (_, Failed { .. }) => !self.is_terminal(),
            (Pending, Migrating) => true,
            (Migrating, Importing) => true,
            (Importing, TransferringKeys { .. }) => true,
            (TransferringKeys { .. }, TransferringKeys { .. }) => true,
            (Importing | TransferringKeys { .. }, Finalizing) => true,
            (Finalizing, Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationState::Pending => write!(f, "pending"),
            MigrationState::Migrating => write!(f, "migrating"),
            MigrationState::Importing => write!(f, "importing"),
            MigrationState::TransferringKeys { moved, remaining } => {
                write!(f, "transferring ({}/{})", moved, moved + remaining)
            }
            MigrationState::Finalizing => write!(f, "finalizing"),
            MigrationState::Complete => write!(f, "complete"),
            MigrationState::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Tracks the progress of one slot moving between two masters.
#[derive(Debug, Clone)]
pub struct SlotMigrationTracker {
    /// The slot being migrated.
    pub slot: u16,
    /// Source node address.
    pub source: String,
    /// Destination node address.
    pub target: String,
    /// Current state of the migration.
    pub state: MigrationState,
    /// Keys counted in the slot on the source when transfer started.
    pub keys_total: u64,
    /// Total keys migrated so far.
    pub keys_migrated: u64,
}

impl SlotMigrationTracker {
    /// Create a new migration tracker.
    pub fn new(slot: u16, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            slot,
            source: source.into(),
            target: target.into(),
            state: MigrationState::Pending,
            keys_total: 0,
            keys_migrated: 0,
        }
    }

    /// Transition to the next state. Out-of-order transitions are ignored
    /// and reported as `false`.
    pub fn advance(&mut self, next: MigrationState) -> bool {
        if !self.state.can_advance_to(&next) {
            return false;
        }
        self.state = next;
        true
    }

    /// Start the key transfer phase with the counted number of keys.
    pub fn start_transfer(&mut self, keys_total: u64) -> bool {
        self.keys_total = keys_total;
        self.advance(MigrationState::TransferringKeys {
            moved: 0,
            remaining: keys_total,
        })
    }

    /// Record keys as migrated.
    pub fn record_keys_migrated(&mut self, count: u64) {
        self.keys_migrated += count;
        if let MigrationState::TransferringKeys { .. } = self.state {
            self.state = MigrationState::TransferringKeys {
                moved: self.keys_migrated,
                remaining: self.keys_total.saturating_sub(self.keys_migrated),
            };
        }
    }

    /// Mark as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.advance(MigrationState::Failed {
            error: error.into(),
        });
    }

    /// Mark as complete.
    pub fn complete(&mut self) -> bool {
        self.advance(MigrationState::Complete)
    }
}
