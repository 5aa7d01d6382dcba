//! Pure slot management logic for Valkey clusters.
//!
//! This module separates deciding "what happens to this slot" from issuing
//! the commands that do it.
//!
//! ## Module Structure
//!
//! - [`range`]: Slot ranges and the fixed slot space
//! - [`planner`]: Per-slot reconciliation decisions and conflict detection
//! - [`migration`]: State machine for the migration protocol

pub mod migration;
pub mod planner;
pub mod range;

// Re-export commonly used types
pub use migration::{MigrationState, SlotMigrationTracker};
pub use planner::{SlotConflict, SlotStep, conflicting_slots, next_step, owner_run};
pub use range::{InvalidSlotRange, MAX_SLOT, SlotRange, TOTAL_SLOTS, compact_slots};
