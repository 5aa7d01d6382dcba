//! Slot reconciliation planning - decides what to do with a slot, no I/O.

use crate::topology::TopologyTable;

use super::range::SlotRange;

/// What the slot pass does next for one declared slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStep {
    /// No master owns the slot; add it to the desired node.
    Assign { slot: u16 },
    /// The desired node already owns `[slot, end]`.
    AlreadyOwned { end: u16 },
    /// Another master owns `[slot, end]`; move the run to the desired node.
    Migrate {
        source: String,
        start: u16,
        end: u16,
    },
}

impl SlotStep {
    /// First slot after this step.
    pub fn next_slot(&self, slot: u16) -> u32 {
        match self {
            SlotStep::Assign { .. } => u32::from(slot) + 1,
            SlotStep::AlreadyOwned { end } | SlotStep::Migrate { end, .. } => u32::from(*end) + 1,
        }
    }
}

/// Current owner of `slot` and the longest run `[slot, end]` it holds, with
/// `end <= max`. Only masters that own slots are considered.
pub fn owner_run(observed: &TopologyTable, slot: u16, max: u16) -> Option<(String, u16)> {
    let owner = observed.owner_of(slot)?;

    let mut end = owner.range_containing(slot)?.end;
    // adjacent ranges of the same owner extend the run
    while end < max
        && let Some(next) = owner.range_containing(end + 1)
    {
        end = next.end;
    }

    Some((owner.address.clone(), end.min(max)))
}

/// Decide the next step for `slot` when `desired` should own it, bounded by
/// the end of the declared range.
pub fn next_step(observed: &TopologyTable, desired: &str, slot: u16, max: u16) -> SlotStep {
    match owner_run(observed, slot, max) {
        None => SlotStep::Assign { slot },
        Some((owner, end)) if owner == desired => SlotStep::AlreadyOwned { end },
        Some((source, end)) => SlotStep::Migrate {
            source,
            start: slot,
            end,
        },
    }
}

/// Two masters claiming the same slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotConflict {
    pub range: SlotRange,
    pub first: String,
    pub second: String,
}

/// Find overlapping slot claims between distinct masters.
pub fn conflicting_slots(observed: &TopologyTable) -> Vec<SlotConflict> {
    let mut claims: Vec<(SlotRange, &str)> = observed
        .masters()
        .flat_map(|m| m.slots.iter().map(move |r| (*r, m.address.as_str())))
        .collect();
    claims.sort();

    let mut conflicts = Vec::new();
    for (i, (range, owner)) in claims.iter().enumerate() {
        for (other, other_owner) in claims.iter().skip(i + 1) {
            if other.start > range.end {
                break;
            }
            if owner != other_owner {
                let start = range.start.max(other.start);
                let end = range.end.min(other.end);
                conflicts.push(SlotConflict {
                    range: SlotRange { start, end },
                    first: owner.to_string(),
                    second: other_owner.to_string(),
                });
            }
        }
    }
    conflicts
}
