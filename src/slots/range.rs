//! Hash slot ranges.
//!
//! The slot space is fixed at 16384 slots (`0..=16383`). A [`SlotRange`] is an
//! inclusive pair of slots; it is what `CLUSTER NODES` reports per master and
//! what the topology document declares per node.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Total number of hash slots in a Valkey cluster.
pub const TOTAL_SLOTS: u16 = 16384;

/// Highest valid slot number.
pub const MAX_SLOT: u16 = TOTAL_SLOTS - 1;

/// A slot token or declared range that does not describe `0 <= from <= to <= 16383`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid slot range: {0}")]
pub struct InvalidSlotRange(pub String);

/// A contiguous range of hash slots [start, end] inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotRange {
    /// Start of the slot range (inclusive).
    pub start: u16,
    /// End of the slot range (inclusive).
    pub end: u16,
}

impl SlotRange {
    /// Create a validated slot range.
    pub fn new(start: u16, end: u16) -> Result<Self, InvalidSlotRange> {
        if start > end {
            return Err(InvalidSlotRange(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        if end > MAX_SLOT {
            return Err(InvalidSlotRange(format!(
                "slot {} is outside 0-{}",
                end, MAX_SLOT
            )));
        }
        Ok(Self { start, end })
    }

    /// Create a single-slot range.
    pub fn single(slot: u16) -> Result<Self, InvalidSlotRange> {
        Self::new(slot, slot)
    }

    /// Get the number of slots in this range.
    pub fn count(&self) -> u16 {
        self.end - self.start + 1
    }

    /// Check if this range contains a specific slot.
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Check if two ranges share at least one slot.
    pub fn overlaps(&self, other: &SlotRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Iterate over all slots in this range.
    pub fn iter(&self) -> impl Iterator<Item = u16> + use<> {
        self.start..=self.end
    }

    /// Parse a slot token from `CLUSTER NODES` (e.g. `"0-5460"` or `"5461"`).
    pub fn parse(token: &str) -> Result<Self, InvalidSlotRange> {
        let token = token.trim();
        let parse_slot = |s: &str| -> Result<u16, InvalidSlotRange> {
            s.parse()
                .map_err(|_| InvalidSlotRange(format!("'{}' is not a slot number", s)))
        };

        match token.split_once('-') {
            Some((start, end)) => Self::new(parse_slot(start)?, parse_slot(end)?),
            None => Self::single(parse_slot(token)?),
        }
    }

    /// Build a range from the document form: `[n]` or `[from, to]`.
    pub fn from_bounds(bounds: &[i64]) -> Result<Self, InvalidSlotRange> {
        let to_slot = |n: i64| -> Result<u16, InvalidSlotRange> {
            u16::try_from(n)
                .map_err(|_| InvalidSlotRange(format!("slot {} is outside 0-{}", n, MAX_SLOT)))
        };

        match *bounds {
            [slot] => Self::single(to_slot(slot)?),
            [start, end] => Self::new(to_slot(start)?, to_slot(end)?),
            _ => Err(InvalidSlotRange(format!(
                "expected 1 or 2 bounds, got {}",
                bounds.len()
            ))),
        }
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl Serialize for SlotRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.start == self.end {
            [self.start].serialize(serializer)
        } else {
            [self.start, self.end].serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for SlotRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bounds = Vec::<i64>::deserialize(deserializer)?;
        SlotRange::from_bounds(&bounds).map_err(D::Error::custom)
    }
}

/// Collapse a set of slots into the minimal list of sorted, contiguous ranges.
pub fn compact_slots(slots: impl IntoIterator<Item = u16>) -> Vec<SlotRange> {
    let mut sorted: Vec<u16> = slots.into_iter().filter(|s| *s <= MAX_SLOT).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<SlotRange> = Vec::new();
    for slot in sorted {
        match ranges.last_mut() {
            Some(last) if last.end + 1 == slot => last.end = slot,
            _ => ranges.push(SlotRange {
                start: slot,
                end: slot,
            }),
        }
    }
    ranges
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_range_new() {
        let range = SlotRange::new(0, 5461).unwrap();
        assert_eq!(range.start, 0);
        assert_eq!(range.end, 5461);
        assert_eq!(range.count(), 5462);
    }

    #[test]
    fn test_slot_range_rejects_reversed_and_out_of_bounds() {
        assert!(SlotRange::new(10, 9).is_err());
        assert!(SlotRange::new(0, TOTAL_SLOTS).is_err());
        assert!(SlotRange::single(MAX_SLOT).is_ok());
    }

    #[test]
    fn test_slot_range_contains_and_overlaps() {
        let range = SlotRange::new(100, 200).unwrap();
        assert!(range.contains(100));
        assert!(range.contains(200));
        assert!(!range.contains(99));
        assert!(!range.contains(201));

        assert!(range.overlaps(&SlotRange::new(200, 300).unwrap()));
        assert!(range.overlaps(&SlotRange::new(0, 100).unwrap()));
        assert!(!range.overlaps(&SlotRange::new(201, 300).unwrap()));
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!(SlotRange::parse("0-5460").unwrap(), SlotRange::new(0, 5460).unwrap());
        assert_eq!(SlotRange::parse("5461").unwrap(), SlotRange::single(5461).unwrap());
        assert!(SlotRange::parse("abc").is_err());
        assert!(SlotRange::parse("5-1").is_err());
        assert!(SlotRange::parse("16384").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(SlotRange::new(0, 5461).unwrap().to_string(), "0-5461");
        assert_eq!(SlotRange::single(100).unwrap().to_string(), "100");
    }

    #[test]
    fn test_document_form() {
        let single: SlotRange = serde_json::from_str("[42]").unwrap();
        assert_eq!(single, SlotRange::single(42).unwrap());
        assert_eq!(serde_json::to_string(&single).unwrap(), "[42]");

        let range: SlotRange = serde_json::from_str("[0, 8191]").unwrap();
        assert_eq!(serde_json::to_string(&range).unwrap(), "[0,8191]");

        assert!(serde_json::from_str::<SlotRange>("[]").is_err());
        assert!(serde_json::from_str::<SlotRange>("[1, 2, 3]").is_err());
        assert!(serde_json::from_str::<SlotRange>("[-1]").is_err());
        assert!(serde_json::from_str::<SlotRange>("[9, 3]").is_err());
    }

    #[test]
    fn test_compact_slots() {
        let ranges = compact_slots([5, 1, 2, 3, 7, 8, 3]);
        assert_eq!(
            ranges,
            vec![
                SlotRange::new(1, 3).unwrap(),
                SlotRange::single(5).unwrap(),
                SlotRange::new(7, 8).unwrap(),
            ]
        );
        assert!(compact_slots(Vec::new()).is_empty());
    }
}
