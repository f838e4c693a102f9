//! Tagged payload entries and exactly-once delivery accounting.
//!
//! The ring buffer promises that every successfully enqueued item is
//! returned by exactly one successful dequeue - never zero, never more
//! than one. The drivers verify this structurally: each payload handle
//! carries a magic word, its origin, a value with a known valid range,
//! and an atomic delivery counter that must transition 0 -> 1 exactly
//! once. Consumed entries are poisoned so a duplicate delivery is also
//! caught by the magic/range checks, not only by the counter.

use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

/// Magic word carried by every live entry.
pub const MAGIC: u32 = 0xDEAD;

/// Magic word written over consumed entries.
pub const POISON_MAGIC: u32 = 0xBEEF;

/// Value written over consumed entries, outside every valid range.
pub const POISON_VALUE: i64 = -31337;

/// A runtime correctness violation detected by the harness.
///
/// These are never signaled by the primitives themselves; the drivers
/// report them on stderr and terminate the process with a failure
/// status.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CheckViolation {
    /// An entry surfaced with an unexpected magic word.
    #[error("bad magic {magic:#06x} on entry from thread {origin} (value {value})")]
    BadMagic {
        /// Magic word actually observed.
        magic: u32,
        /// Thread the entry claims as origin.
        origin: usize,
        /// Payload value observed.
        value: i64,
    },
    /// An entry's value fell outside the configured range.
    #[error("value {value} outside [0, {limit}) on entry from thread {origin}")]
    OutOfRange {
        /// Payload value observed.
        value: i64,
        /// Exclusive upper bound of the valid range.
        limit: i64,
        /// Thread the entry claims as origin.
        origin: usize,
    },
    /// The same entry or tag was delivered more than once.
    #[error("duplicate delivery of tag {tag}: counter already at {count}")]
    DuplicateDelivery {
        /// Unique tag of the entry.
        tag: usize,
        /// Counter value found before this delivery.
        count: u32,
    },
}

/// A payload handle with built-in validation state.
#[derive(Debug)]
pub struct TaggedEntry {
    magic: u32,
    origin: usize,
    value: i64,
    delivered: AtomicU32,
}

impl TaggedEntry {
    /// A live entry originating from `origin` carrying `value`.
    #[must_use]
    pub fn new(origin: usize, value: i64) -> Self {
        Self {
            magic: MAGIC,
            origin,
            value,
            delivered: AtomicU32::new(0),
        }
    }

    /// The thread this entry claims as its origin.
    #[must_use]
    pub fn origin(&self) -> usize {
        self.origin
    }

    /// The payload value.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Checks magic and value range.
    ///
    /// # Errors
    ///
    /// [`CheckViolation::BadMagic`] or [`CheckViolation::OutOfRange`]
    /// naming the offending values.
    pub fn validate(&self, limit: i64) -> Result<(), CheckViolation> {
        if self.magic != MAGIC {
            return Err(CheckViolation::BadMagic {
                magic: self.magic,
                origin: self.origin,
                value: self.value,
            });
        }
        if self.value < 0 || self.value >= limit {
            return Err(CheckViolation::OutOfRange {
                value: self.value,
                limit,
                origin: self.origin,
            });
        }
        Ok(())
    }

    /// Records one delivery; the counter must transition 0 -> 1.
    ///
    /// # Errors
    ///
    /// [`CheckViolation::DuplicateDelivery`] if this entry was already
    /// delivered.
    pub fn mark_delivered(&self) -> Result<(), CheckViolation> {
        let previous = self.delivered.fetch_add(1, Ordering::AcqRel);
        if previous != 0 {
            return Err(CheckViolation::DuplicateDelivery {
                tag: self.origin,
                count: previous,
            });
        }
        Ok(())
    }

    /// Rewrites the origin as an entry is relayed onward.
    pub fn relabel(&mut self, origin: usize) {
        self.origin = origin;
    }

    /// Overwrites magic and value so any later resurfacing of this
    /// entry fails validation structurally.
    pub fn poison(&mut self) {
        self.magic = POISON_MAGIC;
        self.value = POISON_VALUE;
    }
}

/// Exactly-once ledger over a dense tag space `[0, tags)`.
pub struct DeliveryLedger {
    counts: Box<[AtomicU32]>,
}

impl DeliveryLedger {
    /// A ledger with every tag undelivered.
    #[must_use]
    pub fn new(tags: usize) -> Self {
        Self {
            counts: (0..tags).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Records one delivery of `tag`.
    ///
    /// # Errors
    ///
    /// [`CheckViolation::DuplicateDelivery`] if `tag` was already
    /// recorded.
    ///
    /// # Panics
    ///
    /// Panics if `tag` is outside the ledger's tag space.
    pub fn record(&self, tag: usize) -> Result<(), CheckViolation> {
        let previous = self.counts[tag].fetch_add(1, Ordering::AcqRel);
        if previous != 0 {
            return Err(CheckViolation::DuplicateDelivery {
                tag,
                count: previous,
            });
        }
        Ok(())
    }

    /// Tags never delivered (lost items). Empty on a clean run.
    #[must_use]
    pub fn undelivered(&self) -> Vec<usize> {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, c)| c.load(Ordering::Acquire) == 0)
            .map(|(tag, _)| tag)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_validates() {
        let entry = TaggedEntry::new(3, 17);
        assert!(entry.validate(32).is_ok());
        assert_eq!(entry.origin(), 3);
        assert_eq!(entry.value(), 17);
    }

    #[test]
    fn range_check_names_the_offender() {
        let entry = TaggedEntry::new(2, 40);
        assert_eq!(
            entry.validate(32),
            Err(CheckViolation::OutOfRange {
                value: 40,
                limit: 32,
                origin: 2
            })
        );
    }

    #[test]
    fn poisoned_entry_fails_validation() {
        let mut entry = TaggedEntry::new(0, 5);
        entry.poison();
        assert!(matches!(
            entry.validate(32),
            Err(CheckViolation::BadMagic { magic, .. }) if magic == POISON_MAGIC
        ));
    }

    #[test]
    fn second_delivery_is_flagged() {
        let entry = TaggedEntry::new(1, 0);
        assert!(entry.mark_delivered().is_ok());
        assert_eq!(
            entry.mark_delivered(),
            Err(CheckViolation::DuplicateDelivery { tag: 1, count: 1 })
        );
    }

    #[test]
    fn ledger_tracks_lost_and_duplicate_tags() {
        let ledger = DeliveryLedger::new(4);
        assert!(ledger.record(0).is_ok());
        assert!(ledger.record(2).is_ok());
        assert_eq!(
            ledger.record(2),
            Err(CheckViolation::DuplicateDelivery { tag: 2, count: 1 })
        );
        assert_eq!(ledger.undelivered(), vec![1, 3]);
    }
}
