//! Retry controller for failed initializations.
//!
//! Every failed initialization of a copy bumps its counter in the
//! [`FailureLedger`]. Once the counter reaches the index's `max_retries`
//! the copy is left alone by automatic allocation, so a copy that cannot
//! start anywhere does not burn recovery capacity in a tight loop.
//!
//! Counters reset when the copy reaches `STARTED`, when an operator
//! reroutes with `retry_failed`, or when an operator allocates the copy
//! explicitly.

use im::OrdMap;
use serde::{Deserialize, Serialize};

use crate::metadata::IndexSettings;
use crate::shard::CopyId;

/// Consecutive failures of one copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Consecutive failed initializations.
    pub count: u32,
    /// Detail of the most recent failure.
    pub last_failure: String,
}

/// Per-copy failure counters, part of every cluster snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureLedger {
    records: OrdMap<CopyId, FailureRecord>,
}

impl FailureLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy's record.
    #[must_use]
    pub fn get(&self, copy: &CopyId) -> Option<&FailureRecord> {
        self.records.get(copy)
    }

    /// Returns a copy's failure count, zero if it never failed.
    #[must_use]
    pub fn count(&self, copy: &CopyId) -> u32 {
        self.records.get(copy).map_or(0, |record| record.count)
    }

    /// Returns the number of copies with a non-zero count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no copy has failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over records in copy order.
    pub fn iter(&self) -> impl Iterator<Item = (&CopyId, &FailureRecord)> {
        self.records.iter()
    }

    fn remove(&mut self, copy: &CopyId) -> Option<FailureRecord> {
        self.records.remove(copy)
    }
}

/// Retry policy for one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryController {
    max_retries: u32,
}

impl RetryController {
    /// Creates a controller with the given limit.
    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Creates the controller for an index.
    #[must_use]
    pub const fn for_index(settings: &IndexSettings) -> Self {
        Self::new(settings.max_retries)
    }

    /// Returns the configured limit.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Records a failed initialization and returns the new count.
    pub fn record_failure(ledger: &mut FailureLedger, copy: &CopyId, detail: &str) -> u32 {
        let count = ledger.count(copy).saturating_add(1);
        ledger.records.insert(
            copy.clone(),
            FailureRecord {
                count,
                last_failure: detail.to_string(),
            },
        );
        count
    }

    /// Returns true if automatic allocation must skip the copy.
    #[must_use]
    pub fn is_blocked(&self, ledger: &FailureLedger, copy: &CopyId) -> bool {
        ledger.count(copy) >= self.max_retries
    }

    /// Clears one copy's counter.
    pub fn reset(ledger: &mut FailureLedger, copy: &CopyId) -> bool {
        ledger.remove(copy).is_some()
    }

    /// Clears every counter and returns the copies that were reset.
    pub fn reset_all(ledger: &mut FailureLedger) -> Vec<CopyId> {
        let copies: Vec<CopyId> = ledger.records.keys().cloned().collect();
        ledger.records = OrdMap::new();
        copies
    }
}

#[cfg(test)]
mod tests {
    use cairn_core::ShardId;

    use super::*;

    fn copy() -> CopyId {
        CopyId::new(ShardId::new("test", 0), 1)
    }

    #[test]
    fn test_blocks_after_max_retries() {
        let controller = RetryController::new(3);
        let mut ledger = FailureLedger::new();

        for expected in 1..=2 {
            assert_eq!(RetryController::record_failure(&mut ledger, &copy(), "boom"), expected);
            assert!(!controller.is_blocked(&ledger, &copy()));
        }
        assert_eq!(RetryController::record_failure(&mut ledger, &copy(), "boom again"), 3);
        assert!(controller.is_blocked(&ledger, &copy()));
        assert_eq!(ledger.get(&copy()).unwrap().last_failure, "boom again");
    }

    #[test]
    fn test_reset_resumes_counting_from_zero() {
        let controller = RetryController::new(1);
        let mut ledger = FailureLedger::new();
        RetryController::record_failure(&mut ledger, &copy(), "boom");
        assert!(controller.is_blocked(&ledger, &copy()));

        let reset = RetryController::reset_all(&mut ledger);
        assert_eq!(reset, vec![copy()]);
        assert!(!controller.is_blocked(&ledger, &copy()));
        assert_eq!(RetryController::record_failure(&mut ledger, &copy(), "boom"), 1);

        assert!(RetryController::reset(&mut ledger, &copy()));
        assert_eq!(ledger.count(&copy()), 0);
        assert!(!RetryController::reset(&mut ledger, &copy()));
    }

    #[test]
    fn test_for_index_uses_settings() {
        let settings = IndexSettings::new(1, 1).with_max_retries(7);
        assert_eq!(RetryController::for_index(&settings).max_retries(), 7);
    }
}
