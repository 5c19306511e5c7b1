//! Call counting and expectation checks.

use crate::error::StubError;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::warn;

/// Live tally of calls per ledger key.
///
/// Increments hold the key's shard lock for the whole read-modify-write, so
/// concurrent calls to the same route never lose an update.
#[derive(Debug, Default)]
pub struct CallLedger {
    counts: DashMap<String, u64>,
}

impl CallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one call and return the new total.
    pub fn record_call(&self, key: &str) -> u64 {
        let mut count = self.counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn count(&self, key: &str) -> u64 {
        self.counts.get(key).map(|c| *c).unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn reset(&self) {
        self.counts.clear();
    }
}

/// Declared call counts, in the order they were declared.
#[derive(Debug, Default)]
pub struct Expectations {
    entries: RwLock<Vec<(String, u64)>>,
}

impl Expectations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add expectations. A key seen before keeps its position and takes the new count.
    pub fn merge(&self, expectations: impl IntoIterator<Item = (String, u64)>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for (key, expected) in expectations {
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = expected,
                None => entries.push((key, expected)),
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, expected)| *expected)
    }

    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Compare every expectation against the ledger. Fails on the first mismatch.
pub fn validate(expectations: &Expectations, ledger: &CallLedger) -> Result<(), StubError> {
    for (key, expected) in expectations.snapshot() {
        let actual = ledger.count(&key);
        if actual != expected {
            warn!(route = %key, expected, actual, "Route call count mismatch");
            return Err(StubError::CountMismatch {
                key,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_and_count() {
        let ledger = CallLedger::new();
        assert_eq!(ledger.count("a"), 0);
        assert_eq!(ledger.record_call("a"), 1);
        assert_eq!(ledger.record_call("a"), 2);
        assert_eq!(ledger.count("a"), 2);
        ledger.reset();
        assert_eq!(ledger.count("a"), 0);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let ledger = Arc::new(CallLedger::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        ledger.record_call("hot");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ledger.count("hot"), 16 * 500);
    }

    #[test]
    fn test_validate_reports_first_mismatch_in_order() {
        let ledger = CallLedger::new();
        let expectations = Expectations::new();
        expectations.merge(vec![("aget".to_string(), 1), ("apost".to_string(), 1)]);

        ledger.record_call("aget");
        ledger.record_call("aget");

        let err = validate(&expectations, &ledger).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected route 'aget' to be called 1 times but was called 2 times"
        );
    }

    #[test]
    fn test_validate_passes_on_exact_counts() {
        let ledger = CallLedger::new();
        let expectations = Expectations::new();
        expectations.merge(vec![("k".to_string(), 2), ("never".to_string(), 0)]);
        ledger.record_call("k");
        ledger.record_call("k");
        assert!(validate(&expectations, &ledger).is_ok());
    }

    #[test]
    fn test_merge_overwrites_in_place() {
        let expectations = Expectations::new();
        expectations.merge(vec![("a".to_string(), 1), ("b".to_string(), 2)]);
        expectations.merge(vec![("a".to_string(), 5)]);
        assert_eq!(
            expectations.snapshot(),
            vec![("a".to_string(), 5), ("b".to_string(), 2)]
        );
        expectations.reset();
        assert!(expectations.is_empty());
    }
}
