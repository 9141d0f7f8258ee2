//! Bounded, newest-first alert log.
//!
//! [`merge`] is the only way the log changes: it unions by identifier,
//! re-sorts newest-first and truncates to [`ALERT_LOG_CAPACITY`].

use std::collections::HashSet;

use crate::types::AlertRecord;

/// Maximum number of records kept in the alert log.
pub const ALERT_LOG_CAPACITY: usize = 50;

/// Merge an incoming batch into an existing log.
///
/// - Records are unioned by identifier; on collision the incoming record wins.
/// - Inside the incoming batch, a repeated identifier keeps its last occurrence.
/// - The result is sorted newest-first by timestamp. Equal timestamps keep
///   arrival order: incoming records before existing ones, batch order within
///   the batch.
/// - The result holds at most [`ALERT_LOG_CAPACITY`] records.
///
/// Pure and deterministic.
///
/// # Example
///
/// ```
/// use helmwatch_types::{merge, AlertKind, AlertRecord, Severity};
/// use time::macros::datetime;
///
/// let old = AlertRecord::new("a", AlertKind::Helmet, "lost", Severity::Warning,
///     datetime!(2025-01-01 10:00 UTC));
/// let new = AlertRecord::new("b", AlertKind::Accident, "crash", Severity::Critical,
///     datetime!(2025-01-01 10:05 UTC));
///
/// let log = merge(&[old], &[new]);
/// assert_eq!(log[0].id, "b");
/// assert_eq!(log[1].id, "a");
/// ```
#[must_use]
pub fn merge(existing: &[AlertRecord], incoming: &[AlertRecord]) -> Vec<AlertRecord> {
    let mut seen = HashSet::with_capacity(existing.len() + incoming.len());

    // Walk the batch backwards so the last occurrence of an identifier wins,
    // then restore batch order.
    let mut batch: Vec<&AlertRecord> = incoming
        .iter()
        .rev()
        .filter(|record| seen.insert(record.id.as_str()))
        .collect();
    batch.reverse();

    let mut merged: Vec<AlertRecord> = batch
        .into_iter()
        .cloned()
        .chain(
            existing
                .iter()
                .filter(|record| seen.insert(record.id.as_str()))
                .cloned(),
        )
        .collect();

    // Stable sort keeps arrival order for equal timestamps.
    merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    merged.truncate(ALERT_LOG_CAPACITY);
    merged
}

/// Check the log invariants: newest-first, unique identifiers, bounded length.
pub fn is_well_formed(log: &[AlertRecord]) -> bool {
    let mut ids = HashSet::with_capacity(log.len());
    log.len() <= ALERT_LOG_CAPACITY
        && log.windows(2).all(|w| w[0].timestamp >= w[1].timestamp)
        && log.iter().all(|record| ids.insert(record.id.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertKind, Severity};
    use proptest::prelude::*;
    use time::{Duration, OffsetDateTime};

    fn at(id: &str, secs: i64) -> AlertRecord {
        AlertRecord::new(
            id,
            AlertKind::Other,
            format!("message {id}"),
            Severity::Info,
            OffsetDateTime::UNIX_EPOCH + Duration::seconds(secs),
        )
    }

    #[test]
    fn test_merge_into_empty_sorts_newest_first() {
        let log = merge(&[], &[at("a", 1), at("b", 3), at("c", 2)]);
        let ids: Vec<_> = log.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
    }

    #[test]
    fn test_incoming_wins_on_collision() {
        let existing = vec![at("a", 5)];
        let mut replacement = at("a", 5);
        replacement.message = "updated".to_string();

        let log = merge(&existing, &[replacement]);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message, "updated");
    }

    #[test]
    fn test_last_occurrence_in_batch_wins() {
        let mut first = at("x", 1);
        first.message = "first".to_string();
        let mut second = at("x", 1);
        second.message = "second".to_string();

        let log = merge(&[], &[first, second]);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message, "second");
    }

    #[test]
    fn test_ties_prefer_incoming_then_batch_order() {
        let existing = vec![at("old", 10)];
        let log = merge(&existing, &[at("n1", 10), at("n2", 10)]);
        let ids: Vec<_> = log.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["n1", "n2", "old"]);
    }

    #[test]
    fn test_truncates_to_capacity_keeping_newest() {
        let batch: Vec<_> = (0..80).map(|i| at(&format!("r{i}"), i)).collect();
        let log = merge(&[], &batch);
        assert_eq!(log.len(), ALERT_LOG_CAPACITY);
        assert_eq!(log[0].id, "r79");
        assert_eq!(log[ALERT_LOG_CAPACITY - 1].id, "r30");
    }

    #[test]
    fn test_empty_batch_keeps_log() {
        let existing = merge(&[], &[at("a", 1), at("b", 2)]);
        assert_eq!(merge(&existing, &[]), existing);
    }

    #[test]
    fn test_is_well_formed() {
        assert!(is_well_formed(&[at("b", 2), at("a", 1)]));
        assert!(!is_well_formed(&[at("a", 1), at("b", 2)]));
        assert!(!is_well_formed(&[at("a", 2), at("a", 1)]));
    }

    fn arb_batch() -> impl Strategy<Value = Vec<AlertRecord>> {
        prop::collection::vec((0u8..40, 0i64..200), 0..70).prop_map(|items| {
            items
                .into_iter()
                .map(|(id, secs)| at(&format!("id{id}"), secs))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_merge_is_union_sorted_and_bounded(a in arb_batch(), b in arb_batch()) {
            let log = merge(&merge(&[], &a), &b);

            prop_assert!(is_well_formed(&log));

            let mut union: HashSet<&str> = a.iter().map(|r| r.id.as_str()).collect();
            union.extend(b.iter().map(|r| r.id.as_str()));
            prop_assert_eq!(log.len(), union.len().min(ALERT_LOG_CAPACITY));
            for record in &log {
                prop_assert!(union.contains(record.id.as_str()));
            }

            // Every record of B survives unless it was pushed out by newer ones.
            let last_in_b: std::collections::HashMap<&str, &AlertRecord> =
                b.iter().map(|r| (r.id.as_str(), r)).collect();
            if let Some(oldest_kept) = log.last() {
                for record in last_in_b.values() {
                    if record.timestamp > oldest_kept.timestamp {
                        prop_assert!(log.iter().any(|r| r.id == record.id));
                    }
                }
            }
        }

        #[test]
        fn prop_merge_is_deterministic(a in arb_batch(), b in arb_batch()) {
            prop_assert_eq!(merge(&a, &b), merge(&a, &b));
        }
    }
}
