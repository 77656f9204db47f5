//! Assertion helpers for allocation tests.

use std::collections::{BTreeMap, HashSet};

use clientref_core::{Alpha, ClientReference, ReferenceFormat};

use crate::storage::StorageOp;

/// Asserts that no reference was issued twice.
///
/// # Panics
///
/// Panics naming the first duplicate.
pub fn assert_unique<'a, I>(references: I)
where
    I: IntoIterator<Item = &'a ClientReference>,
{
    let mut seen = HashSet::new();
    for reference in references {
        assert!(seen.insert(reference.as_str()), "reference {reference} issued twice");
    }
}

/// Asserts that, per bucket letter, sequences form exactly `1..=n`.
///
/// Holds for a batch that started on a fresh portfolio and had no abandoned
/// claims.
///
/// # Panics
///
/// Panics if a reference does not parse or a bucket has gaps.
pub fn assert_gapless_buckets<'a, I>(format: ReferenceFormat, references: I)
where
    I: IntoIterator<Item = &'a ClientReference>,
{
    let mut buckets: BTreeMap<Alpha, Vec<u32>> = BTreeMap::new();
    for reference in references {
        let triple = format
            .parse(reference.as_str())
            .unwrap_or_else(|e| panic!("issued reference {reference} does not parse: {e}"));
        buckets.entry(triple.alpha).or_default().push(triple.sequence);
    }
    for (alpha, mut sequences) in buckets {
        sequences.sort_unstable();
        let expected: Vec<u32> = (1..=u32::try_from(sequences.len()).expect("fits")).collect();
        assert_eq!(sequences, expected, "bucket {alpha} has gaps or repeats");
    }
}

/// Asserts that the operations contain no applied write.
///
/// # Panics
///
/// Panics listing the writes.
pub fn assert_no_writes(operations: &[StorageOp]) {
    let writes: Vec<_> = operations.iter().filter(|op| op.is_applied_write()).collect();
    assert!(writes.is_empty(), "expected no writes, found {writes:?}");
}

/// Asserts that the operations are empty.
///
/// # Panics
///
/// Panics listing the operations.
pub fn assert_untouched(operations: &[StorageOp]) {
    assert!(operations.is_empty(), "expected no storage access, found {operations:?}");
}
