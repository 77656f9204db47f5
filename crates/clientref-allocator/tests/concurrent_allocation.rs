//! Integration tests for allocation under contention.
//!
//! Independent services share nothing but storage, the same way separate
//! processes would. Tests run on a multi-threaded runtime so that claims
//! really interleave.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use clientref_allocator::{AllocationError, AllocatorConfig};
use clientref_core::{ClientReference, ReferenceFormat, StorageBackend};
use clientref_test_utils::{
    FaultConfig, FaultInjector, TracingMemoryBackend, assert_gapless_buckets, assert_unique,
    contended_config, init_test_logging, object_service, race_processes, sqlite_service,
};

fn issued(outcomes: &[clientref_test_utils::ProcessOutcome]) -> Vec<ClientReference> {
    for outcome in outcomes {
        assert!(
            outcome.errors.is_empty(),
            "process {} failed: {:?}",
            outcome.process,
            outcome.errors
        );
    }
    outcomes.iter().flat_map(|o| o.issued.clone()).collect()
}

/// Hundreds of concurrent allocations on one portfolio are all distinct.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_are_unique_on_object_store() {
    init_test_logging();
    let backend: Arc<dyn StorageBackend> = Arc::new(TracingMemoryBackend::new());
    let config = contended_config(50);

    let outcomes = race_processes(8, 40, 1, |_| object_service(backend.clone(), &config)).await;
    let references = issued(&outcomes);

    assert_eq!(references.len(), 320);
    assert_unique(&references);
    assert_gapless_buckets(ReferenceFormat::default(), &references);
}

/// Processes sharing one SQLite file never issue the same reference.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_are_unique_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buckets.db");
    let config = contended_config(30);

    let outcomes = race_processes(4, 50, 3, |_| sqlite_service(&path, &config)).await;
    let references = issued(&outcomes);

    assert_eq!(references.len(), 200);
    assert_unique(&references);
    assert_gapless_buckets(ReferenceFormat::default(), &references);
}

/// Three fresh processes racing on portfolio 2 collectively get 2A001..2A003.
#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn test_three_processes_race_on_fresh_portfolio() {
    let backend: Arc<dyn StorageBackend> = Arc::new(TracingMemoryBackend::new());
    let config = contended_config(999);

    let outcomes = race_processes(3, 1, 2, |_| object_service(backend.clone(), &config)).await;
    let references: BTreeSet<String> = issued(&outcomes)
        .into_iter()
        .map(ClientReference::into_string)
        .collect();

    let expected: BTreeSet<String> = ["2A001", "2A002", "2A003"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(references, expected);
}

/// Per process, references come back in strictly increasing commit order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_process_sees_increasing_sequences() {
    let backend: Arc<dyn StorageBackend> = Arc::new(TracingMemoryBackend::new());
    let config = contended_config(999);
    let format = ReferenceFormat::default();

    let outcomes = race_processes(4, 25, 5, |_| object_service(backend.clone(), &config)).await;
    for outcome in &outcomes {
        let sequences: Vec<u32> = outcome
            .issued
            .iter()
            .map(|r| format.parse(r.as_str()).unwrap().sequence)
            .collect();
        assert!(
            sequences.windows(2).all(|w| w[0] < w[1]),
            "process {} saw {sequences:?}",
            outcome.process
        );
    }
}

/// Lost races are retried transparently.
#[tokio::test]
async fn test_forced_conflicts_are_retried() {
    let backend = TracingMemoryBackend::new();
    let service = object_service(Arc::new(backend.clone()), &contended_config(999));

    backend.force_conflicts(5);
    let allocation = service.allocator().allocate(1).await.unwrap();

    assert_eq!(allocation.attempts, 6);
    assert_eq!(allocation.triple.sequence, 1);
    assert_eq!(backend.applied_writes(), 1);
}

/// A spent retry budget surfaces as a transient error and writes nothing.
#[tokio::test]
async fn test_retry_budget_exhaustion_is_transient() {
    let backend = TracingMemoryBackend::new();
    let config = AllocatorConfig::default().with_retry_policy(
        3,
        Duration::from_millis(1),
        Duration::from_millis(2),
    );
    let service = object_service(Arc::new(backend.clone()), &config);

    backend.force_conflicts(10);
    let err = service.generate_client_reference(1).await.unwrap_err();

    assert!(matches!(
        err,
        AllocationError::ConcurrencyExhausted { attempts: 3, .. }
    ));
    assert!(err.is_transient());
    assert_eq!(backend.applied_writes(), 0);
}

/// Randomly lost compare-and-swaps never cause duplicates or gaps.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_seeded_contention_keeps_references_unique() {
    let faults = Arc::new(FaultInjector::with_seed(
        20_240_611,
        FaultConfig::contended_storage(),
    ));
    let backend: Arc<dyn StorageBackend> = Arc::new(TracingMemoryBackend::with_faults(faults));
    let config = contended_config(20);

    let outcomes = race_processes(4, 25, 7, |_| object_service(backend.clone(), &config)).await;
    let references = issued(&outcomes);

    assert_eq!(references.len(), 100);
    assert_unique(&references);
    assert_gapless_buckets(ReferenceFormat::default(), &references);
}

/// A caller that gives up while waiting for the write lock consumes nothing.
#[tokio::test]
async fn test_timed_out_caller_does_not_consume_a_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("refs.db");
    let service = sqlite_service(&path, &AllocatorConfig::default());

    let other_process = rusqlite::Connection::open(&path).unwrap();
    other_process.execute_batch("BEGIN IMMEDIATE").unwrap();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(300),
        service.generate_client_reference(1),
    )
    .await;
    assert!(timed_out.is_err());

    other_process.execute_batch("COMMIT").unwrap();
    assert_eq!(
        service.generate_client_reference(1).await.unwrap().as_str(),
        "1A001"
    );
}
