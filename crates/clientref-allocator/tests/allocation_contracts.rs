//! Contract tests for the client reference service.
//!
//! Each contract is checked against both bucket stores.

use std::sync::Arc;

use clientref_allocator::{
    AllocationError, AllocatorConfig, BucketStore, ClientReferenceService, ObjectBucketStore,
    SqliteBucketStore,
};
use clientref_core::{BucketState, PortfolioCode};
use clientref_test_utils::{
    TracingMemoryBackend, assert_no_writes, assert_untouched, object_service, traced_service,
};

fn stores() -> Vec<(&'static str, Arc<dyn BucketStore>)> {
    let object: Arc<dyn BucketStore> = Arc::new(ObjectBucketStore::new(Arc::new(
        TracingMemoryBackend::new(),
    )));
    let sqlite: Arc<dyn BucketStore> = Arc::new(SqliteBucketStore::open_in_memory().unwrap());
    vec![("object", object), ("sqlite", sqlite)]
}

fn service(store: Arc<dyn BucketStore>, capacity: u32) -> ClientReferenceService {
    ClientReferenceService::new(store, &AllocatorConfig::default().with_capacity(capacity)).unwrap()
}

async fn generate(service: &ClientReferenceService, portfolio: i64, count: usize) -> Vec<String> {
    let mut issued = Vec::with_capacity(count);
    for _ in 0..count {
        issued.push(
            service
                .generate_client_reference(portfolio)
                .await
                .unwrap()
                .into_string(),
        );
    }
    issued
}

#[tokio::test]
async fn test_rollover_at_capacity_three() {
    for (name, store) in stores() {
        let service = service(store, 3);
        assert_eq!(
            generate(&service, 1, 4).await,
            vec!["1A001", "1A002", "1A003", "1B001"],
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_default_capacity_rolls_over_after_999() {
    let service = service(Arc::new(SqliteBucketStore::open_in_memory().unwrap()), 999);
    let issued = generate(&service, 8, 1_000).await;
    assert_eq!(issued[998], "8A999");
    assert_eq!(issued[999], "8B001");
}

#[tokio::test]
async fn test_space_exhaustion_leaves_store_unchanged() {
    for (name, store) in stores() {
        let service = service(store.clone(), 3);
        let issued = generate(&service, 1, 78).await;
        assert_eq!(issued.last().map(String::as_str), Some("1Z003"), "{name}");

        let portfolio = PortfolioCode::new_unchecked(1);
        let before = store.buckets(portfolio).await.unwrap();
        assert_eq!(before.len(), 26, "{name}");

        let err = service.generate_client_reference(1).await.unwrap_err();
        assert!(matches!(err, AllocationError::SpaceExhausted { .. }), "{name}");
        assert!(!err.is_transient());

        assert_eq!(store.buckets(portfolio).await.unwrap(), before, "{name}");
        assert!(service.bucket_report(1).await.unwrap().exhausted, "{name}");
    }
}

#[tokio::test]
async fn test_exhausted_portfolio_does_not_write() {
    let (backend, service) = traced_service(1);
    generate(&service, 4, 26).await;

    backend.clear_operations();
    let err = service.generate_client_reference(4).await.unwrap_err();
    assert!(matches!(err, AllocationError::SpaceExhausted { .. }));
    assert_no_writes(&backend.operations());
}

#[tokio::test]
async fn test_invalid_portfolios_never_touch_storage() {
    let (backend, service) = traced_service(999);

    for code in [0, 11, -3] {
        let err = service.generate_client_reference(code).await.unwrap_err();
        assert!(
            matches!(err, AllocationError::InvalidPortfolio { code: c, min: 1, max: 10 } if c == code),
            "{err}"
        );
    }
    assert_untouched(&backend.operations());
}

#[tokio::test]
async fn test_portfolios_allocate_independently() {
    for (name, store) in stores() {
        let service = service(store, 999);
        assert_eq!(generate(&service, 1, 2).await, vec!["1A001", "1A002"], "{name}");
        assert_eq!(generate(&service, 10, 1).await, vec!["10A001"], "{name}");
        assert_eq!(generate(&service, 1, 1).await, vec!["1A003"], "{name}");
    }
}

#[tokio::test]
async fn test_lowering_capacity_moves_to_next_letter() {
    for (name, store) in stores() {
        generate(&service(store.clone(), 10), 2, 5).await;

        let narrowed = service(store.clone(), 3);
        assert_eq!(generate(&narrowed, 2, 2).await, vec!["2B001", "2B002"], "{name}");
    }
}

#[tokio::test]
async fn test_raising_capacity_reopens_last_bucket() {
    for (name, store) in stores() {
        generate(&service(store.clone(), 1), 3, 26).await;
        assert_eq!(
            store
                .active_bucket(PortfolioCode::new_unchecked(3))
                .await
                .unwrap()
                .map(|s| s.to_string()),
            Some("Z@2".to_string()),
            "{name}"
        );

        let widened = service(store.clone(), 2);
        assert_eq!(generate(&widened, 3, 1).await, vec!["3Z002"], "{name}");
        assert!(matches!(
            widened.generate_client_reference(3).await,
            Err(AllocationError::SpaceExhausted { .. })
        ));
    }
}

#[tokio::test]
async fn test_storage_failure_surfaces_as_storage_error() {
    let backend = TracingMemoryBackend::new();
    let service = object_service(Arc::new(backend.clone()), &AllocatorConfig::default());
    backend.inject_failure("portfolio=6/");

    let err = service.generate_client_reference(6).await.unwrap_err();
    assert!(matches!(err, AllocationError::Storage(_)));
    assert!(err.is_transient());

    backend.clear_failures();
    assert_eq!(
        service.generate_client_reference(6).await.unwrap().as_str(),
        "6A001"
    );
}

#[tokio::test]
async fn test_generated_references_parse_back() {
    let (_, service) = traced_service(5);
    for reference in generate(&service, 9, 12).await {
        let triple = service.parse_client_reference(&reference).unwrap();
        let again = service.format().format(&triple).unwrap();
        assert_eq!(again.as_str(), reference);
    }
}

#[tokio::test]
async fn test_stale_claim_is_rejected_by_store() {
    for (name, store) in stores() {
        let portfolio = PortfolioCode::new_unchecked(1);
        generate(&service(store.clone(), 999), 1, 2).await;

        let outcome = store
            .claim_and_advance(portfolio, BucketState::INITIAL, 999)
            .await
            .unwrap();
        assert!(!outcome.is_claimed(), "{name}");
        assert_eq!(store.buckets(portfolio).await.unwrap()[0].next_index, 3, "{name}");
    }
}
