//! Factories for services wired to test storage.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clientref_allocator::{
    AllocatorConfig, ClientReferenceService, ObjectBucketStore, SqliteBucketStore,
};
use clientref_core::StorageBackend;

use crate::storage::TracingMemoryBackend;

/// Returns a config with the given capacity and a retry budget generous
/// enough for heavily contended tests.
#[must_use]
pub fn contended_config(capacity: u32) -> AllocatorConfig {
    AllocatorConfig::default()
        .with_capacity(capacity)
        .with_retry_policy(200, Duration::from_millis(1), Duration::from_millis(20))
}

/// Builds a service over an object store on `backend`.
pub fn object_service(
    backend: Arc<dyn StorageBackend>,
    config: &AllocatorConfig,
) -> ClientReferenceService {
    let store = Arc::new(ObjectBucketStore::new(backend));
    ClientReferenceService::new(store, config).expect("valid test config")
}

/// Builds a service over a fresh tracing backend and returns both.
pub fn traced_service(capacity: u32) -> (TracingMemoryBackend, ClientReferenceService) {
    let backend = TracingMemoryBackend::new();
    let service = object_service(Arc::new(backend.clone()), &contended_config(capacity));
    (backend, service)
}

/// Builds a service over a SQLite file, opening its own connection.
pub fn sqlite_service(path: &Path, config: &AllocatorConfig) -> ClientReferenceService {
    let store = Arc::new(SqliteBucketStore::open(path).expect("open sqlite store"));
    ClientReferenceService::new(store, config).expect("valid test config")
}
