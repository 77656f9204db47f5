//! Test storage with operation tracing and fault injection.
//!
//! [`TracingMemoryBackend`] behaves like the in-memory backend but records
//! every call, can fail chosen paths, can delay calls so that concurrent
//! claims interleave, and can make conditional writes lose their race.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use clientref_core::error::{Error, Result};
use clientref_core::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

use crate::simulation::FaultInjector;

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone)]
pub enum StorageOp {
    /// Get operation.
    Get {
        /// Path that was read.
        path: String,
    },
    /// Head operation (metadata only).
    Head {
        /// Path that was checked.
        path: String,
    },
    /// Put operation.
    Put {
        /// Path that was written.
        path: String,
        /// Size of data written.
        size: usize,
        /// Precondition used.
        precondition: WritePrecondition,
        /// Whether the write was applied.
        applied: bool,
    },
}

impl StorageOp {
    /// Returns true for operations that changed stored data.
    #[must_use]
    pub fn is_applied_write(&self) -> bool {
        matches!(self, Self::Put { applied: true, .. })
    }
}

/// In-memory storage backend with operation tracing.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    data: Arc<Mutex<HashMap<String, StoredObject>>>,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_paths: Arc<Mutex<Vec<String>>>,
    forced_conflicts: Arc<AtomicU32>,
    faults: Option<Arc<FaultInjector>>,
    latency: Option<Duration>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl TracingMemoryBackend {
    /// Creates a new empty tracing storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage that sleeps before every call.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Creates storage whose failures and delays come from `faults`.
    #[must_use]
    pub fn with_faults(faults: Arc<FaultInjector>) -> Self {
        Self {
            faults: Some(faults),
            ..Self::default()
        }
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns the number of writes that changed stored data.
    #[must_use]
    pub fn applied_writes(&self) -> usize {
        self.operations
            .lock()
            .expect("lock")
            .iter()
            .filter(|op| op.is_applied_write())
            .count()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Injects a failure for the given path prefix.
    pub fn inject_failure(&self, path: impl Into<String>) {
        self.fail_paths.lock().expect("lock").push(path.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_paths.lock().expect("lock").clear();
    }

    /// Makes the next `count` conditional writes report a lost race without
    /// writing.
    pub fn force_conflicts(&self, count: u32) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    /// Returns the current version for a path.
    #[must_use]
    pub fn version(&self, path: &str) -> Option<String> {
        self.data
            .lock()
            .expect("lock")
            .get(path)
            .map(|o| o.version.to_string())
    }

    /// Returns the stored bytes for a path without recording an operation.
    #[must_use]
    pub fn peek(&self, path: &str) -> Option<Bytes> {
        self.data.lock().expect("lock").get(path).map(|o| o.data.clone())
    }

    /// Returns all stored paths.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.data.lock().expect("lock").keys().cloned().collect()
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(&self, path: &str) -> Result<()> {
        let fail_paths = self.fail_paths.lock().expect("lock");
        if fail_paths.iter().any(|p| path.starts_with(p)) {
            return Err(Error::storage(format!("injected failure for path: {path}")));
        }
        Ok(())
    }

    fn take_forced_conflict(&self, precondition: &WritePrecondition) -> bool {
        if matches!(precondition, WritePrecondition::None) {
            return false;
        }
        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        forced || self.faults.as_ref().is_some_and(|f| f.should_fail_cas())
    }

    async fn maybe_delay(&self) {
        let delay = match (&self.faults, self.latency) {
            (_, Some(latency)) => latency,
            (Some(faults), None) => faults.latency(),
            (None, None) => Duration::ZERO,
        };
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        if self.faults.as_ref().is_some_and(|f| f.should_fail_read()) {
            return Err(Error::storage(format!("injected read fault: {path}")));
        }
        self.record(StorageOp::Get {
            path: path.to_string(),
        });

        let data = self.data.lock().expect("lock");
        data.get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Head {
            path: path.to_string(),
        });

        let data = self.data.lock().expect("lock");
        Ok(data.get(path).map(|o| ObjectMeta {
            path: path.to_string(),
            size: o.data.len() as u64,
            version: o.version.to_string(),
            last_modified: Some(o.last_modified),
        }))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        if self.faults.as_ref().is_some_and(|f| f.should_fail_write()) {
            return Err(Error::storage(format!("injected write fault: {path}")));
        }

        let size = data.len();
        let mut store = self.data.lock().expect("lock");
        let existing = store.get(path);
        let current_version = existing.map_or_else(|| "0".to_string(), |o| o.version.to_string());

        let precondition_holds = match &precondition {
            WritePrecondition::None => true,
            WritePrecondition::DoesNotExist => existing.is_none(),
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                existing.is_some_and(|o| o.version == expected_num)
            }
        };

        if !precondition_holds || self.take_forced_conflict(&precondition) {
            drop(store);
            self.record(StorageOp::Put {
                path: path.to_string(),
                size,
                precondition,
                applied: false,
            });
            return Ok(WriteResult::PreconditionFailed { current_version });
        }

        let new_version = existing.map_or(1, |o| o.version + 1);
        store.insert(
            path.to_string(),
            StoredObject {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );
        drop(store);

        self.record(StorageOp::Put {
            path: path.to_string(),
            size,
            precondition,
            applied: true,
        });
        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }
}
