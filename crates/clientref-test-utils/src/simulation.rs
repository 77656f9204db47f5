//! Seeded fault injection and process simulation.
//!
//! [`FaultInjector`] decides, from a seeded RNG, whether a storage call should
//! fail, lose its compare-and-swap, or be delayed. [`race_processes`] runs
//! several independent services against shared storage and collects what
//! each one issued.
//!
//! # Example
//!
//! ```rust
//! use clientref_test_utils::simulation::{FaultConfig, FaultInjector};
//!
//! let faults = FaultInjector::with_seed(7, FaultConfig::contended_storage());
//! let lost = (0..100).filter(|_| faults.should_fail_cas()).count();
//! assert!(lost > 0 && lost < 100);
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use clientref_allocator::{AllocationError, ClientReferenceService};
use clientref_core::ClientReference;

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of storage read failures (0.0 - 1.0).
    pub storage_read_failure_rate: f64,

    /// Probability of storage write failures (0.0 - 1.0).
    pub storage_write_failure_rate: f64,

    /// Probability that a conditional write loses its race.
    pub cas_failure_rate: f64,

    /// Simulated latency range (min, max) in milliseconds.
    pub latency_range_ms: Option<(u64, u64)>,
}

impl FaultConfig {
    /// Creates a config with no faults.
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Creates a config simulating heavy contention.
    #[must_use]
    pub fn contended_storage() -> Self {
        Self {
            cas_failure_rate: 0.3,
            latency_range_ms: Some((0, 2)),
            ..Default::default()
        }
    }

    /// Creates a config where every kind of fault can happen.
    #[must_use]
    pub fn chaos() -> Self {
        Self {
            storage_read_failure_rate: 0.02,
            storage_write_failure_rate: 0.02,
            cas_failure_rate: 0.2,
            latency_range_ms: Some((0, 5)),
        }
    }
}

/// Seeded source of injected faults.
#[derive(Debug)]
pub struct FaultInjector {
    seed: u64,
    rng: Mutex<StdRng>,
    config: Mutex<FaultConfig>,
}

impl FaultInjector {
    /// Creates an injector; the same seed yields the same fault sequence.
    #[must_use]
    pub fn with_seed(seed: u64, config: FaultConfig) -> Self {
        Self {
            seed,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            config: Mutex::new(config),
        }
    }

    /// Returns the seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Replaces the fault configuration.
    pub fn configure(&self, config: FaultConfig) {
        *self.config.lock().expect("lock poisoned") = config;
    }

    /// Returns true with the given probability.
    #[must_use]
    pub fn should_fail(&self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.rng.lock().expect("lock poisoned").r#gen::<f64>() < probability
    }

    /// Determines if a storage read should fail.
    #[must_use]
    pub fn should_fail_read(&self) -> bool {
        let rate = self.config.lock().expect("lock poisoned").storage_read_failure_rate;
        self.should_fail(rate)
    }

    /// Determines if a storage write should fail.
    #[must_use]
    pub fn should_fail_write(&self) -> bool {
        let rate = self.config.lock().expect("lock poisoned").storage_write_failure_rate;
        self.should_fail(rate)
    }

    /// Determines if a conditional write should lose its race.
    #[must_use]
    pub fn should_fail_cas(&self) -> bool {
        let rate = self.config.lock().expect("lock poisoned").cas_failure_rate;
        self.should_fail(rate)
    }

    /// Returns a simulated latency.
    #[must_use]
    pub fn latency(&self) -> Duration {
        let range = self.config.lock().expect("lock poisoned").latency_range_ms;
        match range {
            Some((min, max)) => {
                let ms = self.rng.lock().expect("lock poisoned").gen_range(min..=max);
                Duration::from_millis(ms)
            }
            None => Duration::ZERO,
        }
    }
}

/// What one simulated process issued.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// Index of the process.
    pub process: usize,
    /// References issued, in the order the process received them.
    pub issued: Vec<ClientReference>,
    /// Errors the process saw.
    pub errors: Vec<AllocationError>,
}

/// Runs `processes` services concurrently, each generating `per_process`
/// references for `portfolio`.
///
/// Every process gets its own service from `make_service`, so they share
/// nothing but the storage the factory points them at. Requires a
/// multi-threaded runtime to produce real interleavings.
pub async fn race_processes<F>(
    processes: usize,
    per_process: usize,
    portfolio: i64,
    make_service: F,
) -> Vec<ProcessOutcome>
where
    F: Fn(usize) -> ClientReferenceService,
{
    let handles: Vec<_> = (0..processes)
        .map(|process| {
            let service = Arc::new(make_service(process));
            tokio::spawn(async move {
                let mut outcome = ProcessOutcome {
                    process,
                    issued: Vec::with_capacity(per_process),
                    errors: Vec::new(),
                };
                for _ in 0..per_process {
                    match service.generate_client_reference(portfolio).await {
                        Ok(reference) => outcome.issued.push(reference),
                        Err(err) => outcome.errors.push(err),
                    }
                }
                outcome
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(processes);
    for handle in handles {
        outcomes.push(handle.await.expect("process task panicked"));
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_faults() {
        let a = FaultInjector::with_seed(42, FaultConfig::chaos());
        let b = FaultInjector::with_seed(42, FaultConfig::chaos());
        let run = |f: &FaultInjector| (0..50).map(|_| f.should_fail_cas()).collect::<Vec<_>>();
        assert_eq!(run(&a), run(&b));
        assert_eq!(a.seed(), 42);
    }

    #[test]
    fn no_faults_never_fail() {
        let faults = FaultInjector::with_seed(1, FaultConfig::no_faults());
        for _ in 0..100 {
            assert!(!faults.should_fail_read());
            assert!(!faults.should_fail_write());
            assert!(!faults.should_fail_cas());
        }
        assert_eq!(faults.latency(), Duration::ZERO);
    }

    #[test]
    fn latency_stays_in_range() {
        let faults = FaultInjector::with_seed(3, FaultConfig::chaos());
        for _ in 0..100 {
            assert!(faults.latency() <= Duration::from_millis(5));
        }
    }
}
