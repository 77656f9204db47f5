//! Backfilling references onto legacy records.
//!
//! Legacy records are processed in order. A record that already carries a
//! reference keeps it only if the reference belongs to the target portfolio
//! and the bucket store has already issued it; a record without one gets a
//! freshly allocated reference. The batch stops at
//! the first error that would fail every following record too.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use clientref_core::observability::backfill_span;
use clientref_core::bucket::is_issued;
use clientref_core::{ClientReference, PortfolioCode};

use crate::error::{AllocationError, AllocationErrorKind, Result};
use crate::service::ClientReferenceService;

/// A legacy record to backfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRecord {
    /// Caller-side identifier, echoed in the report.
    pub id: String,
    /// Reference the record already carries, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_reference: Option<String>,
}

impl LegacyRecord {
    /// Creates a record without a reference.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            existing_reference: None,
        }
    }

    /// Creates a record that already carries a reference.
    #[must_use]
    pub fn with_reference(id: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            existing_reference: Some(reference.into()),
        }
    }
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BackfillOutcome {
    /// A new reference was issued.
    Assigned {
        /// The issued reference.
        reference: ClientReference,
    },
    /// The record's existing reference was valid and kept.
    Kept {
        /// The kept reference.
        reference: ClientReference,
    },
    /// The record was left without a reference.
    Failed {
        /// Why.
        reason: String,
    },
}

/// One processed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillEntry {
    /// The record's identifier.
    pub id: String,
    /// The outcome.
    #[serde(flatten)]
    pub outcome: BackfillOutcome,
}

/// The error that stopped a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillHalt {
    /// Identifier of the record being processed.
    pub id: String,
    /// Error kind.
    pub kind: AllocationErrorKind,
    /// Error message.
    pub message: String,
}

/// Result of a backfill batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    /// Target portfolio.
    pub portfolio: PortfolioCode,
    /// Processed records, in input order.
    pub entries: Vec<BackfillEntry>,
    /// Records not reached because the batch halted.
    pub unprocessed: usize,
    /// The error that stopped the batch, if any.
    pub halted: Option<BackfillHalt>,
}

impl BackfillReport {
    /// Number of newly assigned references.
    #[must_use]
    pub fn assigned(&self) -> usize {
        self.count(|o| matches!(o, BackfillOutcome::Assigned { .. }))
    }

    /// Number of kept references.
    #[must_use]
    pub fn kept(&self) -> usize {
        self.count(|o| matches!(o, BackfillOutcome::Kept { .. }))
    }

    /// Number of failed records, excluding unprocessed ones.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, BackfillOutcome::Failed { .. }))
    }

    /// Returns true if every record was processed.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.halted.is_none()
    }

    fn count(&self, pred: impl Fn(&BackfillOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

/// Errors after which no later record can succeed.
const fn halts_batch(err: &AllocationError) -> bool {
    matches!(
        err,
        AllocationError::SpaceExhausted { .. }
            | AllocationError::InvalidPortfolio { .. }
            | AllocationError::Storage(_)
            | AllocationError::Config(_)
    )
}

impl ClientReferenceService {
    /// Assigns references to legacy records of one portfolio.
    ///
    /// Existing references are validated with the strict parser, must
    /// belong to `portfolio` and must already be issued by the store; a
    /// reference seen twice in the batch fails the second record. Allocation
    /// contention fails only the record at hand.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::InvalidPortfolio`] before touching any
    /// record. Errors hit mid-batch are reported in
    /// [`BackfillReport::halted`] instead.
    pub async fn backfill<I>(&self, portfolio: i64, records: I) -> Result<BackfillReport>
    where
        I: IntoIterator<Item = LegacyRecord>,
    {
        let code = self.allocator().validate(portfolio)?;
        let records: Vec<LegacyRecord> = records.into_iter().collect();
        let span = backfill_span(portfolio, records.len());

        let report = self.backfill_records(code, records).instrument(span).await;
        tracing::info!(
            portfolio,
            assigned = report.assigned(),
            kept = report.kept(),
            failed = report.failed(),
            unprocessed = report.unprocessed,
            "backfill finished"
        );
        Ok(report)
    }

    async fn backfill_records(
        &self,
        portfolio: PortfolioCode,
        records: Vec<LegacyRecord>,
    ) -> BackfillReport {
        let total = records.len();
        let mut entries = Vec::with_capacity(total);
        let mut seen: HashSet<String> = HashSet::new();
        let mut halted = None;

        for record in records {
            let result = match record.existing_reference.as_deref().map(str::trim) {
                Some(existing) if !existing.is_empty() => {
                    self.keep_existing(portfolio, existing, &mut seen).await
                }
                _ => self
                    .generate_client_reference(i64::from(portfolio.get()))
                    .await
                    .map(|reference| {
                        seen.insert(reference.as_str().to_string());
                        BackfillOutcome::Assigned { reference }
                    }),
            };

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(err) if halts_batch(&err) => {
                    tracing::error!(id = %record.id, error = %err, "backfill halted");
                    halted = Some(BackfillHalt {
                        id: record.id,
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                    break;
                }
                Err(err) => {
                    tracing::warn!(id = %record.id, error = %err, "record not backfilled");
                    BackfillOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
            };
            entries.push(BackfillEntry {
                id: record.id,
                outcome,
            });
        }

        let unprocessed = total - entries.len();
        BackfillReport {
            portfolio,
            entries,
            unprocessed,
            halted,
        }
    }

    /// Keeps a reference the store has already issued.
    ///
    /// References the store has not issued yet are rejected: the allocator
    /// would hand them out again later.
    async fn keep_existing(
        &self,
        portfolio: PortfolioCode,
        existing: &str,
        seen: &mut HashSet<String>,
    ) -> Result<BackfillOutcome> {
        let format = self.format();
        let triple = match format.parse(existing) {
            Ok(triple) if triple.portfolio != portfolio => {
                return Ok(BackfillOutcome::Failed {
                    reason: format!(
                        "reference {existing} does not belong to portfolio {portfolio}"
                    ),
                });
            }
            Ok(triple) => triple,
            Err(err) => {
                return Ok(BackfillOutcome::Failed {
                    reason: err.to_string(),
                });
            }
        };
        let reference = format.format(&triple)?;

        let rows = self.allocator().store().buckets(portfolio).await?;
        if !is_issued(&rows, triple.alpha, triple.sequence) {
            return Ok(BackfillOutcome::Failed {
                reason: format!(
                    "reference {reference} has not been issued for portfolio {portfolio}"
                ),
            });
        }
        if !seen.insert(reference.as_str().to_string()) {
            return Ok(BackfillOutcome::Failed {
                reason: format!("reference {reference} appears more than once"),
            });
        }
        Ok(BackfillOutcome::Kept { reference })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::AllocatorConfig;
    use crate::store::SqliteBucketStore;

    fn service(capacity: u32) -> ClientReferenceService {
        let store = Arc::new(SqliteBucketStore::open_in_memory().unwrap());
        ClientReferenceService::new(store, &AllocatorConfig::default().with_capacity(capacity))
            .unwrap()
    }

    async fn issue(service: &ClientReferenceService, portfolio: i64, count: usize) {
        for _ in 0..count {
            service.generate_client_reference(portfolio).await.unwrap();
        }
    }

    fn references(report: &BackfillReport) -> Vec<String> {
        report
            .entries
            .iter()
            .map(|e| match &e.outcome {
                BackfillOutcome::Assigned { reference } | BackfillOutcome::Kept { reference } => {
                    reference.to_string()
                }
                BackfillOutcome::Failed { reason } => panic!("{reason}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn assigns_and_keeps_in_order() {
        let service = service(999);
        issue(&service, 2, 3).await;

        let records = vec![
            LegacyRecord::new("c-1"),
            LegacyRecord::with_reference("c-2", "2A002"),
            LegacyRecord::new("c-3"),
            LegacyRecord::with_reference("c-4", "  "),
        ];

        let report = service.backfill(2, records).await.unwrap();
        assert!(report.is_complete());
        assert_eq!((report.assigned(), report.kept(), report.failed()), (3, 1, 0));
        assert_eq!(references(&report), vec!["2A004", "2A002", "2A005", "2A006"]);
    }

    #[tokio::test]
    async fn rejects_malformed_foreign_unissued_and_duplicate_references() {
        let service = service(999);
        issue(&service, 2, 5).await;

        let records = vec![
            LegacyRecord::with_reference("bad", "2-A-1"),
            LegacyRecord::with_reference("foreign", "3A001"),
            LegacyRecord::with_reference("first", "2A005"),
            LegacyRecord::with_reference("again", "2A005"),
            LegacyRecord::with_reference("ahead", "2A006"),
            LegacyRecord::with_reference("other-letter", "2C001"),
        ];

        let report = service.backfill(2, records).await.unwrap();
        assert_eq!((report.kept(), report.failed()), (1, 5));
        assert!(matches!(
            report.entries[3].outcome,
            BackfillOutcome::Failed { ref reason } if reason.contains("more than once")
        ));
        for entry in &report.entries[4..] {
            assert!(matches!(
                entry.outcome,
                BackfillOutcome::Failed { ref reason } if reason.contains("not been issued")
            ));
        }
    }

    #[tokio::test]
    async fn unissued_reference_is_not_kept_and_stays_available() {
        let service = service(999);

        let report = service
            .backfill(1, vec![LegacyRecord::with_reference("legacy", "1A003")])
            .await
            .unwrap();
        assert_eq!((report.kept(), report.failed()), (0, 1));

        issue(&service, 1, 2).await;
        assert_eq!(
            service.generate_client_reference(1).await.unwrap().as_str(),
            "1A003"
        );
    }

    #[tokio::test]
    async fn kept_reference_is_never_issued_again() {
        let service = service(999);
        issue(&service, 1, 3).await;

        let report = service
            .backfill(1, vec![LegacyRecord::with_reference("legacy", "1A003")])
            .await
            .unwrap();
        assert_eq!(report.kept(), 1);

        for _ in 0..5 {
            let reference = service.generate_client_reference(1).await.unwrap();
            assert_ne!(reference.as_str(), "1A003");
        }
    }

    #[tokio::test]
    async fn reference_assigned_earlier_in_batch_is_a_duplicate() {
        let service = service(999);
        let records = vec![
            LegacyRecord::new("new"),
            LegacyRecord::with_reference("copy", "7A001"),
        ];

        let report = service.backfill(7, records).await.unwrap();
        assert_eq!((report.assigned(), report.failed()), (1, 1));
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn halts_when_space_runs_out() {
        let service = service(1);
        let records: Vec<LegacyRecord> =
            (0..30).map(|i| LegacyRecord::new(format!("r{i}"))).collect();

        let report = service.backfill(5, records).await.unwrap();
        assert_eq!(report.assigned(), 26);
        assert_eq!(report.entries.len(), 26);
        assert_eq!(report.unprocessed, 4);

        let halt = report.halted.expect("batch should halt");
        assert_eq!(halt.id, "r26");
        assert_eq!(halt.kind, AllocationErrorKind::SpaceExhausted);
    }

    #[tokio::test]
    async fn invalid_portfolio_fails_before_any_record() {
        let service = service(999);
        let err = service
            .backfill(0, vec![LegacyRecord::new("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::InvalidPortfolio { .. }));
    }

    #[test]
    fn report_serializes_with_outcome_tags() {
        let report = BackfillReport {
            portfolio: PortfolioCode::new_unchecked(1),
            entries: vec![BackfillEntry {
                id: "c-1".into(),
                outcome: BackfillOutcome::Failed {
                    reason: "nope".into(),
                },
            }],
            unprocessed: 0,
            halted: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["entries"][0]["outcome"], "failed");
        assert_eq!(json["entries"][0]["id"], "c-1");
        assert_eq!(json["portfolio"], 1);
    }
}
