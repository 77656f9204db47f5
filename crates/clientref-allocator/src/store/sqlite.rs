//! Bucket store on SQLite.
//!
//! One row per `(portfolio_code, alpha)`. A claim runs inside a
//! `BEGIN IMMEDIATE` transaction and advances the claimed row with
//! `UPDATE ... WHERE next_index = ?`, inserting the next letter's row in the
//! same transaction on rollover. Several processes may share one database
//! file; each opens its own store.
//!
//! Claims run on the blocking pool, which keeps going after the caller's
//! future is dropped. An abandoned claim is rolled back instead of committed,
//! so a cancelled caller consumes no sequence number.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};

use clientref_core::error::{Error, Result};
use clientref_core::{Alpha, BucketState, PortfolioCode, ReferenceBucket};

use super::{BucketStore, ClaimOutcome, ClaimedSequence, plan_claim};

/// Current schema version, tracked in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Default time a claim waits for another connection's write lock before
/// reporting a conflict.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(1);

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS reference_buckets (
    portfolio_code INTEGER NOT NULL CHECK (portfolio_code > 0),
    alpha          TEXT    NOT NULL CHECK (length(alpha) = 1 AND alpha BETWEEN 'A' AND 'Z'),
    next_index     INTEGER NOT NULL CHECK (next_index >= 1),
    updated_at     TEXT    NOT NULL,
    PRIMARY KEY (portfolio_code, alpha)
);

CREATE TRIGGER IF NOT EXISTS reference_buckets_monotonic
BEFORE UPDATE OF next_index ON reference_buckets
WHEN NEW.next_index < OLD.next_index
BEGIN
    SELECT RAISE(ABORT, 'next_index must never decrease');
END;

CREATE TRIGGER IF NOT EXISTS reference_buckets_append_only
BEFORE DELETE ON reference_buckets
BEGIN
    SELECT RAISE(ABORT, 'reference buckets are never deleted');
END;
";

/// Bucket store backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteBucketStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBucketStore {
    /// Opens or creates a database file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the database cannot be opened or its
    /// schema cannot be initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening reference bucket database");

        let conn = Connection::open(path).map_err(|e| sql_error("failed to open database", e))?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .map_err(|e| sql_error("failed to set busy timeout", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| sql_error("failed to set pragmas", e))?;

        Self::from_connection(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the schema cannot be initialized.
    pub fn open_in_memory() -> Result<Self> {
        tracing::debug!("opening in-memory reference bucket database");
        let conn = Connection::open_in_memory()
            .map_err(|e| sql_error("failed to open in-memory database", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .map_err(|e| sql_error("failed to set busy timeout", e))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Sets how long a claim waits for another connection's write lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the timeout cannot be applied.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        conn.busy_timeout(timeout)
            .map_err(|e| sql_error("failed to set busy timeout", e))
    }

    /// Runs `f` against the connection on the blocking thread pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| poisoned())?;
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::internal(format!("sqlite task failed: {e}")))?
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| sql_error("failed to read schema version", e))?;

    if version > SCHEMA_VERSION {
        return Err(Error::storage(format!(
            "database schema v{version} is newer than supported v{SCHEMA_VERSION}"
        )));
    }
    if version == SCHEMA_VERSION {
        tracing::debug!(version, "reference bucket schema is up to date");
        return Ok(());
    }

    tracing::info!(version = SCHEMA_VERSION, "creating reference bucket schema");
    conn.execute_batch(SCHEMA)
        .map_err(|e| sql_error("failed to create schema", e))?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| sql_error("failed to set schema version", e))?;
    Ok(())
}

fn sql_error(context: &str, err: rusqlite::Error) -> Error {
    Error::storage_with_source(format!("{context}: {err}"), err)
}

fn poisoned() -> Error {
    Error::internal("sqlite connection lock poisoned")
}

/// Marks a claim abandoned when the future awaiting it is dropped.
///
/// Dropping after the claim finished is harmless: the flag is only read
/// inside the transaction.
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn abandoned(portfolio: PortfolioCode) -> Error {
    tracing::debug!(%portfolio, "caller went away, rolling back claim");
    Error::internal(format!("claim for portfolio {portfolio} abandoned by caller"))
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn alpha_from_column(portfolio: PortfolioCode, raw: &str) -> Result<Alpha> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Alpha::try_from(c),
        _ => Err(Error::Serialization {
            message: format!("portfolio {portfolio} has a bucket with invalid letter {raw:?}"),
        }),
    }
}

fn read_rows(conn: &Connection, portfolio: PortfolioCode) -> Result<Vec<ReferenceBucket>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT alpha, next_index FROM reference_buckets
             WHERE portfolio_code = ?1 ORDER BY alpha",
        )
        .map_err(|e| sql_error("failed to prepare bucket query", e))?;

    let raw = stmt
        .query_map(params![portfolio.get()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| sql_error("failed to read buckets", e))?;

    raw.into_iter()
        .map(|(alpha, next_index)| {
            Ok(ReferenceBucket {
                portfolio_code: portfolio,
                alpha: alpha_from_column(portfolio, &alpha)?,
                next_index,
            })
        })
        .collect()
}

fn read_active(conn: &Connection, portfolio: PortfolioCode) -> Result<Option<BucketState>> {
    let row = conn
        .query_row(
            "SELECT alpha, next_index FROM reference_buckets
             WHERE portfolio_code = ?1 ORDER BY alpha DESC LIMIT 1",
            params![portfolio.get()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
        )
        .optional()
        .map_err(|e| sql_error("failed to read active bucket", e))?;

    row.map(|(alpha, next_index)| {
        BucketState::new(alpha_from_column(portfolio, &alpha)?, next_index)
    })
    .transpose()
}

fn claim_in_transaction(
    conn: &mut Connection,
    portfolio: PortfolioCode,
    expected: BucketState,
    capacity: u32,
    abandon: &AtomicBool,
) -> Result<ClaimOutcome> {
    if abandon.load(Ordering::SeqCst) {
        return Err(abandoned(portfolio));
    }
    let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
        Ok(tx) => tx,
        Err(e) if is_busy(&e) => return Ok(ClaimOutcome::Conflict { observed: None }),
        Err(e) => return Err(sql_error("failed to begin claim", e)),
    };

    let current = read_active(&tx, portfolio)?.unwrap_or(BucketState::INITIAL);
    let claim = match plan_claim(current, expected, capacity) {
        Ok(claim) => claim,
        // Dropping the transaction rolls it back.
        Err(outcome) => return Ok(outcome),
    };

    let now = Utc::now().to_rfc3339();
    for (alpha, next_index) in claim.row_writes() {
        let letter = alpha.as_char().to_string();
        let stored: Option<u32> = tx
            .query_row(
                "SELECT next_index FROM reference_buckets
                 WHERE portfolio_code = ?1 AND alpha = ?2",
                params![portfolio.get(), letter],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| sql_error("failed to read bucket", e))?;

        match stored {
            Some(observed) => {
                let changed = tx
                    .execute(
                        "UPDATE reference_buckets SET next_index = ?1, updated_at = ?2
                         WHERE portfolio_code = ?3 AND alpha = ?4 AND next_index = ?5",
                        params![next_index, now, portfolio.get(), letter, observed],
                    )
                    .map_err(|e| sql_error("failed to advance bucket", e))?;
                if changed == 0 {
                    return Ok(ClaimOutcome::Conflict { observed: None });
                }
            }
            None => {
                let inserted = tx.execute(
                    "INSERT INTO reference_buckets (portfolio_code, alpha, next_index, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![portfolio.get(), letter, next_index, now],
                );
                match inserted {
                    Ok(_) => {}
                    Err(e) if is_primary_key_violation(&e) => {
                        return Ok(ClaimOutcome::Conflict { observed: None });
                    }
                    Err(e) => return Err(sql_error("failed to open bucket", e)),
                }
            }
        }
    }

    // Dropping the transaction rolls the row writes back.
    if abandon.load(Ordering::SeqCst) {
        return Err(abandoned(portfolio));
    }

    match tx.commit() {
        Ok(()) => Ok(ClaimOutcome::Claimed(ClaimedSequence {
            portfolio,
            claim,
            bucket_after: claim.bucket_after(),
        })),
        Err(e) if is_busy(&e) => Ok(ClaimOutcome::Conflict { observed: None }),
        Err(e) => Err(sql_error("failed to commit claim", e)),
    }
}

#[async_trait]
impl BucketStore for SqliteBucketStore {
    async fn active_bucket(&self, portfolio: PortfolioCode) -> Result<Option<BucketState>> {
        self.with_conn(move |conn| read_active(conn, portfolio)).await
    }

    async fn claim_and_advance(
        &self,
        portfolio: PortfolioCode,
        expected: BucketState,
        capacity: u32,
    ) -> Result<ClaimOutcome> {
        let abandon = Arc::new(AtomicBool::new(false));
        let _guard = AbandonOnDrop(Arc::clone(&abandon));
        self.with_conn(move |conn| {
            claim_in_transaction(conn, portfolio, expected, capacity, &abandon)
        })
        .await
    }

    async fn buckets(&self, portfolio: PortfolioCode) -> Result<Vec<ReferenceBucket>> {
        self.with_conn(move |conn| read_rows(conn, portfolio)).await
    }
}
