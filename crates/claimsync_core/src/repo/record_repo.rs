//! Durable record store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist queued records as an append-only write-ahead ledger.
//! - Serve pending records oldest-first and reconcile them to `synced`.
//! - Keep the delivery attempt audit trail next to the ledger.
//!
//! # Invariants
//! - A record is either fully visible or absent; appends run in one transaction.
//! - Every mutating call has committed (and fsynced) before it returns.
//! - Pending reads are ordered by ascending `id`.
//! - `mark_synced` is idempotent and never reverses a status.
//! - Sync claims live in the ledger file, so they hold across dispatchers and
//!   processes sharing it.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::latest_version;
use crate::db::{open_db, DbError};
use crate::model::record::{
    AttemptOutcome, DeliveryAttempt, DeliveryErrorKind, NewDeliveryAttempt, Record, RecordId,
    RecordStatus,
};
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const RECORD_SELECT_SQL: &str = "SELECT
    id,
    payload,
    destination,
    status,
    created_at
FROM records";

const ATTEMPT_SELECT_SQL: &str = "SELECT
    id,
    record_id,
    delivery_key,
    outcome,
    error_kind,
    detail,
    elapsed_ms,
    attempted_at
FROM delivery_attempts";

pub type RepoResult<T> = Result<T, RepoError>;

/// Record store error.
#[derive(Debug)]
pub enum RepoError {
    /// The local medium could not guarantee the read or write.
    StorageFault(DbError),
    /// Referenced record id does not exist.
    NotFound(RecordId),
    /// Caller input rejected before touching storage.
    Validation(String),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
    /// Connection schema version does not match this binary.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing from the connected database.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StorageFault(err) => write!(f, "storage fault: {err}"),
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::Validation(message) => write!(f, "invalid record input: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "record store requires schema version {expected_version}, found {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "record store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "record store requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StorageFault(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::StorageFault(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::StorageFault(DbError::Sqlite(value))
    }
}

/// Repository interface for the durable record queue.
pub trait RecordStore: Send + Sync {
    /// Persists a new `pending` record and returns its id.
    fn append(&self, payload: &str, destination: &str) -> RepoResult<RecordId>;
    /// Returns pending records ascending by id, at most `limit` when set.
    fn list_pending(&self, limit: Option<u32>) -> RepoResult<Vec<Record>>;
    /// Same as `list_pending`, restricted to one destination.
    fn list_pending_for(&self, destination: &str, limit: Option<u32>) -> RepoResult<Vec<Record>>;
    /// Moves a record to `synced`.
    ///
    /// Returns `false` without error when the record was already synced, so
    /// callers can tell their own transition from someone else's.
    fn mark_synced(&self, id: RecordId) -> RepoResult<bool>;
    fn get_record(&self, id: RecordId) -> RepoResult<Option<Record>>;
    /// Counts pending records, optionally for one destination.
    fn count_pending(&self, destination: Option<&str>) -> RepoResult<u64>;
    fn count_all(&self) -> RepoResult<u64>;
    /// Appends one row to the delivery attempt audit trail.
    fn record_attempt(&self, attempt: &NewDeliveryAttempt) -> RepoResult<i64>;
    /// Returns attempts for one record, oldest first.
    fn list_attempts(&self, record_id: RecordId) -> RepoResult<Vec<DeliveryAttempt>>;
    /// Returns pending records whose latest attempt was a permanent rejection.
    fn list_flagged(&self) -> RepoResult<Vec<Record>>;
    /// Takes the single-flight claim for `scope` (`None` is the whole queue).
    ///
    /// Claims older than `stale_before` (epoch ms) are discarded first. Returns
    /// `false` when an overlapping claim is held: the whole queue overlaps
    /// every destination.
    fn claim_sync_scope(
        &self,
        scope: Option<&str>,
        holder: &str,
        stale_before: i64,
    ) -> RepoResult<bool>;
    /// Drops a claim taken by `holder`. Returns `false` when it was no longer held.
    fn release_sync_scope(&self, scope: Option<&str>, holder: &str) -> RepoResult<bool>;
}

/// SQLite-backed record store.
///
/// Owns the single long-lived connection for the process; each call takes a
/// scoped guard on it, which also serializes appends against status updates.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Wraps a migrated connection after checking its schema.
    pub fn try_new(conn: Connection) -> RepoResult<Self> {
        ensure_store_connection_ready(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens (creating and migrating if needed) the ledger file at `path`.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        let conn = open_db(path)?;
        Self::try_new(conn)
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RepoError::StorageFault(DbError::LockPoisoned))
    }
}

impl RecordStore for SqliteRecordStore {
    fn append(&self, payload: &str, destination: &str) -> RepoResult<RecordId> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(RepoError::Validation(
                "destination cannot be empty".to_string(),
            ));
        }

        let created_at = now_epoch_ms();
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO records (payload, destination, status, created_at)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                payload,
                destination,
                RecordStatus::Pending.as_str(),
                created_at
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        info!(
            "event=record_append module=store status=ok record_id={} payload_bytes={}",
            id,
            payload.len()
        );
        Ok(id)
    }

    fn list_pending(&self, limit: Option<u32>) -> RepoResult<Vec<Record>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{RECORD_SELECT_SQL}
             WHERE status = 'pending'
             ORDER BY id ASC
             LIMIT ?1;"
        ))?;
        let mut rows = stmt.query([sql_limit(limit)])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn list_pending_for(&self, destination: &str, limit: Option<u32>) -> RepoResult<Vec<Record>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{RECORD_SELECT_SQL}
             WHERE status = 'pending'
               AND destination = ?1
             ORDER BY id ASC
             LIMIT ?2;"
        ))?;
        let mut rows = stmt.query(params![destination.trim(), sql_limit(limit)])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn mark_synced(&self, id: RecordId) -> RepoResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE records
             SET status = 'synced'
             WHERE id = ?1
               AND status = 'pending';",
            [id],
        )?;

        if changed == 0 {
            let exists: i64 = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM records WHERE id = ?1);",
                [id],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Err(RepoError::NotFound(id));
            }
            debug!("event=record_mark_synced module=store status=noop record_id={id}");
            return Ok(false);
        }

        tx.commit()?;
        info!("event=record_mark_synced module=store status=ok record_id={id}");
        Ok(true)
    }

    fn get_record(&self, id: RecordId) -> RepoResult<Option<Record>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!("{RECORD_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record_row(row)?));
        }
        Ok(None)
    }

    fn count_pending(&self, destination: Option<&str>) -> RepoResult<u64> {
        let conn = self.lock()?;
        let count: i64 = match destination {
            Some(destination) => conn.query_row(
                "SELECT COUNT(*) FROM records WHERE status = 'pending' AND destination = ?1;",
                [destination.trim()],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM records WHERE status = 'pending';",
                [],
                |row| row.get(0),
            )?,
        };
        to_count(count)
    }

    fn count_all(&self) -> RepoResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records;", [], |row| row.get(0))?;
        to_count(count)
    }

    fn record_attempt(&self, attempt: &NewDeliveryAttempt) -> RepoResult<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let exists = tx
            .query_row("SELECT 1 FROM records WHERE id = ?1;", [attempt.record_id], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(RepoError::NotFound(attempt.record_id));
        }

        tx.execute(
            "INSERT INTO delivery_attempts (
                record_id,
                delivery_key,
                outcome,
                error_kind,
                detail,
                elapsed_ms,
                attempted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                attempt.record_id,
                attempt.delivery_key.as_str(),
                attempt.outcome.as_str(),
                attempt.error_kind.map(DeliveryErrorKind::as_str),
                attempt.detail.as_deref(),
                i64::try_from(attempt.elapsed_ms).unwrap_or(i64::MAX),
                attempt.attempted_at,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    fn list_attempts(&self, record_id: RecordId) -> RepoResult<Vec<DeliveryAttempt>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{ATTEMPT_SELECT_SQL}
             WHERE record_id = ?1
             ORDER BY id ASC;"
        ))?;
        let mut rows = stmt.query([record_id])?;
        let mut attempts = Vec::new();
        while let Some(row) = rows.next()? {
            attempts.push(parse_attempt_row(row)?);
        }
        Ok(attempts)
    }

    fn list_flagged(&self) -> RepoResult<Vec<Record>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT
                r.id AS id,
                r.payload AS payload,
                r.destination AS destination,
                r.status AS status,
                r.created_at AS created_at
             FROM records r
             WHERE r.status = 'pending'
               AND (
                   SELECT a.outcome
                   FROM delivery_attempts a
                   WHERE a.record_id = r.id
                   ORDER BY a.id DESC
                   LIMIT 1
               ) = 'fatal'
             ORDER BY r.id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn claim_sync_scope(
        &self,
        scope: Option<&str>,
        holder: &str,
        stale_before: i64,
    ) -> RepoResult<bool> {
        if holder.trim().is_empty() {
            return Err(RepoError::Validation(
                "claim holder cannot be empty".to_string(),
            ));
        }
        let scope = claim_scope_key(scope);

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let expired = tx.execute(
            "DELETE FROM sync_claims WHERE claimed_at < ?1;",
            [stale_before],
        )?;
        if expired > 0 {
            warn!("event=sync_claim module=store status=expired released_count={expired}");
        }

        let held: i64 = if scope == WHOLE_QUEUE_SCOPE {
            tx.query_row("SELECT EXISTS(SELECT 1 FROM sync_claims);", [], |row| {
                row.get(0)
            })?
        } else {
            tx.query_row(
                "SELECT EXISTS(
                    SELECT 1
                    FROM sync_claims
                    WHERE scope IN (?1, ?2)
                );",
                params![WHOLE_QUEUE_SCOPE, scope],
                |row| row.get(0),
            )?
        };
        if held != 0 {
            tx.commit()?;
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO sync_claims (scope, holder, claimed_at) VALUES (?1, ?2, ?3);",
            params![scope, holder, now_epoch_ms()],
        )?;
        tx.commit()?;
        debug!("event=sync_claim module=store status=held holder={holder}");
        Ok(true)
    }

    fn release_sync_scope(&self, scope: Option<&str>, holder: &str) -> RepoResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM sync_claims WHERE scope = ?1 AND holder = ?2;",
            params![claim_scope_key(scope), holder],
        )?;
        Ok(removed > 0)
    }
}

const WHOLE_QUEUE_SCOPE: &str = "";

fn claim_scope_key(scope: Option<&str>) -> &str {
    scope.map(str::trim).unwrap_or(WHOLE_QUEUE_SCOPE)
}

fn parse_record_row(row: &Row<'_>) -> RepoResult<Record> {
    let status_text: String = row.get("status")?;
    let status = RecordStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{status_text}` in records.status"))
    })?;

    Ok(Record {
        id: row.get("id")?,
        payload: row.get("payload")?,
        destination: row.get("destination")?,
        status,
        created_at: row.get("created_at")?,
    })
}

fn parse_attempt_row(row: &Row<'_>) -> RepoResult<DeliveryAttempt> {
    let outcome_text: String = row.get("outcome")?;
    let outcome = AttemptOutcome::parse(&outcome_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid outcome `{outcome_text}` in delivery_attempts.outcome"
        ))
    })?;

    let error_kind = match row.get::<_, Option<String>>("error_kind")? {
        Some(value) => Some(DeliveryErrorKind::parse(&value).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid error kind `{value}` in delivery_attempts.error_kind"
            ))
        })?),
        None => None,
    };

    let elapsed_ms: i64 = row.get("elapsed_ms")?;
    let elapsed_ms = u64::try_from(elapsed_ms).map_err(|_| {
        RepoError::InvalidData(format!(
            "negative elapsed_ms `{elapsed_ms}` in delivery_attempts.elapsed_ms"
        ))
    })?;

    Ok(DeliveryAttempt {
        id: row.get("id")?,
        record_id: row.get("record_id")?,
        delivery_key: row.get("delivery_key")?,
        outcome,
        error_kind,
        detail: row.get("detail")?,
        elapsed_ms,
        attempted_at: row.get("attempted_at")?,
    })
}

fn sql_limit(limit: Option<u32>) -> i64 {
    // SQLite treats a negative LIMIT as unbounded.
    limit.map_or(-1, i64::from)
}

fn to_count(value: i64) -> RepoResult<u64> {
    u64::try_from(value).map_err(|_| RepoError::InvalidData(format!("negative count `{value}`")))
}

pub(crate) fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn ensure_store_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    let required: [(&'static str, &[&'static str]); 3] = [
        (
            "records",
            &["id", "payload", "destination", "status", "created_at"],
        ),
        (
            "delivery_attempts",
            &[
                "id",
                "record_id",
                "delivery_key",
                "outcome",
                "error_kind",
                "detail",
                "elapsed_ms",
                "attempted_at",
            ],
        ),
        ("sync_claims", &["scope", "holder", "claimed_at"]),
    ];

    for (table, columns) in required {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(RepoError::MissingRequiredColumn { table, column });
            }
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
