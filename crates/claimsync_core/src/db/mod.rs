//! Durable ledger file: connection setup and schema versioning.
//!
//! The ledger holds three tables. `records` is the write-ahead queue, with
//! triggers that only allow the `pending -> synced` transition. `delivery_attempts`
//! is the append-only audit of every delivery. `sync_claims` holds the
//! single-flight claims of running sync cycles, shared by every process that
//! opens the same file.
//!
//! # Invariants
//! - Schema version lives in `PRAGMA user_version` and is migrated on open.
//! - A record is acknowledged only after its insert commits on a connection
//!   running `journal_mode=WAL` with `synchronous=FULL`.
//! - A file written by a newer binary is refused with
//!   [`DbError::UnsupportedSchemaVersion`] rather than opened read-write, since
//!   older code would not honour triggers or claims it does not know about.
//! - `SqliteRecordStore::try_new` re-checks version and tables on connections
//!   it did not open, so a caller-supplied unmigrated connection cannot
//!   acknowledge a record.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// A previous holder of the store connection panicked mid-operation.
    LockPoisoned,
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::LockPoisoned => write!(f, "store connection lock is poisoned"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
            Self::LockPoisoned => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
