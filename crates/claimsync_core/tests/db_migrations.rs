use claimsync_core::db::migrations::latest_version;
use claimsync_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "records");
    assert_table_exists(&conn, "delivery_attempts");
    assert_table_exists(&conn, "sync_claims");
}

#[test]
fn file_database_uses_wal_and_full_sync() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("queue.sqlite3")).unwrap();

    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    let synchronous: i64 = conn
        .query_row("PRAGMA synchronous;", [], |row| row.get(0))
        .unwrap();

    assert_eq!(journal_mode.to_ascii_lowercase(), "wal");
    // FULL
    assert_eq!(synchronous, 2);
}

#[test]
fn reopening_same_database_keeps_schema_and_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.sqlite3");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    conn_first
        .execute(
            "INSERT INTO records (payload, destination, created_at) VALUES ('{}', 'https://payer.example/submit', 1);",
            [],
        )
        .unwrap();
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let rows: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM records;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite3");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn attempts_ledger_is_append_only() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO records (payload, destination, created_at) VALUES ('{}', 'https://payer.example/submit', 1);",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO delivery_attempts
            (record_id, delivery_key, outcome, error_kind, detail, elapsed_ms, attempted_at)
         VALUES (1, 'ck1-x', 'deferred', 'transient_delivery', 'http_503', 5, 2);",
        [],
    )
    .unwrap();

    assert!(conn
        .execute("UPDATE delivery_attempts SET outcome = 'confirmed';", [])
        .is_err());
    assert!(conn.execute("DELETE FROM delivery_attempts;", []).is_err());
}

#[test]
fn attempt_outcome_is_constrained() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO records (payload, destination, created_at) VALUES ('{}', 'https://payer.example/submit', 1);",
        [],
    )
    .unwrap();

    let result = conn.execute(
        "INSERT INTO delivery_attempts
            (record_id, delivery_key, outcome, elapsed_ms, attempted_at)
         VALUES (1, 'ck1-x', 'abandoned', 0, 2);",
        [],
    );
    assert!(result.is_err());
}

#[test]
fn sync_claim_scope_is_unique() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO sync_claims (scope, holder, claimed_at) VALUES ('', 'a', 1);",
        [],
    )
    .unwrap();

    let second = conn.execute(
        "INSERT INTO sync_claims (scope, holder, claimed_at) VALUES ('', 'b', 2);",
        [],
    );
    assert!(second.is_err());
    let blank_holder = conn.execute(
        "INSERT INTO sync_claims (scope, holder, claimed_at) VALUES ('x', '', 3);",
        [],
    );
    assert!(blank_holder.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
