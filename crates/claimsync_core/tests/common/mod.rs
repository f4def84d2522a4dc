#![allow(dead_code)]

use claimsync_core::db::{open_db_in_memory, DbError};
use claimsync_core::{
    CancelFlag, DeliveryAttempt, DeliveryOutcome, DeliveryRequest, DeliveryTransport,
    NewDeliveryAttempt, Record, RecordId, RecordStore, RepoError, RepoResult, SqliteRecordStore,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PAYER: &str = "https://payer.example/submit";
pub const OTHER_PAYER: &str = "https://other-payer.example/submit";
pub const BOILS_PAYLOAD: &str = r#"{"diagnosis":"Boils","codes":["NAMASTE:Prameha"]}"#;

pub fn memory_store() -> Arc<SqliteRecordStore> {
    Arc::new(SqliteRecordStore::try_new(open_db_in_memory().unwrap()).unwrap())
}

/// One call observed by a test transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenDelivery {
    pub payload: String,
    pub destination: String,
    pub idempotency_key: String,
    pub timeout: Duration,
}

impl SeenDelivery {
    fn from_request(request: &DeliveryRequest<'_>) -> Self {
        Self {
            payload: request.payload.to_string(),
            destination: request.destination.to_string(),
            idempotency_key: request.idempotency_key.to_string(),
            timeout: request.timeout,
        }
    }
}

/// Replays queued outcomes in order, then confirms everything.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<DeliveryOutcome>>,
    seen: Mutex<Vec<SeenDelivery>>,
    cancel_after_first: Mutex<Option<CancelFlag>>,
}

impl ScriptedTransport {
    pub fn new(outcomes: impl IntoIterator<Item = DeliveryOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn confirming() -> Self {
        Self::default()
    }

    /// Raises `flag` while the first delivery is in flight.
    pub fn cancelling_during_first(self, flag: CancelFlag) -> Self {
        *self.cancel_after_first.lock().unwrap() = Some(flag);
        self
    }

    pub fn seen(&self) -> Vec<SeenDelivery> {
        self.seen.lock().unwrap().clone()
    }

    pub fn seen_payloads(&self) -> Vec<String> {
        self.seen().into_iter().map(|seen| seen.payload).collect()
    }
}

impl DeliveryTransport for ScriptedTransport {
    fn transport_id(&self) -> &str {
        "scripted"
    }

    fn deliver(&self, request: &DeliveryRequest<'_>) -> DeliveryOutcome {
        self.seen
            .lock()
            .unwrap()
            .push(SeenDelivery::from_request(request));
        if let Some(flag) = self.cancel_after_first.lock().unwrap().take() {
            flag.cancel();
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DeliveryOutcome::Confirmed)
    }
}

/// Sleeps past any sensible timeout, then reports `outcome`.
pub struct SlowTransport {
    pub delay: Duration,
    pub outcome: DeliveryOutcome,
}

impl DeliveryTransport for SlowTransport {
    fn transport_id(&self) -> &str {
        "slow"
    }

    fn deliver(&self, _request: &DeliveryRequest<'_>) -> DeliveryOutcome {
        std::thread::sleep(self.delay);
        self.outcome.clone()
    }
}

/// Parks inside `deliver` until the test releases it.
pub struct GateTransport {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl GateTransport {
    /// Returns the transport plus (entered receiver, release sender).
    pub fn new() -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        (
            Self {
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            },
            entered_rx,
            release_tx,
        )
    }
}

impl DeliveryTransport for GateTransport {
    fn transport_id(&self) -> &str {
        "gate"
    }

    fn deliver(&self, _request: &DeliveryRequest<'_>) -> DeliveryOutcome {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        DeliveryOutcome::Confirmed
    }
}

/// Marks the delivered record synced through the store, as a concurrent writer would.
pub struct RacingTransport {
    pub store: Arc<SqliteRecordStore>,
}

impl DeliveryTransport for RacingTransport {
    fn transport_id(&self) -> &str {
        "racing"
    }

    fn deliver(&self, request: &DeliveryRequest<'_>) -> DeliveryOutcome {
        for record in self.store.list_pending_for(request.destination, None).unwrap() {
            if record.payload == request.payload {
                self.store.mark_synced(record.id).unwrap();
            }
        }
        DeliveryOutcome::Confirmed
    }
}

pub fn disk_fault() -> RepoError {
    RepoError::StorageFault(DbError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
        Some("disk I/O error".to_string()),
    )))
}

/// Delegates to a real store, failing selected writes while armed.
pub struct FaultyStore {
    pub inner: SqliteRecordStore,
    pub fail_mark_synced: AtomicBool,
    pub fail_record_attempt: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: SqliteRecordStore) -> Self {
        Self {
            inner,
            fail_mark_synced: AtomicBool::new(false),
            fail_record_attempt: AtomicBool::new(false),
        }
    }

    pub fn heal(&self) {
        self.fail_mark_synced.store(false, Ordering::SeqCst);
        self.fail_record_attempt.store(false, Ordering::SeqCst);
    }
}

impl RecordStore for FaultyStore {
    fn append(&self, payload: &str, destination: &str) -> RepoResult<RecordId> {
        self.inner.append(payload, destination)
    }

    fn list_pending(&self, limit: Option<u32>) -> RepoResult<Vec<Record>> {
        self.inner.list_pending(limit)
    }

    fn list_pending_for(&self, destination: &str, limit: Option<u32>) -> RepoResult<Vec<Record>> {
        self.inner.list_pending_for(destination, limit)
    }

    fn mark_synced(&self, id: RecordId) -> RepoResult<bool> {
        if self.fail_mark_synced.load(Ordering::SeqCst) {
            return Err(disk_fault());
        }
        self.inner.mark_synced(id)
    }

    fn get_record(&self, id: RecordId) -> RepoResult<Option<Record>> {
        self.inner.get_record(id)
    }

    fn count_pending(&self, destination: Option<&str>) -> RepoResult<u64> {
        self.inner.count_pending(destination)
    }

    fn count_all(&self) -> RepoResult<u64> {
        self.inner.count_all()
    }

    fn record_attempt(&self, attempt: &NewDeliveryAttempt) -> RepoResult<i64> {
        if self.fail_record_attempt.load(Ordering::SeqCst) {
            return Err(disk_fault());
        }
        self.inner.record_attempt(attempt)
    }

    fn list_attempts(&self, record_id: RecordId) -> RepoResult<Vec<DeliveryAttempt>> {
        self.inner.list_attempts(record_id)
    }

    fn list_flagged(&self) -> RepoResult<Vec<Record>> {
        self.inner.list_flagged()
    }

    fn claim_sync_scope(
        &self,
        scope: Option<&str>,
        holder: &str,
        stale_before: i64,
    ) -> RepoResult<bool> {
        self.inner.claim_sync_scope(scope, holder, stale_before)
    }

    fn release_sync_scope(&self, scope: Option<&str>, holder: &str) -> RepoResult<bool> {
        self.inner.release_sync_scope(scope, holder)
    }
}
