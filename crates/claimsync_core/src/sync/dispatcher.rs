//! Sync cycle execution.
//!
//! # Responsibility
//! - Drive one bounded pass over the pending queue through a delivery transport.
//! - Reconcile confirmed records to `synced` and audit every attempt.
//! - Report per-record failures as data for an external backoff driver.
//!
//! # Invariants
//! - Records are attempted sequentially in ascending id order.
//! - A later record is never confirmed while an earlier record for the same
//!   destination is still pending from this cycle.
//! - A record is only marked synced after the transport returned `Confirmed`.
//! - Overlapping cycles on the same destination are rejected, never interleaved,
//!   including cycles from other dispatchers or processes on the same ledger.
//! - `synced_count` only counts transitions this cycle made itself.
//! - Only storage faults escape as `Err`; delivery failures land in the report.

use crate::model::record::{AttemptOutcome, DeliveryErrorKind, NewDeliveryAttempt, RecordId};
use crate::queue::{QueueError, QueueReader};
use crate::repo::record_repo::{now_epoch_ms, RecordStore, RepoError};
use crate::sync::idempotency::delivery_key;
use crate::sync::transport::{DeliveryOutcome, DeliveryRequest, DeliveryTransport};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_BATCH: u32 = 50;
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Claims older than this are presumed abandoned by a crashed cycle.
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(15 * 60);

static NEXT_CYCLE: AtomicU64 = AtomicU64::new(1);

/// What a cycle does after a record is deferred or rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferralPolicy {
    /// Stop the whole cycle at the first failed record.
    #[default]
    HaltBatch,
    /// Skip the rest of the failed record's destination, keep delivering the
    /// others. Ordering still holds per destination.
    HaltDestination,
}

impl DeferralPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "halt_batch" | "halt-batch" => Some(Self::HaltBatch),
            "halt_destination" | "halt-destination" => Some(Self::HaltDestination),
            _ => None,
        }
    }
}

/// Dispatcher tuning resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub max_batch: u32,
    pub delivery_timeout: Duration,
    pub deferral_policy: DeferralPolicy,
    /// Never shorter than `max_batch * delivery_timeout` in practice.
    pub claim_ttl: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_batch: DEFAULT_MAX_BATCH,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            deferral_policy: DeferralPolicy::default(),
            claim_ttl: DEFAULT_CLAIM_TTL,
        }
    }
}

/// Cooperative cancellation signal shared between a driver and a cycle.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Parameters of one cycle invocation.
#[derive(Debug, Clone, Default)]
pub struct CycleRequest {
    /// Restrict the cycle to one destination. `None` drains the whole queue.
    pub destination: Option<String>,
    pub cancel: Option<CancelFlag>,
}

impl CycleRequest {
    pub fn for_destination(destination: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }
}

/// Dispatcher state, surfaced in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Delivering,
    Confirmed,
    Deferred,
    Fatal,
}

impl CyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Delivering => "delivering",
            Self::Confirmed => "confirmed",
            Self::Deferred => "deferred",
            Self::Fatal => "fatal",
        }
    }
}

/// Why a cycle stopped before exhausting its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HaltReason {
    Deferred { record_id: RecordId },
    Fatal { record_id: RecordId },
    Cancelled,
}

/// Failure detail for one record, enough for external backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub record_id: RecordId,
    pub destination: String,
    pub delivery_key: String,
    pub kind: DeliveryErrorKind,
    pub reason: String,
    /// Unix epoch milliseconds when the attempt started.
    pub attempted_at: i64,
    pub elapsed_ms: u64,
}

/// Structured result of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub synced_count: u64,
    pub attempted_count: u64,
    /// Pending records left in scope after the cycle.
    pub remaining_count: u64,
    pub halted: Option<HaltReason>,
    /// Destinations skipped under `DeferralPolicy::HaltDestination`.
    pub blocked_destinations: Vec<String>,
    pub errors: Vec<RecordFailure>,
}

impl CycleReport {
    pub fn has_permanent_failures(&self) -> bool {
        self.errors
            .iter()
            .any(|failure| failure.kind == DeliveryErrorKind::PermanentDeliveryError)
    }
}

/// Errors that abort a cycle.
#[derive(Debug)]
pub enum SyncError {
    /// The durability guarantee is broken; the cycle halted immediately.
    Storage(RepoError),
    /// Dispatcher configuration is unusable.
    InvalidOptions(String),
    /// Another cycle already owns (part of) this scope, or synced a record
    /// underneath this one.
    ConcurrencyConflict { destination: Option<String> },
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(err) => write!(f, "sync cycle halted: {err}"),
            Self::InvalidOptions(message) => write!(f, "invalid sync options: {message}"),
            Self::ConcurrencyConflict {
                destination: Some(destination),
            } => write!(f, "a sync cycle is already running for `{destination}`"),
            Self::ConcurrencyConflict { destination: None } => {
                write!(f, "a sync cycle is already running")
            }
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        Self::Storage(value)
    }
}

impl From<QueueError> for SyncError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::Store(err) => Self::Storage(err),
            other => Self::InvalidOptions(other.to_string()),
        }
    }
}

/// Releases the ledger claim when the cycle ends, even on early return.
struct FlightClaim<'a, S: RecordStore + ?Sized> {
    store: &'a S,
    scope: Option<String>,
    holder: String,
}

impl<S: RecordStore + ?Sized> Drop for FlightClaim<'_, S> {
    fn drop(&mut self) {
        match self.store.release_sync_scope(self.scope.as_deref(), &self.holder) {
            Ok(true) => {}
            Ok(false) => warn!("event=sync_claim module=sync status=lost holder={}", self.holder),
            Err(err) => error!(
                "event=sync_claim module=sync status=error error_code=release_failed holder={} error={}",
                self.holder, err
            ),
        }
    }
}

fn next_holder_id() -> String {
    format!(
        "{}-{}-{}",
        std::process::id(),
        now_epoch_ms(),
        NEXT_CYCLE.fetch_add(1, Ordering::Relaxed)
    )
}

/// Runs sync cycles for one store through one transport.
pub struct SyncDispatcher<S: RecordStore + ?Sized, T: DeliveryTransport + ?Sized> {
    store: Arc<S>,
    transport: Arc<T>,
    options: SyncOptions,
}

impl<S: RecordStore + ?Sized, T: DeliveryTransport + ?Sized> SyncDispatcher<S, T> {
    pub fn new(store: Arc<S>, transport: Arc<T>, options: SyncOptions) -> Self {
        Self {
            store,
            transport,
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Runs one cycle to completion and returns its report.
    ///
    /// # Errors
    /// - `ConcurrencyConflict` when an overlapping cycle holds the ledger claim,
    ///   or a confirmed record turns out to be synced already.
    /// - `Storage` when the store fails; no further records are attempted.
    /// - `InvalidOptions` when `max_batch` is zero.
    pub fn run_cycle(&self, request: &CycleRequest) -> Result<CycleReport, SyncError> {
        let destination = request
            .destination
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let _claim = self.claim(destination)?;
        let started_at = Instant::now();
        let scope = destination.unwrap_or("*");

        debug!(
            "event=sync_cycle module=sync phase={} scope={scope}",
            CyclePhase::Fetching.as_str()
        );
        let reader = QueueReader::new(self.store.as_ref(), self.options.max_batch)?;
        let batch = match destination {
            Some(destination) => reader.next_batch_for(destination)?,
            None => reader.next_batch()?,
        };
        info!(
            "event=sync_cycle module=sync status=start scope={} transport={} batch_size={}",
            scope,
            self.transport.transport_id(),
            batch.len()
        );

        let mut report = CycleReport::default();
        let mut blocked: BTreeSet<String> = BTreeSet::new();

        for record in batch {
            if request.is_cancelled() {
                report.halted = Some(HaltReason::Cancelled);
                info!(
                    "event=sync_cycle module=sync status=cancelled next_record_id={}",
                    record.id
                );
                break;
            }
            if blocked.contains(&record.destination) {
                continue;
            }

            let key = delivery_key(&record);
            let attempted_at = now_epoch_ms();
            let attempt_started = Instant::now();
            let outcome = self.transport.deliver(&DeliveryRequest {
                payload: &record.payload,
                destination: &record.destination,
                idempotency_key: &key,
                timeout: self.options.delivery_timeout,
            });
            let elapsed = attempt_started.elapsed();
            let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            let outcome = self.bound_by_timeout(outcome, elapsed);
            report.attempted_count += 1;

            let (phase, failure, transitioned) = match outcome {
                DeliveryOutcome::Confirmed => (
                    CyclePhase::Confirmed,
                    None,
                    self.store.mark_synced(record.id)?,
                ),
                DeliveryOutcome::Deferred(reason) => (
                    CyclePhase::Deferred,
                    Some((DeliveryErrorKind::TransientDeliveryError, reason)),
                    false,
                ),
                DeliveryOutcome::Fatal(reason) => (
                    CyclePhase::Fatal,
                    Some((DeliveryErrorKind::PermanentDeliveryError, reason)),
                    false,
                ),
            };

            self.store.record_attempt(&NewDeliveryAttempt {
                record_id: record.id,
                delivery_key: key.clone(),
                outcome: match phase {
                    CyclePhase::Confirmed => AttemptOutcome::Confirmed,
                    CyclePhase::Fatal => AttemptOutcome::Fatal,
                    _ => AttemptOutcome::Deferred,
                },
                error_kind: failure.as_ref().map(|(kind, _)| *kind),
                detail: failure.as_ref().map(|(_, reason)| reason.clone()),
                elapsed_ms,
                attempted_at,
            })?;

            let Some((kind, reason)) = failure else {
                if !transitioned {
                    warn!(
                        "event=record_delivery module=sync status=rejected record_id={} delivery_key={} error_code=concurrency_conflict",
                        record.id, key
                    );
                    return Err(SyncError::ConcurrencyConflict {
                        destination: Some(record.destination),
                    });
                }
                report.synced_count += 1;
                info!(
                    "event=record_delivery module=sync status={} record_id={} delivery_key={} elapsed_ms={}",
                    phase.as_str(),
                    record.id,
                    key,
                    elapsed_ms
                );
                continue;
            };

            if kind == DeliveryErrorKind::PermanentDeliveryError {
                error!(
                    "event=record_delivery module=sync status={} record_id={} delivery_key={} elapsed_ms={} error_code=permanent_delivery reason={}",
                    phase.as_str(),
                    record.id,
                    key,
                    elapsed_ms,
                    reason
                );
            } else {
                warn!(
                    "event=record_delivery module=sync status={} record_id={} delivery_key={} elapsed_ms={} error_code=transient_delivery reason={}",
                    phase.as_str(),
                    record.id,
                    key,
                    elapsed_ms,
                    reason
                );
            }

            report.errors.push(RecordFailure {
                record_id: record.id,
                destination: record.destination.clone(),
                delivery_key: key,
                kind,
                reason,
                attempted_at,
                elapsed_ms,
            });

            match self.options.deferral_policy {
                DeferralPolicy::HaltBatch => {
                    report.halted = Some(match kind {
                        DeliveryErrorKind::TransientDeliveryError => HaltReason::Deferred {
                            record_id: record.id,
                        },
                        DeliveryErrorKind::PermanentDeliveryError => HaltReason::Fatal {
                            record_id: record.id,
                        },
                    });
                    break;
                }
                DeferralPolicy::HaltDestination => {
                    blocked.insert(record.destination);
                }
            }
        }

        report.blocked_destinations = blocked.into_iter().collect();
        report.remaining_count = self.store.count_pending(destination)?;

        info!(
            "event=sync_cycle module=sync status=ok scope={} synced_count={} attempted_count={} remaining_count={} error_count={} halted={} duration_ms={}",
            scope,
            report.synced_count,
            report.attempted_count,
            report.remaining_count,
            report.errors.len(),
            report.halted.is_some(),
            started_at.elapsed().as_millis()
        );
        debug!(
            "event=sync_cycle module=sync phase={}",
            CyclePhase::Idle.as_str()
        );
        Ok(report)
    }

    fn bound_by_timeout(&self, outcome: DeliveryOutcome, elapsed: Duration) -> DeliveryOutcome {
        if outcome.is_confirmed() || elapsed <= self.options.delivery_timeout {
            return outcome;
        }
        DeliveryOutcome::Deferred(format!("timeout after {}ms", elapsed.as_millis()))
    }

    fn claim(&self, destination: Option<&str>) -> Result<FlightClaim<'_, S>, SyncError> {
        let holder = next_holder_id();
        let ttl_ms = i64::try_from(self.claim_ttl().as_millis()).unwrap_or(i64::MAX);
        let stale_before = now_epoch_ms().saturating_sub(ttl_ms);

        if !self.store.claim_sync_scope(destination, &holder, stale_before)? {
            warn!(
                "event=sync_cycle module=sync status=rejected error_code=concurrency_conflict scope={}",
                destination.unwrap_or("*")
            );
            return Err(SyncError::ConcurrencyConflict {
                destination: destination.map(str::to_string),
            });
        }

        Ok(FlightClaim {
            store: self.store.as_ref(),
            scope: destination.map(str::to_string),
            holder,
        })
    }

    fn claim_ttl(&self) -> Duration {
        let worst_cycle = self
            .options
            .delivery_timeout
            .checked_mul(self.options.max_batch)
            .unwrap_or(Duration::MAX);
        self.options.claim_ttl.max(worst_cycle)
    }
}
