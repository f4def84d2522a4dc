//! Offline-first claim queue core.
//!
//! Records are written to a local SQLite ledger first, then reconciled
//! against remote endpoints by on-demand sync cycles.

pub mod assembler;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod queue;
pub mod repo;
pub mod service;
pub mod sync;

pub use assembler::{
    assemble_bundle, claim_envelope, parse_coding, AssembleError, BundleRequest, Coding,
};
pub use config::{ConfigError, SyncConfig};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::record::{
    AttemptOutcome, DeliveryAttempt, DeliveryErrorKind, NewDeliveryAttempt, Record, RecordId,
    RecordStatus,
};
pub use queue::{QueueError, QueueReader};
pub use repo::record_repo::{RecordStore, RepoError, RepoResult, SqliteRecordStore};
pub use service::intake_service::{
    IntakeError, IntakeService, Submission, DEFAULT_PAYER_ENDPOINT,
};
pub use sync::dispatcher::{
    CancelFlag, CycleReport, CycleRequest, DeferralPolicy, HaltReason, RecordFailure,
    SyncDispatcher, SyncError, SyncOptions,
};
pub use sync::idempotency::{delivery_key, delivery_key_for};
pub use sync::transport::{
    classify_http_status, DeliveryOutcome, DeliveryRequest, DeliveryTransport,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
