//! Queue domain model.
//!
//! # Responsibility
//! - Define canonical data structures shared by store, queue and sync.
//!
//! # Invariants
//! - Every record is identified by a store-assigned `RecordId`.
//! - Records are never deleted; history is retained for audit.

pub mod record;
