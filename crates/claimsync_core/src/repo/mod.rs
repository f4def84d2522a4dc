//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the durable record store contract used by queue and sync.
//! - Isolate SQLite query details from dispatcher/service orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `Validation`) in
//!   addition to storage faults.

pub mod record_repo;
