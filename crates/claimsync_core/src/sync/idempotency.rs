//! Stable delivery keys for queued records.
//!
//! # Responsibility
//! - Derive a correlation token the remote can deduplicate on, so a record
//!   that was accepted remotely but not yet marked synced locally is not
//!   accepted twice on retry.
//!
//! # Invariants
//! - The key depends only on `destination` and `payload`, never on `id` or
//!   `created_at`.
//! - The derivation is stable across processes and releases; changing it
//!   requires a new `KEY_VERSION` prefix.

use crate::model::record::Record;
use sha2::{Digest, Sha256};

const KEY_VERSION: &str = "ck1";

/// Returns the delivery key for a persisted record.
pub fn delivery_key(record: &Record) -> String {
    delivery_key_for(&record.payload, &record.destination)
}

/// Returns the delivery key for a `(payload, destination)` pair.
///
/// The destination is length-prefixed so `("ab", "c")` and `("a", "bc")`
/// never hash the same input.
pub fn delivery_key_for(payload: &str, destination: &str) -> String {
    let destination = destination.trim();
    let mut hasher = Sha256::new();
    hasher.update((destination.len() as u64).to_be_bytes());
    hasher.update(destination.as_bytes());
    hasher.update(payload.as_bytes());
    format!("{KEY_VERSION}-{}", hex::encode(hasher.finalize()))
}
