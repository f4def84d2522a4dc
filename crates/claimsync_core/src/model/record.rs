//! Queue record domain model.
//!
//! # Responsibility
//! - Define the unit of work persisted by the store and delivered by sync.
//! - Define the audit shape of a single delivery attempt.
//!
//! # Invariants
//! - `id` is assigned by the store, strictly increasing and never reused.
//! - `payload`, `destination` and `created_at` never change after append.
//! - `status` only moves `Pending -> Synced`.

use serde::{Deserialize, Serialize};

/// Locally assigned, monotonically increasing record identifier.
///
/// Kept as a type alias to make semantic intent explicit in signatures.
pub type RecordId = i64;

/// Delivery state of a queued record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Persisted locally, not yet confirmed by the remote.
    Pending,
    /// Confirmed accepted by the remote. Terminal.
    Synced,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "synced" => Some(Self::Synced),
            _ => None,
        }
    }
}

/// A unit of work queued for delivery to a remote system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    /// Opaque serialized document. The queue never inspects it.
    pub payload: String,
    /// Remote endpoint this record must be delivered to.
    pub destination: String,
    pub status: RecordStatus,
    /// Unix epoch milliseconds of local persistence.
    pub created_at: i64,
}

impl Record {
    pub fn is_pending(&self) -> bool {
        self.status == RecordStatus::Pending
    }
}

/// Three-way classification of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Confirmed,
    Deferred,
    Fatal,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Deferred => "deferred",
            Self::Fatal => "fatal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "confirmed" => Some(Self::Confirmed),
            "deferred" => Some(Self::Deferred),
            "fatal" => Some(Self::Fatal),
            _ => None,
        }
    }
}

/// Error class attached to a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryErrorKind {
    /// Network, timeout or server-busy. The record is retried next cycle.
    TransientDeliveryError,
    /// Remote rejected the payload. The record stays pending and is flagged.
    PermanentDeliveryError,
}

impl DeliveryErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientDeliveryError => "transient_delivery",
            Self::PermanentDeliveryError => "permanent_delivery",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "transient_delivery" => Some(Self::TransientDeliveryError),
            "permanent_delivery" => Some(Self::PermanentDeliveryError),
            _ => None,
        }
    }
}

/// Write model for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeliveryAttempt {
    pub record_id: RecordId,
    pub delivery_key: String,
    pub outcome: AttemptOutcome,
    /// `None` for confirmed attempts.
    pub error_kind: Option<DeliveryErrorKind>,
    pub detail: Option<String>,
    pub elapsed_ms: u64,
    /// Unix epoch milliseconds.
    pub attempted_at: i64,
}

/// Read model for one persisted delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: i64,
    pub record_id: RecordId,
    pub delivery_key: String,
    pub outcome: AttemptOutcome,
    pub error_kind: Option<DeliveryErrorKind>,
    pub detail: Option<String>,
    pub elapsed_ms: u64,
    pub attempted_at: i64,
}
