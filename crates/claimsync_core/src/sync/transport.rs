//! Delivery transport SPI.
//!
//! # Responsibility
//! - Define the boundary between the dispatcher and whatever carries a
//!   record to its remote endpoint.
//! - Classify remote responses into the three outcomes sync understands.
//!
//! # Invariants
//! - Transports never panic on remote failure; every failure is an outcome.
//! - Transports must honour `DeliveryRequest::timeout`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One delivery attempt handed to a transport.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryRequest<'a> {
    pub payload: &'a str,
    pub destination: &'a str,
    /// Stable correlation token the remote may deduplicate on.
    pub idempotency_key: &'a str,
    pub timeout: Duration,
}

/// Outcome of a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Remote explicitly accepted the record.
    Confirmed,
    /// Transient failure; retry on a later cycle.
    Deferred(String),
    /// Permanent rejection; the record needs operator attention.
    Fatal(String),
}

impl DeliveryOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

/// Carries records to remote endpoints.
pub trait DeliveryTransport: Send + Sync {
    /// Short identifier used in logs.
    fn transport_id(&self) -> &str;

    /// Attempts one delivery. Must return within `request.timeout`.
    fn deliver(&self, request: &DeliveryRequest<'_>) -> DeliveryOutcome;
}

/// Maps an HTTP status code onto a delivery outcome.
///
/// - `2xx` is confirmed.
/// - `408`, `425`, `429` and `5xx` are deferred.
/// - Everything else is fatal.
pub fn classify_http_status(status: u16) -> DeliveryOutcome {
    match status {
        200..=299 => DeliveryOutcome::Confirmed,
        408 | 425 | 429 => DeliveryOutcome::Deferred(format!("http_{status}")),
        500..=599 => DeliveryOutcome::Deferred(format!("http_{status}")),
        _ => DeliveryOutcome::Fatal(format!("http_{status}")),
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_http_status, DeliveryOutcome};

    #[test]
    fn success_statuses_confirm() {
        assert_eq!(classify_http_status(200), DeliveryOutcome::Confirmed);
        assert_eq!(classify_http_status(202), DeliveryOutcome::Confirmed);
    }

    #[test]
    fn rate_limit_and_server_errors_defer() {
        for status in [408, 425, 429, 500, 502, 503, 504] {
            assert!(
                matches!(classify_http_status(status), DeliveryOutcome::Deferred(_)),
                "status {status} should defer"
            );
        }
    }

    #[test]
    fn client_errors_are_fatal() {
        assert_eq!(
            classify_http_status(400),
            DeliveryOutcome::Fatal("http_400".to_string())
        );
        assert!(matches!(
            classify_http_status(422),
            DeliveryOutcome::Fatal(_)
        ));
        assert!(matches!(
            classify_http_status(301),
            DeliveryOutcome::Fatal(_)
        ));
    }
}
