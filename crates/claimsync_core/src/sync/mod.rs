//! Offline-first sync protocol.
//!
//! # Responsibility
//! - Derive stable delivery keys (`idempotency`).
//! - Define the transport SPI and outcome classification (`transport`).
//! - Run bounded, ordered sync cycles against the record store (`dispatcher`).

pub mod dispatcher;
pub mod idempotency;
pub mod transport;
