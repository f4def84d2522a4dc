//! Inbound record intake.
//!
//! # Responsibility
//! - Accept clinical bundle requests and claim submissions.
//! - Persist them to the record store before anything tries to deliver them.
//!
//! # Invariants
//! - Intake never calls a transport; delivery only happens in sync cycles.
//! - Payloads are serialized once here and stored opaque.

use crate::assembler::{assemble_bundle, claim_envelope, AssembleError, BundleRequest};
use crate::model::record::RecordId;
use crate::repo::record_repo::{RecordStore, RepoError};
use crate::sync::idempotency::delivery_key_for;
use chrono::NaiveDate;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Payer endpoint used when a submission names none.
pub const DEFAULT_PAYER_ENDPOINT: &str = "https://api.hcx.gov.in/submit";

#[derive(Debug)]
pub enum IntakeError {
    Assemble(AssembleError),
    Serialize(serde_json::Error),
    Store(RepoError),
}

impl Display for IntakeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assemble(err) => write!(f, "{err}"),
            Self::Serialize(err) => write!(f, "failed to serialize payload: {err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IntakeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Assemble(err) => Some(err),
            Self::Serialize(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<AssembleError> for IntakeError {
    fn from(value: AssembleError) -> Self {
        Self::Assemble(value)
    }
}

impl From<serde_json::Error> for IntakeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialize(value)
    }
}

impl From<RepoError> for IntakeError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

/// Result of a persisted submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub record_id: RecordId,
    pub destination: String,
    pub delivery_key: String,
    /// The document that was serialized into the record payload.
    pub document: Value,
}

/// Write-ahead intake over a shared record store.
pub struct IntakeService<S: RecordStore + ?Sized> {
    store: Arc<S>,
    default_destination: String,
}

impl<S: RecordStore + ?Sized> IntakeService<S> {
    pub fn new(store: Arc<S>, default_destination: impl Into<String>) -> Self {
        Self {
            store,
            default_destination: default_destination.into(),
        }
    }

    pub fn default_destination(&self) -> &str {
        &self.default_destination
    }

    /// Assembles a clinical bundle and queues it.
    pub fn submit_bundle(
        &self,
        request: &BundleRequest,
        created: NaiveDate,
        destination: Option<&str>,
    ) -> Result<Submission, IntakeError> {
        let bundle = assemble_bundle(request, created)?;
        self.persist(bundle, destination)
    }

    /// Wraps a bundle in a claim envelope and queues it for the payer.
    pub fn submit_claim(
        &self,
        bundle: &Value,
        api_url: Option<&str>,
    ) -> Result<Submission, IntakeError> {
        let envelope = claim_envelope(bundle)?;
        self.persist(envelope, api_url)
    }

    /// Queues an already-serialized payload unchanged.
    pub fn submit_raw(&self, payload: &str, destination: &str) -> Result<RecordId, IntakeError> {
        Ok(self.store.append(payload, destination)?)
    }

    fn persist(&self, document: Value, destination: Option<&str>) -> Result<Submission, IntakeError> {
        let destination = destination
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.default_destination.as_str())
            .to_string();
        let payload = serde_json::to_string(&document)?;
        let record_id = self.store.append(&payload, &destination)?;

        Ok(Submission {
            record_id,
            delivery_key: delivery_key_for(&payload, &destination),
            destination,
            document,
        })
    }
}
