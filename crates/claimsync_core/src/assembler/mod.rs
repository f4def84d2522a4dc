//! Clinical bundle and claim envelope assembly.
//!
//! # Responsibility
//! - Turn `SYSTEM:CODE` diagnosis tokens into codings.
//! - Build the collection bundle (Condition + Claim) the clinical side persists.
//! - Extract the claim envelope the insurance side queues for the payer.
//!
//! # Invariants
//! - Bundle entry 0 is the Condition, entry 1 is the Claim.
//! - Assembly is pure; persistence happens in the intake service.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_PATIENT_ID: &str = "DEMO_ID";
const CONDITION_CLINICAL_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/condition-clinical";

static CODE_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9_.\-/]+)\s*:\s*(\S(?:.*\S)?)\s*$").expect("valid code token regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembleError {
    /// Token is not `SYSTEM:CODE`.
    InvalidCode(String),
    /// Bundle request carries no diagnosis codes.
    NoCodes,
    /// Patient id is blank.
    MissingPatient,
    /// Bundle has no Claim resource at entry 1.
    MissingClaim,
}

impl Display for AssembleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCode(value) => {
                write!(f, "invalid diagnosis code `{value}`; expected SYSTEM:CODE")
            }
            Self::NoCodes => write!(f, "at least one diagnosis code is required"),
            Self::MissingPatient => write!(f, "patient id cannot be empty"),
            Self::MissingClaim => write!(f, "no Claim found in bundle"),
        }
    }
}

impl Error for AssembleError {}

/// One coded concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    pub system: String,
    pub code: String,
}

/// Parses a `SYSTEM:CODE` token, e.g. `NAMASTE:Prameha` or `ICD11:TM2-05.02`.
pub fn parse_coding(token: &str) -> Result<Coding, AssembleError> {
    let captures = CODE_TOKEN_RE
        .captures(token)
        .ok_or_else(|| AssembleError::InvalidCode(token.to_string()))?;
    Ok(Coding {
        system: captures[1].to_string(),
        code: captures[2].to_string(),
    })
}

fn default_patient_id() -> String {
    DEFAULT_PATIENT_ID.to_string()
}

/// Inbound request for a clinical bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRequest {
    #[serde(default = "default_patient_id")]
    pub patient_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    pub codes: Vec<String>,
}

impl BundleRequest {
    pub fn new(codes: Vec<String>) -> Self {
        Self {
            patient_id: default_patient_id(),
            name: None,
            diagnosis: None,
            codes,
        }
    }
}

/// Builds a `collection` bundle holding a Condition and a Claim.
pub fn assemble_bundle(request: &BundleRequest, created: NaiveDate) -> Result<Value, AssembleError> {
    let patient_id = request.patient_id.trim();
    if patient_id.is_empty() {
        return Err(AssembleError::MissingPatient);
    }
    if request.codes.is_empty() {
        return Err(AssembleError::NoCodes);
    }

    let codings = request
        .codes
        .iter()
        .map(|token| parse_coding(token))
        .collect::<Result<Vec<_>, _>>()?;

    let mut subject = Map::new();
    subject.insert(
        "reference".to_string(),
        Value::String(format!("Patient/{patient_id}")),
    );
    if let Some(name) = request.name.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        subject.insert("display".to_string(), Value::String(name.to_string()));
    }

    let mut code = Map::new();
    code.insert("coding".to_string(), json!(codings));
    if let Some(text) = request
        .diagnosis
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        code.insert("text".to_string(), Value::String(text.to_string()));
    }

    let condition = json!({
        "resourceType": "Condition",
        "clinicalStatus": {
            "coding": [{ "system": CONDITION_CLINICAL_SYSTEM, "code": "active" }]
        },
        "code": code,
        "subject": subject,
    });

    let claim = json!({
        "resourceType": "Claim",
        "created": created.format("%Y-%m-%d").to_string(),
        "status": "active",
        "use": "claim",
        "type": { "text": "consultation" },
        "patient": { "reference": format!("Patient/{patient_id}") },
    });

    Ok(json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [{ "resource": condition }, { "resource": claim }],
    }))
}

/// Extracts `{ bundle, claim_data, codes }` for queuing to a payer.
pub fn claim_envelope(bundle: &Value) -> Result<Value, AssembleError> {
    let entries = bundle
        .get("entry")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let claim = entries
        .get(1)
        .and_then(|entry| entry.get("resource"))
        .filter(|resource| resource.as_object().is_some_and(|map| !map.is_empty()))
        .ok_or(AssembleError::MissingClaim)?;

    Ok(json!({
        "bundle": bundle,
        "claim_data": claim,
        "codes": condition_codes(entries.first()),
    }))
}

fn condition_codes(entry: Option<&Value>) -> Vec<Value> {
    entry
        .and_then(|entry| entry.pointer("/resource/code/coding"))
        .and_then(Value::as_array)
        .map(|codings| {
            codings
                .iter()
                .map(|coding| {
                    json!({
                        "system": coding.get("system").cloned().unwrap_or(Value::Null),
                        "code": coding.get("code").cloned().unwrap_or(Value::Null),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
