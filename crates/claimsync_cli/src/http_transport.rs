//! HTTP delivery transport.
//!
//! POSTs each record payload as JSON to its destination URL with the record's
//! delivery key in an `Idempotency-Key` header, so payers can drop replays.

use claimsync_core::{classify_http_status, DeliveryOutcome, DeliveryRequest, DeliveryTransport};
use log::debug;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::time::Duration;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpDeliveryTransport {
    client: reqwest::blocking::Client,
}

impl HttpDeliveryTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

impl DeliveryTransport for HttpDeliveryTransport {
    fn transport_id(&self) -> &str {
        "http"
    }

    fn deliver(&self, request: &DeliveryRequest<'_>) -> DeliveryOutcome {
        let response = self
            .client
            .post(request.destination)
            .timeout(request.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, concat!("claimsync/", env!("CARGO_PKG_VERSION")))
            .header(IDEMPOTENCY_KEY_HEADER, request.idempotency_key)
            .body(request.payload.to_string())
            .send();

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!(
                    "event=http_delivery module=cli status={} delivery_key={}",
                    status, request.idempotency_key
                );
                classify_http_status(status)
            }
            Err(err) => classify_request_error(&err),
        }
    }
}

/// Requests that never reached a payer are retried; malformed ones never will.
fn classify_request_error(err: &reqwest::Error) -> DeliveryOutcome {
    if err.is_builder() {
        return DeliveryOutcome::Fatal(format!("invalid request: {err}"));
    }
    if err.is_timeout() {
        return DeliveryOutcome::Deferred("timeout".to_string());
    }
    if err.is_connect() {
        return DeliveryOutcome::Deferred(format!("connect: {err}"));
    }
    DeliveryOutcome::Deferred(format!("transport: {err}"))
}
