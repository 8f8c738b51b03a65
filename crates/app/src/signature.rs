use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use metrics::counter;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::problem::ProblemResponse;

pub const HEADER_EVENT_ID: &str = "X-Event-Id";
pub const HEADER_TIMESTAMP: &str = "X-Event-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Event-Signature";

const MAX_SKEW_SECONDS: i64 = 600;

/// Headers of a request that passed signature verification.
#[derive(Debug, Clone)]
pub struct VerifiedDelivery {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Checks the delivery id, the ±10 minute timestamp window and the
/// `sha256=` HMAC over id, timestamp and raw body.
pub fn verify_delivery(
    secret: &[u8],
    headers: &HeaderMap,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<VerifiedDelivery, ProblemResponse> {
    let message_id = get_required_header(headers, HEADER_EVENT_ID)?;
    let timestamp_raw = get_required_header(headers, HEADER_TIMESTAMP)?;
    let signature = get_required_header(headers, HEADER_SIGNATURE)?;

    let timestamp = parse_timestamp(timestamp_raw)
        .map_err(|err| ProblemResponse::new(StatusCode::BAD_REQUEST, "invalid_timestamp", err))?;

    let skew = now.signed_duration_since(timestamp).num_seconds().abs();
    if skew > MAX_SKEW_SECONDS {
        warn!(
            stage = "ingress",
            %message_id,
            %timestamp_raw,
            now = %now.to_rfc3339(),
            skew_seconds = skew,
            "timestamp outside ±10 minute window"
        );
        return Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "timestamp_out_of_range",
            "timestamp outside the allowed ±10 minute window",
        ));
    }

    verify_signature(secret, message_id, timestamp_raw, body, signature).map_err(|err| {
        counter!("events_invalid_signature_total").increment(1);
        warn!(stage = "ingress", %message_id, reason = %err, "rejected delivery signature");
        ProblemResponse::new(StatusCode::FORBIDDEN, "invalid_signature", err)
    })?;

    Ok(VerifiedDelivery {
        message_id: message_id.to_string(),
        timestamp,
    })
}

fn get_required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ProblemResponse> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "missing_header",
                format!("missing header {name}"),
            )
        })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| format!("invalid RFC3339 timestamp: {err}"))
}

fn verify_signature(
    secret: &[u8],
    message_id: &str,
    timestamp: &str,
    body: &[u8],
    provided: &str,
) -> Result<(), String> {
    let hex_part = provided
        .strip_prefix("sha256=")
        .ok_or_else(|| "signature must start with 'sha256='".to_string())?;
    let provided_bytes =
        hex::decode(hex_part).map_err(|_| "signature is not valid hex".to_string())?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|_| "failed to initialize signature verifier".to_string())?;
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let expected_bytes: &[u8] = expected.as_ref();

    if expected_bytes.ct_eq(provided_bytes.as_slice()).into() {
        Ok(())
    } else {
        Err("signature mismatch".to_string())
    }
}
