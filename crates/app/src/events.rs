use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use metrics::{counter, histogram};
use serde::Deserialize;
use tracing::{error, info, warn};

use volja_storage::{InboxOutcome, InboxStatus, NewInboxEvent};

use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::signature::verify_delivery;
use crate::subscribers::{self, SubscriberError, ORDER_PLACED, SHIPMENT_CREATED};

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    name: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    id: String,
}

/// `POST /events`: verifies, records and dispatches one commerce event.
///
/// Processed deliveries are acknowledged without running handlers again.
/// Handler failures answer 500 so the sender retries.
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    let start = Instant::now();
    let delivery = verify_delivery(&state.event_secret(), &headers, &body, state.now())?;
    let message_id = delivery.message_id.as_str();

    let payload_json = std::str::from_utf8(&body).map_err(|_| {
        ProblemResponse::bad_request("invalid_payload", "request body must be valid UTF-8")
    })?;
    let envelope: EventEnvelope = serde_json::from_str(payload_json).map_err(|err| {
        ProblemResponse::bad_request("invalid_json", format!("failed to parse payload: {err}"))
    })?;

    let event_label = metric_label(&envelope.name);
    counter!("events_ingress_total", "event" => event_label).increment(1);

    let inbox = state.storage().event_inbox();
    let outcome = inbox
        .record(NewInboxEvent {
            msg_id: message_id,
            name: &envelope.name,
            payload_json,
            event_at: delivery.timestamp,
            received_at: state.now(),
        })
        .await
        .map_err(|err| {
            error!(stage = "ingress", %message_id, error = %err, "failed to persist event");
            ProblemResponse::internal("storage_error", "failed to persist event")
        })?;

    if let InboxOutcome::Redelivered { status, attempts } = outcome {
        if matches!(status, InboxStatus::Processed | InboxStatus::Ignored) {
            info!(stage = "ingress", %message_id, attempts, "duplicate event skipped");
            return Ok(no_content());
        }
        info!(stage = "ingress", %message_id, attempts, previous = status.as_str(), "retrying event");
    }

    let result = dispatch(&state, message_id, &envelope).await;
    histogram!("event_handler_seconds", "event" => event_label)
        .record(start.elapsed().as_secs_f64());

    let (status, error_text) = match &result {
        Ok(handled) if *handled => (InboxStatus::Processed, None),
        Ok(_) => (InboxStatus::Ignored, None),
        Err(err) => (InboxStatus::Failed, Some(err.to_string())),
    };
    inbox
        .mark(message_id, status, error_text.as_deref(), state.now())
        .await
        .map_err(|err| {
            error!(stage = "ingress", %message_id, error = %err, "failed to update event status");
            ProblemResponse::internal("storage_error", "failed to update event status")
        })?;

    match result {
        Ok(_) => Ok(no_content()),
        Err(err) => {
            error!(
                stage = "subscriber",
                %message_id,
                event = %envelope.name,
                error = %err,
                "event handler failed"
            );
            Err(ProblemResponse::internal("handler_failed", err.to_string()))
        }
    }
}

/// Runs the subscriber registered for the event. `Ok(false)` means no
/// subscriber listens to it.
async fn dispatch(
    state: &AppState,
    message_id: &str,
    envelope: &EventEnvelope,
) -> Result<bool, SubscriberError> {
    match envelope.name.as_str() {
        ORDER_PLACED => {
            subscribers::order_placed::handle(state, message_id, &envelope.data.id).await?;
            Ok(true)
        }
        SHIPMENT_CREATED => {
            subscribers::shipment_created::handle(state, message_id, &envelope.data.id).await?;
            Ok(true)
        }
        other => {
            warn!(stage = "ingress", %message_id, event = other, "no subscriber for event");
            Ok(false)
        }
    }
}

fn metric_label(name: &str) -> &'static str {
    match name {
        ORDER_PLACED => ORDER_PLACED,
        SHIPMENT_CREATED => SHIPMENT_CREATED,
        _ => "other",
    }
}

pub(crate) fn no_content() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}
