use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info};

use volja_storage::{InboxOutcome, InboxStatus, NewInboxEvent};

use crate::events::no_content;
use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::signature::verify_delivery;
use crate::workflow::{ProductCreatedInput, WorkflowError, WorkflowResult};

/// Inbox name for hook deliveries; they share the event inbox keyed by message id.
pub const PRODUCT_CREATED_HOOK: &str = "hook.product-created";

#[derive(Debug, Deserialize)]
struct ProductCreatedHook {
    products: Vec<ProductRef>,
    #[serde(default)]
    additional_data: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ProductRef {
    id: String,
}

#[derive(Debug, Serialize)]
pub struct ProductCreatedResponse {
    results: Vec<ProductCreatedResult>,
}

#[derive(Debug, Serialize)]
struct ProductCreatedResult {
    product_id: String,
    #[serde(flatten)]
    workflow: WorkflowResult,
}

/// `POST /hooks/product-created`: runs the custom record workflow for every
/// created product, one at a time.
///
/// A delivery already processed answers 204 without running the workflow.
pub async fn product_created(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    let delivery = verify_delivery(&state.event_secret(), &headers, &body, state.now())?;
    let message_id = delivery.message_id.as_str();

    let payload_json = std::str::from_utf8(&body).map_err(|_| {
        ProblemResponse::bad_request("invalid_payload", "request body must be valid UTF-8")
    })?;
    let hook: ProductCreatedHook = serde_json::from_str(payload_json).map_err(|err| {
        ProblemResponse::bad_request("invalid_json", format!("failed to parse payload: {err}"))
    })?;
    let coming_soon = read_coming_soon(hook.additional_data.as_ref())?;

    let inbox = state.storage().event_inbox();
    let outcome = inbox
        .record(NewInboxEvent {
            msg_id: message_id,
            name: PRODUCT_CREATED_HOOK,
            payload_json,
            event_at: delivery.timestamp,
            received_at: state.now(),
        })
        .await
        .map_err(|err| {
            error!(stage = "hook", %message_id, error = %err, "failed to persist hook delivery");
            ProblemResponse::internal("storage_error", "failed to persist hook delivery")
        })?;

    if let InboxOutcome::Redelivered { status, attempts } = outcome {
        if matches!(status, InboxStatus::Processed | InboxStatus::Ignored) {
            info!(stage = "hook", %message_id, attempts, "duplicate hook delivery skipped");
            return Ok(no_content());
        }
        info!(stage = "hook", %message_id, attempts, previous = status.as_str(), "retrying hook delivery");
    }

    let result = run_workflows(&state, message_id, hook.products, coming_soon).await;

    let (status, error_text) = match &result {
        Ok(_) => (InboxStatus::Processed, None),
        Err(err) => (InboxStatus::Failed, Some(err.to_string())),
    };
    inbox
        .mark(message_id, status, error_text.as_deref(), state.now())
        .await
        .map_err(|err| {
            error!(stage = "hook", %message_id, error = %err, "failed to update hook status");
            ProblemResponse::internal("storage_error", "failed to update hook status")
        })?;

    let results =
        result.map_err(|err| ProblemResponse::internal("workflow_failed", err.to_string()))?;
    info!(
        stage = "hook",
        %message_id,
        products = results.len(),
        coming_soon,
        "product-created hook handled"
    );
    Ok(Json(ProductCreatedResponse { results }).into_response())
}

async fn run_workflows(
    state: &AppState,
    message_id: &str,
    products: Vec<ProductRef>,
    coming_soon: bool,
) -> Result<Vec<ProductCreatedResult>, WorkflowError> {
    let mut results = Vec::with_capacity(products.len());
    for product in products {
        let input = ProductCreatedInput {
            product_id: product.id,
            coming_soon,
        };
        let outcome = state.workflow().run(&input).await.map_err(|err| {
            error!(
                stage = "hook",
                %message_id,
                product_id = %input.product_id,
                error = %err,
                "product workflow failed"
            );
            err
        })?;
        results.push(ProductCreatedResult {
            product_id: input.product_id,
            workflow: outcome,
        });
    }
    Ok(results)
}

/// `additional_data.coming_soon` must be a boolean when present; absent means false.
fn read_coming_soon(additional_data: Option<&Map<String, Value>>) -> Result<bool, ProblemResponse> {
    match additional_data.and_then(|data| data.get("coming_soon")) {
        None => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(other) => Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_additional_data",
            format!("additional_data.coming_soon must be a boolean, got {other}"),
        )),
    }
}
