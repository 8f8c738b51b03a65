//! Handlers for commerce events delivered to `POST /events`.

pub mod order_placed;
pub mod shipment_created;

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

use volja_commerce::{CommerceError, SendGridError};
use volja_core::invoice::InvoiceError;
use volja_storage::{NotificationLogError, NotificationStatus};

use crate::router::AppState;

pub const ORDER_PLACED: &str = "order.placed";
pub const SHIPMENT_CREATED: &str = "shipment.created";

#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("failed to fetch {entity}: {source}")]
    Fetch {
        entity: &'static str,
        #[source]
        source: CommerceError,
    },
    #[error("failed to build invoice: {0}")]
    Invoice(#[from] InvoiceError),
    #[error("required field {0} is missing")]
    MissingField(&'static str),
    #[error("fulfillment {0} has no shipping label")]
    MissingTrackingLabel(String),
    #[error("failed to send notification: {0}")]
    Notification(#[from] SendGridError),
    #[error("failed to read notification history: {0}")]
    History(#[from] NotificationLogError),
}

/// Recipients already sent `template` for this event by an earlier attempt.
pub(crate) async fn already_notified(
    state: &AppState,
    msg_id: &str,
    template: &str,
) -> Result<HashSet<String>, SubscriberError> {
    let entries = state.storage().notifications().list_for_event(msg_id).await?;
    Ok(entries
        .into_iter()
        .filter(|entry| {
            entry.template == template && entry.status == NotificationStatus::Sent.as_str()
        })
        .map(|entry| entry.recipient)
        .collect())
}

/// Wall-clock time in the store's timezone, used for human-facing dates.
pub(crate) fn store_local(state: &AppState, instant: DateTime<Utc>) -> NaiveDateTime {
    instant.with_timezone(&state.timezone()).naive_local()
}
