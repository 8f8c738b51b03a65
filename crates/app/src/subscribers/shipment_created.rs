use tracing::info;

use volja_core::notification::{shipment_data, NotificationDispatch, CHANNEL_EMAIL};

use super::{store_local, SubscriberError};
use crate::router::AppState;

/// Emails the tracking number of the first shipping label to the customer.
pub async fn handle(
    state: &AppState,
    msg_id: &str,
    fulfillment_id: &str,
) -> Result<String, SubscriberError> {
    let shipment = state
        .commerce()
        .get_fulfillment(fulfillment_id)
        .await
        .map_err(|source| SubscriberError::Fetch {
            entity: "fulfillment",
            source,
        })?;

    let tracking_number = shipment
        .tracking_number()
        .ok_or_else(|| SubscriberError::MissingTrackingLabel(shipment.id.clone()))?;
    let to = shipment
        .recipient_email()
        .ok_or(SubscriberError::MissingField("order.customer.email"))?
        .to_string();

    let data = shipment_data(
        &shipment,
        tracking_number,
        store_local(state, shipment.created_at),
    );
    let dispatch = NotificationDispatch {
        to,
        channel: CHANNEL_EMAIL.to_string(),
        template: state.templates().shipping.clone(),
        data,
        attachments: Vec::new(),
    };
    state
        .notifier()
        .send(Some(msg_id), &dispatch, state.now())
        .await?;

    info!(
        stage = "subscriber",
        %msg_id,
        fulfillment_id = %shipment.id,
        %tracking_number,
        "shipment notification sent"
    );
    Ok(tracking_number.to_string())
}
