use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::info;

use volja_core::invoice::build_invoice;
use volja_core::notification::{
    order_placed_data, Attachment, NotificationDispatch, CHANNEL_EMAIL,
};
use volja_core::pdf::render_pdf;

use super::{already_notified, store_local, SubscriberError};
use crate::router::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPlacedOutcome {
    pub invoice_number: String,
    pub recipients: Vec<String>,
}

/// Renders the invoice and emails it to the customer, then to the internal
/// mailbox. Nothing is sent when fetching or rendering fails, and the internal
/// copy is not sent when the customer copy fails. On a retry, recipients
/// already logged as sent for this event are skipped.
pub async fn handle(
    state: &AppState,
    msg_id: &str,
    order_id: &str,
) -> Result<OrderPlacedOutcome, SubscriberError> {
    let order = state
        .commerce()
        .get_order(order_id)
        .await
        .map_err(|source| SubscriberError::Fetch {
            entity: "order",
            source,
        })?;

    let customer_email = order
        .email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .ok_or(SubscriberError::MissingField("email"))?
        .to_string();

    let issued_on = store_local(state, state.now()).date();
    let document = build_invoice(&order, state.seller(), issued_on)?;
    let pdf = render_pdf(&document);
    let attachment = Attachment::pdf(
        format!("invoice-{}.pdf", document.invoice_number),
        STANDARD.encode(&pdf),
    );

    let data = order_placed_data(
        &order,
        store_local(state, order.created_at),
        &document.invoice_number,
    );
    let templates = state.templates();
    let recipients = vec![customer_email, templates.internal_order_email.clone()];
    let sent = already_notified(state, msg_id, &templates.order_placed).await?;

    for to in &recipients {
        if sent.contains(to) {
            info!(stage = "subscriber", %msg_id, recipient = %to, "already notified, skipping");
            continue;
        }
        let dispatch = NotificationDispatch {
            to: to.clone(),
            channel: CHANNEL_EMAIL.to_string(),
            template: templates.order_placed.clone(),
            data: data.clone(),
            attachments: vec![attachment.clone()],
        };
        state
            .notifier()
            .send(Some(msg_id), &dispatch, state.now())
            .await?;
    }

    info!(
        stage = "subscriber",
        %msg_id,
        order_id = %order.id,
        invoice_number = %document.invoice_number,
        pdf_bytes = pdf.len(),
        "order confirmation sent"
    );

    Ok(OrderPlacedOutcome {
        invoice_number: document.invoice_number,
        recipients,
    })
}
