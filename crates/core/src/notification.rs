use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::projection::{format_address, OrderProjection, ShipmentProjection};

pub const CHANNEL_EMAIL: &str = "email";
pub const ORDER_PLACED_SUBJECT: &str = "Order Confirmation";
pub const SHIPMENT_SUBJECT: &str = "Order Shipped";
pub const DELIVERY_NAME: &str = "Pošta Slovenije / Slovenian Post";
pub const DELIVERY_LINK: &str = "https://moja.posta.si/tracking";

/// Outbound message handed to the messaging provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDispatch {
    pub to: String,
    pub channel: String,
    pub template: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    /// Base64 encoded body.
    pub content: String,
    pub content_type: String,
    pub disposition: String,
}

impl Attachment {
    pub fn pdf(filename: impl Into<String>, base64_content: String) -> Self {
        Self {
            filename: filename.into(),
            content: base64_content,
            content_type: "application/pdf".to_string(),
            disposition: "attachment".to_string(),
        }
    }
}

/// `3/14/2025, 10:30:00 AM`.
pub fn format_us_datetime(value: NaiveDateTime) -> String {
    value.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string()
}

/// Template data shared by the customer and internal order copies.
pub fn order_placed_data(
    order: &OrderProjection,
    order_date: NaiveDateTime,
    invoice_number: &str,
) -> Value {
    let items: Vec<Value> = order
        .items
        .iter()
        .map(|item| {
            json!({
                "product_title": item.title,
                "quantity": item.quantity,
                "unit_price": item.unit_price,
                "thumbnail": item.thumbnail,
            })
        })
        .collect();

    json!({
        "total": order.total,
        "subtotal": order.subtotal(),
        "shipping_address": format_address(order.shipping_address.as_ref()),
        "subject": ORDER_PLACED_SUBJECT,
        "shipping": order.shipping_total,
        "order_date": format_us_datetime(order_date),
        "customer": {
            "first_name": order.customer_first_name(),
            "last_name": order.customer_last_name(),
        },
        "cart_id": order.display_id,
        "currency_code": order.currency(),
        "invoice_number": invoice_number,
        "items": items,
    })
}

/// Template data for the shipment notification. The caller resolves the
/// tracking number so that a missing label is handled before this point.
pub fn shipment_data(
    shipment: &ShipmentProjection,
    tracking_number: &str,
    shipping_date: NaiveDateTime,
) -> Value {
    json!({
        "tracking_number": tracking_number,
        "subject": SHIPMENT_SUBJECT,
        "shipping_date": format_us_datetime(shipping_date),
        "customer": {
            "first_name": shipment.recipient_first_name(),
        },
        "delivery_name": DELIVERY_NAME,
        "delivery_link": DELIVERY_LINK,
    })
}
