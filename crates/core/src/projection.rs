use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Read-only order view fetched when `order.placed` fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderProjection {
    pub id: String,
    pub display_id: u64,
    #[serde(default)]
    pub email: Option<String>,
    pub currency_code: String,
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "de_amount")]
    pub total: f64,
    #[serde(deserialize_with = "de_amount")]
    pub shipping_total: f64,
    #[serde(default)]
    pub customer: Option<Customer>,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

impl OrderProjection {
    /// Item subtotal, derived as the order total minus shipping.
    pub fn subtotal(&self) -> f64 {
        self.total - self.shipping_total
    }

    pub fn customer_first_name(&self) -> Option<&str> {
        self.customer
            .as_ref()
            .and_then(|customer| non_empty(customer.first_name.as_deref()))
            .or_else(|| {
                self.shipping_address
                    .as_ref()
                    .and_then(|address| non_empty(address.first_name.as_deref()))
            })
    }

    pub fn customer_last_name(&self) -> Option<&str> {
        self.customer
            .as_ref()
            .and_then(|customer| non_empty(customer.last_name.as_deref()))
            .or_else(|| {
                self.shipping_address
                    .as_ref()
                    .and_then(|address| non_empty(address.last_name.as_deref()))
            })
    }

    pub fn currency(&self) -> String {
        self.currency_code.to_uppercase()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub address_1: Option<String>,
    #[serde(default)]
    pub address_2: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl Address {
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .filter_map(non_empty)
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub variant_title: Option<String>,
    pub quantity: u32,
    #[serde(deserialize_with = "de_amount")]
    pub unit_price: f64,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl LineItem {
    pub fn line_total(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }

    /// Title plus variant, e.g. `Linen Dress (M / Sand)`.
    pub fn description(&self) -> String {
        match non_empty(self.variant_title.as_deref()) {
            Some(variant) => format!("{} ({variant})", self.title),
            None => self.title.clone(),
        }
    }
}

/// Read-only fulfillment view fetched when `shipment.created` fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentProjection {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order: Option<ShipmentOrder>,
    #[serde(default)]
    pub labels: Vec<ShipmentLabel>,
    #[serde(default)]
    pub delivery_address: Option<Address>,
    pub created_at: DateTime<Utc>,
}

impl ShipmentProjection {
    /// Tracking number of the first label, if any label exists.
    pub fn tracking_number(&self) -> Option<&str> {
        self.labels
            .first()
            .and_then(|label| non_empty(Some(label.tracking_number.as_str())))
    }

    pub fn recipient_email(&self) -> Option<&str> {
        let order = self.order.as_ref()?;
        order
            .customer
            .as_ref()
            .and_then(|customer| non_empty(customer.email.as_deref()))
            .or_else(|| non_empty(order.email.as_deref()))
    }

    pub fn recipient_first_name(&self) -> Option<&str> {
        self.delivery_address
            .as_ref()
            .and_then(|address| non_empty(address.first_name.as_deref()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipmentOrder {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub customer: Option<Customer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentLabel {
    pub tracking_number: String,
    #[serde(default)]
    pub tracking_url: Option<String>,
    #[serde(default)]
    pub label_url: Option<String>,
}

/// Joins the present street, postal code and city lines with `", "`.
pub fn format_address(address: Option<&Address>) -> String {
    let Some(address) = address else {
        return String::new();
    };
    [
        address.address_1.as_deref(),
        address.address_2.as_deref(),
        address.postal_code.as_deref(),
        address.city.as_deref(),
    ]
    .into_iter()
    .filter_map(non_empty)
    .collect::<Vec<_>>()
    .join(", ")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Amounts arrive either as JSON numbers or as decimal strings. Null and
/// missing amounts are errors.
fn de_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| D::Error::custom("amount out of range")),
        Value::String(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| D::Error::custom(format!("invalid amount: {raw}"))),
        Value::Null => Err(D::Error::custom("amount must not be null")),
        other => Err(D::Error::custom(format!("invalid amount: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::order_fixture;
    use serde_json::json;

    #[test]
    fn order_parses_numbers_and_strings() {
        let order: OrderProjection = serde_json::from_value(order_fixture()).expect("order");
        assert_eq!(order.total, 90.0);
        assert_eq!(order.shipping_total, 10.0);
        assert_eq!(order.subtotal(), 80.0);
        assert_eq!(order.currency(), "EUR");
        assert_eq!(order.items[1].line_total(), 30.0);
        assert_eq!(order.items[0].description(), "Linen Dress (M)");
    }

    #[test]
    fn names_fall_back_to_shipping_address() {
        let order: OrderProjection = serde_json::from_value(order_fixture()).expect("order");
        assert_eq!(order.customer_first_name(), Some("Ana"));
        assert_eq!(order.customer_last_name(), Some("Novak"));
    }

    #[test]
    fn address_skips_missing_and_blank_lines() {
        let order: OrderProjection = serde_json::from_value(order_fixture()).expect("order");
        assert_eq!(
            format_address(order.shipping_address.as_ref()),
            "Trubarjeva 1, 1000, Ljubljana"
        );
        assert_eq!(format_address(None), "");
        assert_eq!(format_address(Some(&Address::default())), "");
    }

    #[test]
    fn shipment_accessors_handle_missing_data() {
        let shipment: ShipmentProjection = serde_json::from_value(json!({
            "id": "ful_01",
            "order": {"email": "fallback@example.com", "customer": {"email": ""}},
            "labels": [],
            "created_at": "2025-03-15T08:00:00Z"
        }))
        .expect("shipment");
        assert_eq!(shipment.tracking_number(), None);
        assert_eq!(shipment.recipient_email(), Some("fallback@example.com"));
        assert_eq!(shipment.recipient_first_name(), None);
    }

    #[test]
    fn rejects_non_numeric_amounts() {
        let mut fixture = order_fixture();
        fixture["total"] = json!("ninety");
        assert!(serde_json::from_value::<OrderProjection>(fixture).is_err());
    }

    #[test]
    fn rejects_null_and_missing_amounts() {
        let mut fixture = order_fixture();
        fixture["shipping_total"] = Value::Null;
        let err = serde_json::from_value::<OrderProjection>(fixture).unwrap_err();
        assert!(err.to_string().contains("null"), "{err}");

        let mut fixture = order_fixture();
        fixture["items"][0]["unit_price"] = Value::Null;
        assert!(serde_json::from_value::<OrderProjection>(fixture).is_err());

        let mut fixture = order_fixture();
        if let Some(order) = fixture.as_object_mut() {
            order.remove("total");
        }
        let err = serde_json::from_value::<OrderProjection>(fixture).unwrap_err();
        assert!(err.to_string().contains("total"), "{err}");
    }
}
