//! Declarative invoice model built from an order projection.
//!
//! The document is an ordered list of typed blocks; [`crate::pdf`] owns all
//! positioning. Keeping content free of coordinates lets the builder be
//! tested on plain strings.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use thiserror::Error;

use crate::projection::{format_address, OrderProjection};

pub const INVOICE_TITLE: &str = "RAČUN / INVOICE";

pub const FOOTER_LINES: [&str; 3] = [
    "Hvala za vaš nakup! / Thank you for your purchase!",
    "DDV ni obračunan na podlagi 1. odstavka 94. člena ZDDV-1. / VAT not charged under Article 94(1) of the Slovenian VAT Act.",
    "Račun je izdan elektronsko in je veljaven brez podpisa in žiga. / This invoice is issued electronically and is valid without signature or stamp.",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvoiceError {
    #[error("order {0} has no line items to invoice")]
    NoItems(String),
}

/// Seller identity shown in the party block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seller {
    pub name: String,
    pub address_lines: Vec<String>,
    pub vat_id: Option<String>,
    pub iban: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceDocument {
    pub invoice_number: String,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Header {
        title: String,
        invoice_number: String,
        details: Vec<String>,
    },
    PartyInfo {
        seller: Party,
        buyer: Party,
    },
    ItemTable {
        currency: String,
        rows: Vec<ItemRow>,
    },
    Totals {
        lines: Vec<TotalLine>,
    },
    Footer {
        lines: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Party {
    pub heading: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRow {
    pub description: String,
    pub quantity: String,
    pub unit_price: String,
    pub line_total: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TotalLine {
    pub label: String,
    pub amount: String,
    pub emphasized: bool,
}

impl TotalLine {
    pub fn text(&self) -> String {
        format!("{}: {}", self.label, self.amount)
    }
}

/// Zero-padded display id followed by the two-digit year: `42`, 2025 → `00042-25`.
pub fn invoice_number(display_id: u64, year: i32) -> String {
    format!("{:05}-{:02}", display_id, year.rem_euclid(100))
}

/// Two decimals followed by the currency code.
pub fn format_money(amount: f64, currency: &str) -> String {
    let mut rounded = format!("{amount:.2}");
    if rounded == "-0.00" {
        rounded = "0.00".to_string();
    }
    format!("{rounded} {currency}")
}

/// Assembles the invoice blocks. `issued_on` is the local calendar date the
/// invoice is generated on; it also supplies the year of the invoice number.
pub fn build_invoice(
    order: &OrderProjection,
    seller: &Seller,
    issued_on: NaiveDate,
) -> Result<InvoiceDocument, InvoiceError> {
    if order.items.is_empty() {
        return Err(InvoiceError::NoItems(order.id.clone()));
    }

    let currency = order.currency();
    let number = invoice_number(order.display_id, issued_on.year());

    let header = Block::Header {
        title: INVOICE_TITLE.to_string(),
        invoice_number: number.clone(),
        details: vec![
            format!("Številka računa / Invoice no.: {number}"),
            format!("Datum / Date: {}", issued_on.format("%d.%m.%Y")),
            format!("Naročilo / Order: #{}", order.display_id),
        ],
    };

    let mut seller_lines = seller.address_lines.clone();
    if let Some(vat_id) = &seller.vat_id {
        seller_lines.push(format!("ID za DDV / VAT ID: {vat_id}"));
    }
    if let Some(iban) = &seller.iban {
        seller_lines.push(format!("IBAN: {iban}"));
    }
    seller_lines.push(seller.email.clone());

    let mut buyer_lines = Vec::new();
    let buyer_name = [order.customer_first_name(), order.customer_last_name()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    if !buyer_name.is_empty() {
        buyer_lines.push(buyer_name);
    }
    let address = format_address(order.shipping_address.as_ref());
    if !address.is_empty() {
        buyer_lines.push(address);
    }
    if let Some(email) = order.email.as_deref().filter(|email| !email.is_empty()) {
        buyer_lines.push(email.to_string());
    }

    let parties = Block::PartyInfo {
        seller: Party {
            heading: format!("Prodajalec / Seller: {}", seller.name),
            lines: seller_lines,
        },
        buyer: Party {
            heading: "Kupec / Buyer".to_string(),
            lines: buyer_lines,
        },
    };

    let rows = order
        .items
        .iter()
        .map(|item| ItemRow {
            description: item.description(),
            quantity: item.quantity.to_string(),
            unit_price: format_money(item.unit_price, &currency),
            line_total: format_money(item.line_total(), &currency),
        })
        .collect();

    let totals = Block::Totals {
        lines: vec![
            TotalLine {
                label: "Subtotal".to_string(),
                amount: format_money(order.subtotal(), &currency),
                emphasized: false,
            },
            TotalLine {
                label: "Shipping".to_string(),
                amount: format_money(order.shipping_total, &currency),
                emphasized: false,
            },
            TotalLine {
                label: "Total".to_string(),
                amount: format_money(order.total, &currency),
                emphasized: true,
            },
        ],
    };

    Ok(InvoiceDocument {
        invoice_number: number,
        blocks: vec![
            header,
            parties,
            Block::ItemTable { currency, rows },
            totals,
            Block::Footer {
                lines: FOOTER_LINES.iter().map(|line| line.to_string()).collect(),
            },
        ],
    })
}
