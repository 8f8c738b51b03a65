//! Typed access to the free-form metadata map shared by products and variants.
//!
//! The host stores metadata as one JSON object and several independent
//! editors write into it. Each editor is represented by a patch type that can
//! only carry the keys it owns; [`merge_patch`] lays those keys over a freshly
//! fetched copy of the map so sibling keys survive every save.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::size_chart::SizeChart;

pub type Metadata = Map<String, Value>;

pub const KEY_COMING_SOON: &str = "coming_soon";
pub const KEY_PRE_ORDER_DATE: &str = "pre_order_date";
pub const KEY_PRODUCT_STATE: &str = "product_state";
pub const KEY_COLORS: &str = "colors";
pub const KEY_TABLE: &str = "table";
pub const KEY_SIZE_CHART: &str = "size_chart";
pub const KEY_COLOR: &str = "color";

pub const DEFAULT_VARIANT_COLOR: &str = "#ffffff";

const PRE_ORDER_STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A set of metadata keys owned by one editor.
pub trait MetadataPatch {
    /// Keys this patch is allowed to write.
    const KEYS: &'static [&'static str];

    /// Short name used in logs and metric labels.
    const NAME: &'static str;

    fn into_entries(self) -> Vec<(&'static str, Value)>;
}

/// Overlays the patch on `current`, leaving every key the patch does not own untouched.
pub fn merge_patch<P: MetadataPatch>(current: Option<&Metadata>, patch: P) -> Metadata {
    let mut merged = current.cloned().unwrap_or_default();
    for (key, value) in patch.into_entries() {
        debug_assert!(P::KEYS.contains(&key), "{} wrote foreign key {key}", P::NAME);
        if P::KEYS.contains(&key) {
            merged.insert(key.to_string(), value);
        }
    }
    merged
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("invalid color {0:?}, expected #rgb or #rrggbb")]
    InvalidColor(String),
}

/// CSS hex color, normalised to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor(String);

impl HexColor {
    pub fn parse(raw: &str) -> Result<Self, MetadataError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix('#')
            .ok_or_else(|| MetadataError::InvalidColor(raw.to_string()))?;
        let valid_len = matches!(digits.len(), 3 | 6);
        if !valid_len || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MetadataError::InvalidColor(raw.to_string()));
        }
        Ok(Self(format!("#{}", digits.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for HexColor {
    type Error = MetadataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HexColor> for String {
    fn from(value: HexColor) -> Self {
        value.0
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coming-soon switch plus pre-order timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSettingsPatch {
    pub coming_soon: bool,
    pub pre_order_date: Option<DateTime<Utc>>,
}

impl MetadataPatch for ProductSettingsPatch {
    const KEYS: &'static [&'static str] = &[KEY_COMING_SOON, KEY_PRE_ORDER_DATE];
    const NAME: &'static str = "product_settings";

    fn into_entries(self) -> Vec<(&'static str, Value)> {
        vec![
            (KEY_COMING_SOON, Value::String(self.coming_soon.to_string())),
            (
                KEY_PRE_ORDER_DATE,
                self.pre_order_date
                    .map(|date| Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true)))
                    .unwrap_or(Value::Null),
            ),
        ]
    }
}

/// Pre-order date as a local wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreorderDatePatch {
    pub pre_order_date: Option<NaiveDateTime>,
}

impl MetadataPatch for PreorderDatePatch {
    const KEYS: &'static [&'static str] = &[KEY_PRE_ORDER_DATE];
    const NAME: &'static str = "preorder_date";

    fn into_entries(self) -> Vec<(&'static str, Value)> {
        let value = self
            .pre_order_date
            .map(|date| Value::String(date.format(PRE_ORDER_STORAGE_FORMAT).to_string()))
            .unwrap_or(Value::Null);
        vec![(KEY_PRE_ORDER_DATE, value)]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeChartPatch(pub SizeChart);

impl MetadataPatch for SizeChartPatch {
    const KEYS: &'static [&'static str] = &[KEY_SIZE_CHART];
    const NAME: &'static str = "size_chart";

    fn into_entries(self) -> Vec<(&'static str, Value)> {
        let mut chart = self.0;
        chart.repair();
        vec![(KEY_SIZE_CHART, Value::String(chart.to_metadata_string()))]
    }
}

/// Swatch colors shown on the product page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwatchColorsPatch {
    pub colors: Vec<HexColor>,
}

impl MetadataPatch for SwatchColorsPatch {
    const KEYS: &'static [&'static str] = &[KEY_COLORS];
    const NAME: &'static str = "colors";

    fn into_entries(self) -> Vec<(&'static str, Value)> {
        let encoded = Value::Array(
            self.colors
                .into_iter()
                .map(|color| Value::String(color.into()))
                .collect(),
        );
        vec![(KEY_COLORS, Value::String(encoded.to_string()))]
    }
}

/// Free-form product state label and its accompanying data table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductStatePatch {
    pub product_state: String,
    #[serde(default)]
    pub table: Value,
}

impl MetadataPatch for ProductStatePatch {
    const KEYS: &'static [&'static str] = &[KEY_PRODUCT_STATE, KEY_TABLE];
    const NAME: &'static str = "product_state";

    fn into_entries(self) -> Vec<(&'static str, Value)> {
        let table = match self.table {
            Value::Null => Value::Null,
            other => Value::String(other.to_string()),
        };
        vec![
            (KEY_PRODUCT_STATE, Value::String(self.product_state)),
            (KEY_TABLE, table),
        ]
    }
}

/// Variant-scoped swatch color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantColorPatch {
    pub color: HexColor,
}

impl MetadataPatch for VariantColorPatch {
    const KEYS: &'static [&'static str] = &[KEY_COLOR];
    const NAME: &'static str = "variant_color";

    fn into_entries(self) -> Vec<(&'static str, Value)> {
        vec![(KEY_COLOR, Value::String(self.color.into()))]
    }
}

pub fn read_coming_soon(metadata: Option<&Metadata>) -> bool {
    match metadata.and_then(|map| map.get(KEY_COMING_SOON)) {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(raw)) => raw == "true",
        _ => false,
    }
}

/// A stored `pre_order_date`: either a wall-clock time written by the
/// pre-order widget or an instant written by the settings widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoredDate {
    WallClock(NaiveDateTime),
    Instant(DateTime<Utc>),
}

fn read_stored_date(metadata: Option<&Metadata>) -> Option<StoredDate> {
    match metadata?.get(KEY_PRE_ORDER_DATE)? {
        Value::String(raw) => parse_pre_order_date(raw),
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(StoredDate::Instant),
        _ => None,
    }
}

/// Reads `pre_order_date` as wall-clock time in the store time zone.
///
/// Zoned timestamps and epoch milliseconds are shifted into `tz`; wall-clock
/// values are returned as stored.
pub fn read_pre_order_date<Z: TimeZone>(
    metadata: Option<&Metadata>,
    tz: &Z,
) -> Option<NaiveDateTime> {
    match read_stored_date(metadata)? {
        StoredDate::WallClock(local) => Some(local),
        StoredDate::Instant(instant) => Some(instant.with_timezone(tz).naive_local()),
    }
}

/// Reads `pre_order_date` as an instant, taking wall-clock values as local
/// time in `tz`. A wall-clock time skipped by a DST change yields `None`.
pub fn read_pre_order_instant<Z: TimeZone>(
    metadata: Option<&Metadata>,
    tz: &Z,
) -> Option<DateTime<Utc>> {
    match read_stored_date(metadata)? {
        StoredDate::WallClock(local) => tz
            .from_local_datetime(&local)
            .earliest()
            .map(|date| date.with_timezone(&Utc)),
        StoredDate::Instant(instant) => Some(instant),
    }
}

fn parse_pre_order_date(raw: &str) -> Option<StoredDate> {
    let raw = raw.trim();
    if let Ok(zoned) = DateTime::parse_from_rfc3339(raw) {
        return Some(StoredDate::Instant(zoned.with_timezone(&Utc)));
    }
    [
        PRE_ORDER_STORAGE_FORMAT,
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ]
    .iter()
    .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
    .map(StoredDate::WallClock)
}

/// `14 Mar 2025, 10:30`, or `Not set`.
pub fn format_preorder_display(date: Option<NaiveDateTime>) -> String {
    match date {
        Some(date) => date.format("%d %b %Y, %H:%M").to_string(),
        None => "Not set".to_string(),
    }
}

pub fn read_variant_color(metadata: Option<&Metadata>) -> String {
    match metadata.and_then(|map| map.get(KEY_COLOR)) {
        Some(Value::String(color)) => color.clone(),
        _ => DEFAULT_VARIANT_COLOR.to_string(),
    }
}

/// Reads the swatch list, skipping entries that are not valid colors.
pub fn read_colors(metadata: Option<&Metadata>) -> Vec<HexColor> {
    let entries = match metadata.and_then(|map| map.get(KEY_COLORS)) {
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    entries
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|raw| HexColor::parse(raw).ok())
        .collect()
}

/// Current product state label and table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductState {
    pub product_state: Option<String>,
    pub table: Value,
}

pub fn read_product_state(metadata: Option<&Metadata>) -> ProductState {
    let product_state = metadata
        .and_then(|map| map.get(KEY_PRODUCT_STATE))
        .and_then(Value::as_str)
        .map(str::to_string);
    let table = match metadata.and_then(|map| map.get(KEY_TABLE)) {
        Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or(Value::Null),
        Some(other) => other.clone(),
        None => Value::Null,
    };
    ProductState {
        product_state,
        table,
    }
}

pub fn read_size_chart(metadata: Option<&Metadata>) -> SizeChart {
    SizeChart::from_metadata_value(metadata.and_then(|map| map.get(KEY_SIZE_CHART)))
}
