use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_SIZES: [&str; 6] = ["XS", "S", "M", "L", "XL", "XXL"];
pub const PRESET_TOPS: [&str; 6] = [
    "Chest",
    "Waist",
    "Hip",
    "Shoulder width",
    "Sleeve length",
    "Length",
];
pub const PRESET_BOTTOMS: [&str; 6] = ["Waist", "Hip", "Inseam", "Thigh", "Length", "Rise"];

/// One measurement row: a label and one value per size column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    pub label: String,
    pub values: Vec<String>,
}

/// Size chart stored as a JSON string under the `size_chart` metadata key.
///
/// Columns are sizes, rows are measurements. Every row carries exactly one
/// value per size; the edit operations keep that true and [`SizeChart::repair`]
/// restores it for charts that arrive from elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeChart {
    pub sizes: Vec<String>,
    pub measurements: Vec<Measurement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Tops,
    Bottoms,
}

impl Preset {
    pub fn labels(self) -> &'static [&'static str] {
        match self {
            Self::Tops => &PRESET_TOPS,
            Self::Bottoms => &PRESET_BOTTOMS,
        }
    }
}

/// A single edit applied to a draft chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SizeChartEdit {
    AddSize,
    RemoveSize { index: usize },
    UpdateSize { index: usize, value: String },
    AddMeasurement,
    RemoveMeasurement { index: usize },
    UpdateMeasurementLabel { index: usize, value: String },
    UpdateCell { row: usize, column: usize, value: String },
    ApplyPreset { preset: Preset },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeChartError {
    #[error("{kind} index {index} is out of range (len {len})")]
    OutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },
    #[error("cell value must be numeric or empty (got {0:?})")]
    InvalidCell(String),
}

impl SizeChart {
    /// Builds a chart with the given columns and rows, all cells empty.
    pub fn empty_template<S: AsRef<str>, L: AsRef<str>>(sizes: &[S], labels: &[L]) -> Self {
        let sizes: Vec<String> = sizes.iter().map(|s| s.as_ref().to_string()).collect();
        let measurements = labels
            .iter()
            .map(|label| Measurement {
                label: label.as_ref().to_string(),
                values: vec![String::new(); sizes.len()],
            })
            .collect();
        Self {
            sizes,
            measurements,
        }
    }

    /// Parses the metadata value. Anything that is not a JSON string holding
    /// `{ sizes: [..], measurements: [..] }` yields an empty chart.
    pub fn from_metadata_value(value: Option<&Value>) -> Self {
        let Some(Value::String(raw)) = value else {
            return Self::default();
        };
        match serde_json::from_str::<SizeChart>(raw) {
            Ok(mut chart) => {
                chart.repair();
                chart
            }
            Err(_) => Self::default(),
        }
    }

    /// The starting point of an edit session: a copy of the saved chart, or
    /// the default sizes with the tops preset when nothing is saved yet.
    pub fn draft_from_saved(saved: &SizeChart) -> Self {
        if saved.sizes.is_empty() {
            Self::empty_template(&DEFAULT_SIZES, &PRESET_TOPS)
        } else {
            saved.clone()
        }
    }

    pub fn has_chart(&self) -> bool {
        !self.sizes.is_empty() && !self.measurements.is_empty()
    }

    pub fn is_consistent(&self) -> bool {
        self.measurements
            .iter()
            .all(|row| row.values.len() == self.sizes.len())
    }

    /// Pads short rows with empty cells and drops cells beyond the last size.
    pub fn repair(&mut self) {
        let width = self.sizes.len();
        for row in &mut self.measurements {
            row.values.resize(width, String::new());
        }
    }

    pub fn add_size(&mut self) {
        self.sizes.push(String::new());
        for row in &mut self.measurements {
            row.values.push(String::new());
        }
    }

    pub fn remove_size(&mut self, index: usize) -> Result<(), SizeChartError> {
        self.check_size(index)?;
        self.sizes.remove(index);
        for row in &mut self.measurements {
            if index < row.values.len() {
                row.values.remove(index);
            }
        }
        self.repair();
        Ok(())
    }

    pub fn update_size(&mut self, index: usize, value: &str) -> Result<(), SizeChartError> {
        self.check_size(index)?;
        self.sizes[index] = value.to_string();
        Ok(())
    }

    pub fn add_measurement(&mut self) {
        self.measurements.push(Measurement {
            label: String::new(),
            values: vec![String::new(); self.sizes.len()],
        });
    }

    pub fn remove_measurement(&mut self, index: usize) -> Result<(), SizeChartError> {
        self.check_row(index)?;
        self.measurements.remove(index);
        Ok(())
    }

    pub fn update_measurement_label(
        &mut self,
        index: usize,
        value: &str,
    ) -> Result<(), SizeChartError> {
        self.check_row(index)?;
        self.measurements[index].label = value.to_string();
        Ok(())
    }

    pub fn update_cell(
        &mut self,
        row: usize,
        column: usize,
        value: &str,
    ) -> Result<(), SizeChartError> {
        self.check_row(row)?;
        self.check_size(column)?;
        let trimmed = value.trim();
        if !trimmed.is_empty() && trimmed.replace(',', ".").parse::<f64>().is_err() {
            return Err(SizeChartError::InvalidCell(value.to_string()));
        }
        let values = &mut self.measurements[row].values;
        values.resize(self.sizes.len(), String::new());
        values[column] = trimmed.to_string();
        Ok(())
    }

    /// Replaces all rows with the preset labels. Sizes are kept, or filled
    /// with the defaults when the chart has none.
    pub fn apply_preset(&mut self, preset: Preset) {
        if self.sizes.is_empty() {
            self.sizes = DEFAULT_SIZES.iter().map(|s| s.to_string()).collect();
        }
        *self = Self::empty_template(&self.sizes, preset.labels());
    }

    pub fn apply_edit(&mut self, edit: &SizeChartEdit) -> Result<(), SizeChartError> {
        match edit {
            SizeChartEdit::AddSize => self.add_size(),
            SizeChartEdit::RemoveSize { index } => self.remove_size(*index)?,
            SizeChartEdit::UpdateSize { index, value } => self.update_size(*index, value)?,
            SizeChartEdit::AddMeasurement => self.add_measurement(),
            SizeChartEdit::RemoveMeasurement { index } => self.remove_measurement(*index)?,
            SizeChartEdit::UpdateMeasurementLabel { index, value } => {
                self.update_measurement_label(*index, value)?
            }
            SizeChartEdit::UpdateCell { row, column, value } => {
                self.update_cell(*row, *column, value)?
            }
            SizeChartEdit::ApplyPreset { preset } => self.apply_preset(*preset),
        }
        Ok(())
    }

    /// Encodes the chart as the JSON string stored in metadata.
    pub fn to_metadata_string(&self) -> String {
        let sizes = self.sizes.iter().cloned().map(Value::String).collect();
        let measurements = self
            .measurements
            .iter()
            .map(|row| {
                let mut object = serde_json::Map::new();
                object.insert("label".to_string(), Value::String(row.label.clone()));
                object.insert(
                    "values".to_string(),
                    Value::Array(row.values.iter().cloned().map(Value::String).collect()),
                );
                Value::Object(object)
            })
            .collect();
        let mut object = serde_json::Map::new();
        object.insert("sizes".to_string(), Value::Array(sizes));
        object.insert("measurements".to_string(), Value::Array(measurements));
        Value::Object(object).to_string()
    }

    fn check_size(&self, index: usize) -> Result<(), SizeChartError> {
        if index >= self.sizes.len() {
            return Err(SizeChartError::OutOfRange {
                kind: "size",
                index,
                len: self.sizes.len(),
            });
        }
        Ok(())
    }

    fn check_row(&self, index: usize) -> Result<(), SizeChartError> {
        if index >= self.measurements.len() {
            return Err(SizeChartError::OutOfRange {
                kind: "measurement",
                index,
                len: self.measurements.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> SizeChart {
        SizeChart::empty_template(&["S", "M"], &["Chest", "Waist"])
    }

    #[test]
    fn rows_track_size_count_through_edits() {
        let mut chart = sample();
        chart.add_size();
        assert!(chart.is_consistent());
        assert_eq!(chart.measurements[0].values.len(), 3);

        chart.add_measurement();
        assert_eq!(chart.measurements[2].values.len(), 3);

        chart.remove_size(0).expect("remove size");
        assert!(chart.is_consistent());
        assert_eq!(chart.sizes, vec!["M", ""]);

        chart.remove_measurement(1).expect("remove row");
        assert!(chart.is_consistent());
        assert_eq!(chart.measurements.len(), 2);
    }

    #[test]
    fn remove_size_drops_the_matching_column() {
        let mut chart = sample();
        chart.update_cell(0, 0, "88").expect("cell");
        chart.update_cell(0, 1, "92").expect("cell");

        chart.remove_size(0).expect("remove");
        assert_eq!(chart.measurements[0].values, vec!["92"]);
    }

    #[test]
    fn repair_pads_and_truncates_rows() {
        let mut chart = SizeChart {
            sizes: vec!["S".into(), "M".into()],
            measurements: vec![
                Measurement {
                    label: "Chest".into(),
                    values: vec!["1".into()],
                },
                Measurement {
                    label: "Hip".into(),
                    values: vec!["1".into(), "2".into(), "3".into()],
                },
            ],
        };
        assert!(!chart.is_consistent());
        chart.repair();
        assert!(chart.is_consistent());
        assert_eq!(chart.measurements[0].values, vec!["1", ""]);
        assert_eq!(chart.measurements[1].values, vec!["1", "2"]);
    }

    #[test]
    fn cells_must_be_numeric_or_empty() {
        let mut chart = sample();
        chart.update_cell(1, 1, " 72.5 ").expect("numeric");
        chart.update_cell(1, 0, "70,5").expect("decimal comma");
        chart.update_cell(1, 0, "").expect("empty");
        assert_eq!(chart.measurements[1].values, vec!["", "72.5"]);

        let err = chart.update_cell(0, 0, "wide").unwrap_err();
        assert_eq!(err, SizeChartError::InvalidCell("wide".into()));
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let mut chart = sample();
        assert!(matches!(
            chart.remove_size(5),
            Err(SizeChartError::OutOfRange { kind: "size", .. })
        ));
        assert!(matches!(
            chart.update_cell(9, 0, "1"),
            Err(SizeChartError::OutOfRange {
                kind: "measurement",
                ..
            })
        ));
    }

    #[test]
    fn preset_keeps_sizes_or_uses_defaults() {
        let mut chart = sample();
        chart.apply_preset(Preset::Bottoms);
        assert_eq!(chart.sizes, vec!["S", "M"]);
        assert_eq!(chart.measurements[2].label, "Inseam");
        assert!(chart.is_consistent());

        let mut empty = SizeChart::default();
        empty.apply_preset(Preset::Tops);
        assert_eq!(empty.sizes.len(), DEFAULT_SIZES.len());
        assert_eq!(empty.measurements.len(), PRESET_TOPS.len());
        assert!(empty.is_consistent());
    }

    #[test]
    fn draft_defaults_when_nothing_saved() {
        let draft = SizeChart::draft_from_saved(&SizeChart::default());
        assert_eq!(draft.sizes[0], "XS");
        assert_eq!(draft.measurements[0].label, "Chest");

        let saved = sample();
        assert_eq!(SizeChart::draft_from_saved(&saved), saved);
    }

    #[test]
    fn parses_metadata_string_and_falls_back_to_empty() {
        let chart = sample();
        let value = Value::String(chart.to_metadata_string());
        assert_eq!(SizeChart::from_metadata_value(Some(&value)), chart);

        let broken = Value::String("{not json".into());
        assert_eq!(SizeChart::from_metadata_value(Some(&broken)), SizeChart::default());
        let wrong_type = json!({"sizes": []});
        assert_eq!(
            SizeChart::from_metadata_value(Some(&wrong_type)),
            SizeChart::default()
        );
        assert!(!SizeChart::from_metadata_value(None).has_chart());
    }

    #[test]
    fn edits_deserialize_from_tagged_json() {
        let edits: Vec<SizeChartEdit> = serde_json::from_value(json!([
            {"op": "add_size"},
            {"op": "update_size", "index": 2, "value": "L"},
            {"op": "update_cell", "row": 0, "column": 2, "value": "100"},
            {"op": "apply_preset", "preset": "bottoms"}
        ]))
        .expect("edits");

        let mut chart = sample();
        for edit in &edits[..3] {
            chart.apply_edit(edit).expect("edit");
        }
        assert_eq!(chart.sizes, vec!["S", "M", "L"]);
        assert_eq!(chart.measurements[0].values[2], "100");

        chart.apply_edit(&edits[3]).expect("preset");
        assert_eq!(chart.measurements[0].label, "Waist");
    }
}
