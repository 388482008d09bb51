//! Feature schema derived from a fitted pipeline and a reference dataset.
//!
//! The schema fixes the column order the model expects, a default per column
//! (median for numeric, mode for categorical) and a short list of observed
//! categories per categorical column for form-style clients.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::{
    dataset::{Cell, ColumnKind, DatasetError, Frame},
    preprocess::{preprocess, Preprocessed},
    value::{parse_finite, FeatureRow, FeatureValue},
};

/// Upper bound on enumerated categories per column.
pub const MAX_CATEGORICAL_OPTIONS: usize = 50;

/// Default for a categorical column with no observed values.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Columns handled by one transformer of a fitted pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnGroup {
    /// Transformer name (e.g. `num`, `cat`).
    pub name: String,
    /// Input columns consumed by the transformer.
    pub columns: Vec<String>,
}

impl ColumnGroup {
    /// Creates a group.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

/// Expected input columns, defaults and categorical enumerations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    /// Model input columns, first-seen order, no duplicates.
    #[serde(rename = "expected_cols")]
    pub expected_columns: Vec<String>,
    /// Fallback value per column.
    pub defaults: IndexMap<String, FeatureValue>,
    /// Sorted observed values per categorical column.
    pub categorical_options: IndexMap<String, Vec<String>>,
}

impl FeatureSchema {
    /// Schema that is not ready to serve.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the schema lists any input column.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.expected_columns.is_empty()
    }

    /// Derives the schema from transformer groupings and reference data.
    #[must_use]
    pub fn derive(groups: &[ColumnGroup], data: &Preprocessed) -> Self {
        let mut defaults = IndexMap::new();
        let mut categorical_options = IndexMap::new();

        for name in &data.numeric {
            let cells = data.features.column(name).unwrap_or_default();
            defaults.insert(
                name.clone(),
                FeatureValue::Number(numeric_median(cells).unwrap_or(0.0)),
            );
        }
        for name in &data.categorical {
            let cells = data.features.column(name).unwrap_or_default();
            let mode = most_frequent(cells).unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());
            defaults.insert(name.clone(), FeatureValue::Text(mode));
            categorical_options.insert(name.clone(), sorted_options(cells));
        }

        Self {
            expected_columns: expected_columns(groups),
            defaults,
            categorical_options,
        }
    }

    /// Picks one reference row deterministically and cleans it for clients.
    ///
    /// Missing cells take the column default; numeric columns are emitted as floats.
    #[must_use]
    pub fn sample_record(&self, features: &Frame, seed: u64) -> Option<FeatureRow> {
        let index = *features.sample_indices(1, seed).first()?;
        let row = features.row(index)?;
        Some(
            row.into_iter()
                .map(|(name, cell)| {
                    let value = self.clean_cell(&name, features.kind(&name), cell);
                    (name, value)
                })
                .collect(),
        )
    }

    fn clean_cell(&self, name: &str, kind: Option<ColumnKind>, cell: Cell) -> FeatureValue {
        let numeric = kind == Some(ColumnKind::Numeric);
        match cell {
            None => self
                .defaults
                .get(name)
                .cloned()
                .unwrap_or(FeatureValue::Missing),
            Some(text) if numeric => {
                parse_finite(&text).map_or(FeatureValue::Text(text), FeatureValue::Number)
            }
            Some(text) => FeatureValue::Text(text),
        }
    }
}

/// Schema plus the cached reference features it was derived from.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    /// Derived schema; empty when no dataset was found.
    pub schema: FeatureSchema,
    /// Preprocessed reference features, kept for sampling.
    pub features: Option<Frame>,
}

impl ReferenceData {
    /// Loads the raw dataset and derives the schema.
    ///
    /// An absent dataset file is not an error: it yields an empty schema, which
    /// callers treat as "not ready". Malformed data is still reported.
    pub fn load(groups: &[ColumnGroup], dataset_path: &Path) -> Result<Self, DatasetError> {
        let frame = match Frame::from_csv_path(dataset_path) {
            Ok(frame) => frame,
            Err(DatasetError::NotFound(path)) => {
                tracing::warn!(
                    path = %path.display(),
                    "reference dataset missing, schema left empty"
                );
                return Ok(Self::default());
            }
            Err(err) => return Err(err),
        };
        let data = preprocess(&frame)?;
        Ok(Self {
            schema: FeatureSchema::derive(groups, &data),
            features: Some(data.features),
        })
    }
}

/// Concatenates group columns, keeping the first occurrence of each name.
#[must_use]
pub fn expected_columns(groups: &[ColumnGroup]) -> Vec<String> {
    groups
        .iter()
        .flat_map(|group| group.columns.iter().cloned())
        .collect::<IndexSet<String>>()
        .into_iter()
        .collect()
}

/// Median of the cells that parse as finite numbers.
#[must_use]
pub fn numeric_median(cells: &[Cell]) -> Option<f64> {
    let mut values: Vec<f64> = cells
        .iter()
        .flatten()
        .filter_map(|cell| parse_finite(cell))
        .collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Most frequent present value; ties go to the lexicographically smallest.
#[must_use]
pub fn most_frequent(cells: &[Cell]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for cell in cells.iter().flatten() {
        *counts.entry(cell.as_str()).or_default() += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value.to_string())
}

/// Sorted distinct present values, truncated to [`MAX_CATEGORICAL_OPTIONS`].
#[must_use]
pub fn sorted_options(cells: &[Cell]) -> Vec<String> {
    cells
        .iter()
        .flatten()
        .map(String::as_str)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .take(MAX_CATEGORICAL_OPTIONS)
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::split_kinds;
    use tempfile::tempdir;

    fn cells(values: &[Option<&str>]) -> Vec<Cell> {
        values.iter().map(|v| v.map(ToOwned::to_owned)).collect()
    }

    fn reference() -> Preprocessed {
        let frame = Frame::from_columns(vec![
            (
                "tenure".to_string(),
                cells(&[Some("1"), Some("30"), None, Some("12"), Some("7")]),
            ),
            (
                "Contract".to_string(),
                cells(&[
                    Some("Two Year"),
                    Some("Month-to-Month"),
                    Some("Month-to-Month"),
                    None,
                    Some("One Year"),
                ]),
            ),
            ("Offer".to_string(), cells(&[None, None, None, None, None])),
        ])
        .unwrap();
        let mut data = split_kinds(frame, vec![None; 5]);
        // an all-missing column reads as numeric; treat it as categorical here
        data.numeric.retain(|c| c != "Offer");
        data.categorical.push("Offer".to_string());
        data
    }

    #[test]
    fn expected_columns_are_deduplicated_in_first_seen_order() {
        let groups = vec![
            ColumnGroup::new("num", vec!["b".into(), "a".into()]),
            ColumnGroup::new("cat", vec!["c".into(), "a".into(), "b".into(), "d".into()]),
        ];
        assert_eq!(expected_columns(&groups), vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn numeric_default_is_median_ignoring_non_numeric() {
        assert_eq!(
            numeric_median(&cells(&[Some("3"), Some("oops"), Some("1"), None])),
            Some(2.0)
        );
        assert_eq!(
            numeric_median(&cells(&[Some("5"), Some(" 1 "), Some("9")])),
            Some(5.0)
        );
        assert_eq!(numeric_median(&cells(&[Some("x"), None])), None);
    }

    #[test]
    fn categorical_default_is_mode_or_unknown() {
        let schema = FeatureSchema::derive(
            &[ColumnGroup::new(
                "all",
                vec!["tenure".into(), "Contract".into(), "Offer".into()],
            )],
            &reference(),
        );
        assert_eq!(schema.defaults["tenure"], FeatureValue::Number(9.5));
        assert_eq!(
            schema.defaults["Contract"],
            FeatureValue::Text("Month-to-Month".into())
        );
        assert_eq!(
            schema.defaults["Offer"],
            FeatureValue::Text(UNKNOWN_CATEGORY.into())
        );
        assert_eq!(
            schema.categorical_options["Contract"],
            vec!["Month-to-Month", "One Year", "Two Year"]
        );
        assert!(schema.categorical_options["Offer"].is_empty());
        assert!(!schema.categorical_options.contains_key("tenure"));
    }

    #[test]
    fn mode_ties_pick_smallest_value() {
        assert_eq!(
            most_frequent(&cells(&[Some("b"), Some("a"), Some("b"), Some("a")])),
            Some("a".to_string())
        );
        assert_eq!(most_frequent(&cells(&[None])), None);
    }

    #[test]
    fn options_are_sorted_and_bounded() {
        let many: Vec<Cell> = (0..120).rev().map(|i| Some(format!("v{i:03}"))).collect();
        let options = sorted_options(&many);
        assert_eq!(options.len(), MAX_CATEGORICAL_OPTIONS);
        assert_eq!(options[0], "v000");
        assert!(options.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn sample_record_fills_defaults_and_types_numbers() {
        let data = reference();
        let schema = FeatureSchema::derive(
            &[ColumnGroup::new("all", vec!["tenure".into(), "Contract".into()])],
            &data,
        );
        let record = schema.sample_record(&data.features, 42).unwrap();
        assert_eq!(record.len(), 3);
        assert!(matches!(record["tenure"], FeatureValue::Number(_)));
        assert!(matches!(record["Contract"], FeatureValue::Text(_)));
        assert_eq!(record, schema.sample_record(&data.features, 42).unwrap());
    }

    #[test]
    fn missing_reference_dataset_yields_empty_schema() {
        let dir = tempdir().unwrap();
        let reference = ReferenceData::load(
            &[ColumnGroup::new("num", vec!["tenure".into()])],
            &dir.path().join("telco.csv"),
        )
        .unwrap();
        assert!(!reference.schema.is_ready());
        assert!(reference.features.is_none());
    }
}
