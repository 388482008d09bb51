use indexmap::IndexMap;

use crate::dataset::{Cell, ColumnKind, DatasetError, Frame};

/// Label column.
pub const TARGET: &str = "Churn Label";

/// Identifier, geography and leakage columns removed before modelling.
pub const DROP_COLUMNS: [&str; 14] = [
    "Customer ID",
    "Country",
    "State",
    "City",
    "Zip Code",
    "Latitude",
    "Longitude",
    "Population",
    "Quarter",
    "Customer Status",
    "Churn Score",
    "Churn Category",
    "Churn Reason",
    "Satisfaction Score",
];

/// Model-ready view of the raw dataset.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Feature columns only.
    pub features: Frame,
    /// Label per row.
    pub target: Vec<Cell>,
    /// Free-text feature columns, file order.
    pub categorical: Vec<String>,
    /// Numeric feature columns, file order.
    pub numeric: Vec<String>,
}

impl Preprocessed {
    /// Label counts, most frequent first.
    #[must_use]
    pub fn target_distribution(&self) -> IndexMap<String, usize> {
        let mut counts: IndexMap<String, usize> = IndexMap::new();
        for label in self.target.iter().flatten() {
            *counts.entry(label.clone()).or_default() += 1;
        }
        counts.sort_by(|a_key, a_count, b_key, b_count| {
            b_count.cmp(a_count).then_with(|| a_key.cmp(b_key))
        });
        counts
    }
}

/// Splits off the target, drops unused columns and classifies the rest.
pub fn preprocess(frame: &Frame) -> Result<Preprocessed, DatasetError> {
    let mut features = frame.without_columns(&DROP_COLUMNS);
    let target = features
        .take_column(TARGET)
        .ok_or_else(|| DatasetError::MissingColumn(TARGET.to_string()))?;
    Ok(split_kinds(features, target))
}

/// Classifies feature columns of an already reduced frame.
#[must_use]
pub fn split_kinds(features: Frame, target: Vec<Cell>) -> Preprocessed {
    let mut categorical = Vec::new();
    let mut numeric = Vec::new();
    for name in features.column_names() {
        match features.kind(name) {
            Some(ColumnKind::Numeric) => numeric.push(name.to_string()),
            _ => categorical.push(name.to_string()),
        }
    }
    Preprocessed {
        features,
        target,
        categorical,
        numeric,
    }
}
