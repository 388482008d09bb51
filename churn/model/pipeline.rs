use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    schema::ColumnGroup,
    value::{FeatureRow, FeatureValue},
};

/// Opaque binary classifier consumed by the serving layer.
pub trait Classifier: Send + Sync {
    /// Predicted class label for one normalized row.
    fn predict(&self, row: &FeatureRow) -> Result<String, ModelError>;

    /// Probability of the positive class for one normalized row.
    fn predict_proba(&self, row: &FeatureRow) -> Result<f64, ModelError>;

    /// Per-transformer input column groupings of the fitted pipeline.
    fn column_groups(&self) -> Vec<ColumnGroup>;
}

/// Standardizes numeric columns; missing inputs take the stored fill value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Input columns.
    pub columns: Vec<String>,
    /// Training means.
    pub means: Vec<f64>,
    /// Training standard deviations (1.0 for constant columns).
    pub scales: Vec<f64>,
    /// Training medians used for missing cells.
    pub fill_values: Vec<f64>,
}

impl StandardScaler {
    fn transform_into(&self, row: &FeatureRow, out: &mut Vec<f64>) -> Result<(), ModelError> {
        for (idx, column) in self.columns.iter().enumerate() {
            let raw = match row.get(column) {
                None | Some(FeatureValue::Missing) => self.fill_values[idx],
                Some(value) => value.as_f64().ok_or_else(|| ModelError::NonNumeric {
                    column: column.clone(),
                })?,
            };
            out.push((raw - self.means[idx]) / self.scales[idx]);
        }
        Ok(())
    }
}

/// One-hot encodes categorical columns; unknown and missing values encode as zeros.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    /// Input columns.
    pub columns: Vec<String>,
    /// Sorted categories per column.
    pub categories: Vec<Vec<String>>,
}

impl OneHotEncoder {
    /// Output width.
    #[must_use]
    pub fn width(&self) -> usize {
        self.categories.iter().map(Vec::len).sum()
    }

    fn transform_into(&self, row: &FeatureRow, out: &mut Vec<f64>) {
        for (column, categories) in self.columns.iter().zip(&self.categories) {
            let text = match row.get(column) {
                Some(FeatureValue::Text(text)) => Some(text.clone()),
                Some(FeatureValue::Number(number)) => Some(number.to_string()),
                _ => None,
            };
            let hit = text.and_then(|t| categories.binary_search(&t).ok());
            out.extend((0..categories.len()).map(|i| if Some(i) == hit { 1.0 } else { 0.0 }));
        }
    }
}

/// Numeric scaler and categorical encoder applied side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTransformer {
    /// Numeric branch.
    pub num: StandardScaler,
    /// Categorical branch.
    pub cat: OneHotEncoder,
}

impl ColumnTransformer {
    /// Encodes a row into the model's design vector.
    pub fn transform(&self, row: &FeatureRow) -> Result<Vec<f64>, ModelError> {
        let mut out = Vec::with_capacity(self.width());
        self.num.transform_into(row, &mut out)?;
        self.cat.transform_into(row, &mut out);
        Ok(out)
    }

    /// Design vector width.
    #[must_use]
    pub fn width(&self) -> usize {
        self.num.columns.len() + self.cat.width()
    }
}

/// Binary logistic regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Sorted class labels; the second is the positive class.
    pub classes: [String; 2],
    /// Coefficients, one per design column.
    pub weights: Vec<f64>,
    /// Bias term.
    pub intercept: f64,
}

impl LogisticRegression {
    /// Probability of the positive class for a design vector.
    pub fn probability(&self, x: &[f64]) -> Result<f64, ModelError> {
        if x.len() != self.weights.len() {
            return Err(ModelError::ShapeMismatch {
                expected: self.weights.len(),
                actual: x.len(),
            });
        }
        Ok(sigmoid(dot(&self.weights, x) + self.intercept))
    }

    /// Label for a positive-class probability.
    #[must_use]
    pub fn label_for(&self, probability: f64) -> &str {
        if probability > 0.5 {
            &self.classes[1]
        } else {
            &self.classes[0]
        }
    }
}

/// Serialized churn model: preprocessing followed by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnPipeline {
    /// Preprocessing step.
    pub preprocess: ColumnTransformer,
    /// Classification step.
    pub classifier: LogisticRegression,
}

impl ChurnPipeline {
    /// Loads an artifact written by [`ChurnPipeline::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let pipeline: Self = serde_json::from_str(&raw)?;
        pipeline.validate()?;
        Ok(pipeline)
    }

    /// Checks that every fitted parameter lines up with its columns.
    pub fn validate(&self) -> Result<(), ModelError> {
        let num = &self.preprocess.num;
        for fitted in [&num.means, &num.scales, &num.fill_values] {
            ensure_len(num.columns.len(), fitted.len())?;
        }
        if let Some((column, scale)) = num
            .columns
            .iter()
            .zip(&num.scales)
            .find(|(_, scale)| !scale.is_finite() || **scale == 0.0)
        {
            return Err(ModelError::InvalidScale {
                column: column.clone(),
                scale: *scale,
            });
        }
        let cat = &self.preprocess.cat;
        ensure_len(cat.columns.len(), cat.categories.len())?;
        ensure_len(self.classifier.weights.len(), self.preprocess.width())
    }

    /// Writes the artifact as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let path = path.as_ref();
        let io_err = |source: std::io::Error| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?).map_err(io_err)
    }
}

impl Classifier for ChurnPipeline {
    fn predict(&self, row: &FeatureRow) -> Result<String, ModelError> {
        let probability = self.predict_proba(row)?;
        Ok(self.classifier.label_for(probability).to_string())
    }

    fn predict_proba(&self, row: &FeatureRow) -> Result<f64, ModelError> {
        let x = self.preprocess.transform(row)?;
        self.classifier.probability(&x)
    }

    fn column_groups(&self) -> Vec<ColumnGroup> {
        vec![
            ColumnGroup::new("num", self.preprocess.num.columns.clone()),
            ColumnGroup::new("cat", self.preprocess.cat.columns.clone()),
        ]
    }
}

fn ensure_len(expected: usize, actual: usize) -> Result<(), ModelError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ModelError::ShapeMismatch { expected, actual })
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Errors raised by the model artifact.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Artifact could not be read or written.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// Artifact path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Artifact is not valid JSON for this model.
    #[error("artifact json error: {0}")]
    Json(#[from] serde_json::Error),
    /// A numeric column received text.
    #[error("column `{column}` is not numeric")]
    NonNumeric {
        /// Offending column.
        column: String,
    },
    /// Design vector width does not match the coefficients.
    #[error("expected {expected} features, got {actual}")]
    ShapeMismatch {
        /// Coefficient count.
        expected: usize,
        /// Encoded width.
        actual: usize,
    },
    /// A stored scale would divide by zero or is not finite.
    #[error("column `{column}` has invalid scale {scale}")]
    InvalidScale {
        /// Offending column.
        column: String,
        /// Stored scale.
        scale: f64,
    },
    /// Training data unusable.
    #[error("training failed: {0}")]
    Training(String),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) fn toy_pipeline() -> ChurnPipeline {
        ChurnPipeline {
            preprocess: ColumnTransformer {
                num: StandardScaler {
                    columns: vec!["tenure".into()],
                    means: vec![20.0],
                    scales: vec![10.0],
                    fill_values: vec![12.0],
                },
                cat: OneHotEncoder {
                    columns: vec!["Contract".into()],
                    categories: vec![vec!["Month-to-month".into(), "Two year".into()]],
                },
            },
            classifier: LogisticRegression {
                classes: ["No".into(), "Yes".into()],
                weights: vec![-2.0, 1.5, -1.5],
                intercept: 0.0,
            },
        }
    }

    fn row(tenure: FeatureValue, contract: &str) -> FeatureRow {
        FeatureRow::from([
            ("tenure".to_string(), tenure),
            ("Contract".to_string(), FeatureValue::Text(contract.into())),
        ])
    }

    #[test]
    fn short_monthly_contracts_churn() {
        let model = toy_pipeline();
        let risky = row(FeatureValue::Number(2.0), "Month-to-month");
        let safe = row(FeatureValue::Number(60.0), "Two year");
        assert_eq!(model.predict(&risky).unwrap(), "Yes");
        assert_eq!(model.predict(&safe).unwrap(), "No");
        let p = model.predict_proba(&risky).unwrap();
        assert!((0.0..=1.0).contains(&p) && p > 0.9);
    }

    #[test]
    fn unknown_category_and_missing_numeric_are_tolerated() {
        let model = toy_pipeline();
        let x = model
            .preprocess
            .transform(&row(FeatureValue::Missing, "Fortnightly"))
            .unwrap();
        assert_eq!(x, vec![-0.8, 0.0, 0.0]);
        let err = model
            .predict_proba(&row(FeatureValue::Text("many".into()), "Two year"))
            .unwrap_err();
        assert!(matches!(err, ModelError::NonNumeric { column } if column == "tenure"));
    }

    #[test]
    fn exposes_transformer_groups() {
        let groups = toy_pipeline().column_groups();
        assert_eq!(groups[0], ColumnGroup::new("num", vec!["tenure".into()]));
        assert_eq!(groups[1], ColumnGroup::new("cat", vec!["Contract".into()]));
    }

    #[test]
    fn artifact_survives_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artifacts/churn_model.json");
        let model = toy_pipeline();
        model.save(&path).unwrap();
        assert_eq!(ChurnPipeline::load(&path).unwrap(), model);

        let mut broken = model;
        broken.classifier.weights.pop();
        broken.save(&path).unwrap();
        assert!(matches!(
            ChurnPipeline::load(&path),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn misaligned_scaler_is_rejected_at_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("churn_model.json");
        let cases: [fn(&mut ChurnPipeline); 3] = [
            |m| m.preprocess.num.means.clear(),
            |m| m.preprocess.num.scales.clear(),
            |m| m.preprocess.num.fill_values.clear(),
        ];
        for corrupt in cases {
            let mut model = toy_pipeline();
            corrupt(&mut model);
            model.save(&path).unwrap();
            assert!(matches!(
                ChurnPipeline::load(&path),
                Err(ModelError::ShapeMismatch { expected: 1, actual: 0 })
            ));
        }
    }

    #[test]
    fn misaligned_encoder_is_rejected_at_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("churn_model.json");
        let mut model = toy_pipeline();
        model.preprocess.cat.columns.push("Internet Type".into());
        model.save(&path).unwrap();
        assert!(matches!(
            ChurnPipeline::load(&path),
            Err(ModelError::ShapeMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn zero_or_infinite_scale_is_rejected() {
        for scale in [0.0, f64::INFINITY] {
            let mut model = toy_pipeline();
            model.preprocess.num.scales = vec![scale];
            assert!(matches!(
                model.validate(),
                Err(ModelError::InvalidScale { column, .. }) if column == "tenure"
            ));
        }
        assert!(toy_pipeline().validate().is_ok());
    }
}
