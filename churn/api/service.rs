use churn_model::{normalize, Classifier, FeatureRow, FeatureSchema, ModelError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::state::{AppContext, NotReady};

/// Label and positive-class probability for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted class label.
    #[serde(rename = "pred_label")]
    pub label: String,
    /// Probability of the positive class.
    #[serde(rename = "pred_proba_yes")]
    pub probability: f64,
}

/// Why a prediction could not be served.
#[derive(Debug, Error)]
pub enum PredictError {
    /// Model or schema unavailable.
    #[error("service not ready: missing {}", .0.missing.join(", "))]
    NotReady(NotReady),
    /// The classifier rejected the normalized row.
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Normalizes `request` against `schema` and scores it.
pub fn score(
    model: &dyn Classifier,
    schema: &FeatureSchema,
    request: &Map<String, Value>,
) -> Result<(FeatureRow, Prediction), ModelError> {
    let row = normalize(schema, request);
    let label = model.predict(&row)?;
    let probability = model.predict_proba(&row)?;
    Ok((row, Prediction { label, probability }))
}

impl AppContext {
    /// Serves one prediction, then records it without letting monitoring fail the call.
    pub fn predict(&self, request: &Map<String, Value>) -> Result<Prediction, PredictError> {
        let (model, schema) = self.readiness().map_err(PredictError::NotReady)?;
        let (row, prediction) = score(model, schema, request)?;
        tracing::debug!(
            supplied = request.len(),
            columns = row.len(),
            label = %prediction.label,
            "prediction served"
        );
        self.record_best_effort(request.len(), &prediction);
        Ok(prediction)
    }

    /// Appends to the prediction log and statistics; failures only warn.
    pub fn record_best_effort(&self, features_count: usize, prediction: &Prediction) {
        if let Err(err) = self.monitor.record_prediction(
            features_count,
            &prediction.label,
            prediction.probability,
        ) {
            tracing::warn!(error = %err, "monitoring update failed");
        }
    }
}
