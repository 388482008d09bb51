//! HTTP route handlers.
//!
//! Prediction and metadata live at the root; monitoring reads live under
//! `/monitoring/`. All bodies are JSON.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use churn_model::{FeatureRow, FeatureSchema};
use churn_monitoring::{DriftReport, PredictionLogEntry, DEFAULT_DRIFT_THRESHOLD};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::service::{PredictError, Prediction};
use crate::state::{NotReady, SharedState};

/// Name reported by `/health`.
pub const SERVICE_NAME: &str = "churn-api";

/// Seed used to pick the `/sample` record.
pub const SAMPLE_SEED: u64 = 42;

const DEFAULT_PREDICTIONS_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// All service routes, awaiting state.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/predict", post(predict_handler))
        .route("/meta", get(meta_handler))
        .route("/sample", get(sample_handler))
        .route("/monitoring/stats", get(stats_handler))
        .route("/monitoring/drift", get(drift_handler))
        .route("/monitoring/predictions", get(predictions_handler))
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    environment: &'static str,
    model_loaded: bool,
    schema_ready: bool,
    ready: bool,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let model_loaded = state.model.is_some();
    let schema_ready = state.schema().is_ready();
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        environment: state.config.environment.as_str(),
        model_loaded,
        schema_ready,
        ready: model_loaded && schema_ready,
    })
}

// ---------------------------------------------------------------------------
// POST /predict
// ---------------------------------------------------------------------------

/// Request body for `/predict`.
#[derive(Debug, Deserialize)]
struct PredictRequest {
    /// Sparse feature map; missing keys take schema defaults.
    #[serde(default)]
    features: Map<String, Value>,
}

async fn predict_handler(
    State(state): State<SharedState>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<Prediction>, ApiError> {
    // Monitoring appends and the stats rename are blocking file I/O.
    let prediction = tokio::task::spawn_blocking(move || state.predict(&req.features))
        .await
        .map_err(|e| ApiError::internal(format!("prediction task failed: {e}")))??;
    Ok(Json(prediction))
}

// ---------------------------------------------------------------------------
// GET /meta, GET /sample
// ---------------------------------------------------------------------------

async fn meta_handler(State(state): State<SharedState>) -> Json<FeatureSchema> {
    Json(state.schema().clone())
}

#[derive(Debug, Serialize)]
struct SampleResponse {
    features: FeatureRow,
}

async fn sample_handler(
    State(state): State<SharedState>,
) -> Result<Json<SampleResponse>, ApiError> {
    let features = state
        .reference
        .features
        .as_ref()
        .and_then(|frame| state.schema().sample_record(frame, SAMPLE_SEED))
        .ok_or_else(|| {
            ApiError::unavailable(NotReady {
                missing: vec!["reference_data"],
            })
        })?;
    Ok(Json(SampleResponse { features }))
}

// ---------------------------------------------------------------------------
// GET /monitoring/*
// ---------------------------------------------------------------------------

async fn stats_handler(State(state): State<SharedState>) -> Response {
    let stats = match tokio::task::spawn_blocking(move || state.monitor.stats()).await {
        Ok(stats) => stats,
        Err(e) => {
            return ApiError::internal(format!("statistics task failed: {e}")).into_response();
        }
    };
    match stats {
        Ok(Some(stats)) => Json(stats).into_response(),
        Ok(None) => Json(json!({ "error": "statistics not found", "count": 0 })).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "statistics unreadable");
            Json(json!({ "error": format!("statistics unreadable: {err}"), "count": 0 }))
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriftQuery {
    reference_mean: Option<f64>,
    #[serde(default = "default_threshold")]
    threshold: f64,
}

async fn drift_handler(
    State(state): State<SharedState>,
    Query(query): Query<DriftQuery>,
) -> Result<Json<DriftReport>, ApiError> {
    let DriftQuery {
        reference_mean,
        threshold,
    } = query;
    let report =
        tokio::task::spawn_blocking(move || state.monitor.drift(reference_mean, threshold))
            .await
            .map_err(|e| ApiError::internal(format!("drift task failed: {e}")))?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct PredictionsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Serialize)]
struct PredictionsResponse {
    predictions: Vec<PredictionLogEntry>,
    count: usize,
}

async fn predictions_handler(
    State(state): State<SharedState>,
    Query(query): Query<PredictionsQuery>,
) -> Result<Json<PredictionsResponse>, ApiError> {
    let predictions = tokio::task::spawn_blocking(move || state.monitor.recent(query.limit))
        .await
        .map_err(|e| ApiError::internal(format!("prediction log task failed: {e}")))?
        .map_err(|e| ApiError::internal(format!("reading prediction log: {e}")))?;
    Ok(Json(PredictionsResponse {
        count: predictions.len(),
        predictions,
    }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const fn default_threshold() -> f64 {
    DEFAULT_DRIFT_THRESHOLD
}

const fn default_limit() -> usize {
    DEFAULT_PREDICTIONS_LIMIT
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Structured JSON error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    missing: Option<Vec<&'static str>>,
}

impl ApiError {
    fn unavailable(not_ready: NotReady) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "service not ready".into(),
            missing: Some(not_ready.missing),
        }
    }

    fn internal(message: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
            missing: None,
        }
    }
}

impl From<PredictError> for ApiError {
    fn from(err: PredictError) -> Self {
        match err {
            PredictError::NotReady(not_ready) => Self::unavailable(not_ready),
            PredictError::Model(err) => {
                tracing::error!(error = %err, "prediction failed");
                Self::internal(format!("prediction failed: {err}"))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.missing {
            Some(missing) => json!({ "error": self.message, "missing": missing }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use churn_model::{Classifier, ColumnGroup, FeatureValue, Frame, ModelError, ReferenceData};
    use churn_monitoring::Monitor;
    use indexmap::IndexMap;
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::{config::ServiceConfig, state::AppContext};

    /// Always answers "Yes" at 0.9 and remembers the last row it saw.
    #[derive(Default)]
    struct StubClassifier {
        seen: Mutex<Option<FeatureRow>>,
    }

    impl Classifier for StubClassifier {
        fn predict(&self, row: &FeatureRow) -> Result<String, ModelError> {
            *self.seen.lock().unwrap() = Some(row.clone());
            Ok("Yes".into())
        }

        fn predict_proba(&self, _row: &FeatureRow) -> Result<f64, ModelError> {
            Ok(0.9)
        }

        fn column_groups(&self) -> Vec<ColumnGroup> {
            vec![
                ColumnGroup::new("num", vec!["tenure".into()]),
                ColumnGroup::new("cat", vec!["Contract".into()]),
            ]
        }
    }

    fn reference() -> ReferenceData {
        let schema = FeatureSchema {
            expected_columns: vec!["tenure".into(), "Contract".into()],
            defaults: IndexMap::from([
                ("tenure".to_string(), FeatureValue::Number(12.0)),
                (
                    "Contract".to_string(),
                    FeatureValue::Text("Month-to-month".into()),
                ),
            ]),
            categorical_options: IndexMap::from([(
                "Contract".to_string(),
                vec!["Month-to-month".to_string(), "Two year".to_string()],
            )]),
        };
        let features = Frame::from_columns(vec![
            (
                "tenure".to_string(),
                vec![Some("3".to_string()), None, Some("40".to_string())],
            ),
            (
                "Contract".to_string(),
                vec![Some("Two year".to_string()), None, None],
            ),
        ])
        .unwrap();
        ReferenceData {
            schema,
            features: Some(features),
        }
    }

    /// Scores every row at 1.5, which the statistics tracker refuses.
    struct OutOfRangeClassifier;

    impl Classifier for OutOfRangeClassifier {
        fn predict(&self, _row: &FeatureRow) -> Result<String, ModelError> {
            Ok("Yes".into())
        }

        fn predict_proba(&self, _row: &FeatureRow) -> Result<f64, ModelError> {
            Ok(1.5)
        }

        fn column_groups(&self) -> Vec<ColumnGroup> {
            StubClassifier::default().column_groups()
        }
    }

    fn context(
        model: Option<Arc<StubClassifier>>,
        reference: ReferenceData,
    ) -> (TempDir, SharedState) {
        context_with(model.map(|m| m as Arc<dyn Classifier>), reference)
    }

    fn context_with(
        model: Option<Arc<dyn Classifier>>,
        reference: ReferenceData,
    ) -> (TempDir, SharedState) {
        let dir = tempdir().unwrap();
        let monitor = Monitor::open(dir.path().join("monitoring")).unwrap();
        let state = AppContext::from_parts(ServiceConfig::default(), model, reference, monitor);
        (dir, Arc::new(state))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn empty_request() -> Json<PredictRequest> {
        Json(PredictRequest {
            features: Map::new(),
        })
    }

    #[tokio::test]
    async fn empty_request_is_scored_with_defaults() {
        let stub = Arc::new(StubClassifier::default());
        let (_dir, state) = context(Some(Arc::clone(&stub)), reference());

        let Json(prediction) = predict_handler(State(state.clone()), empty_request())
            .await
            .unwrap();
        assert_eq!(prediction.label, "Yes");
        assert!((0.0..=1.0).contains(&prediction.probability));

        let row = stub.seen.lock().unwrap().clone().unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row["tenure"], FeatureValue::Number(12.0));
        assert_eq!(row["Contract"], FeatureValue::Text("Month-to-month".into()));

        let Json(logged) = predictions_handler(
            State(state),
            Query(PredictionsQuery { limit: 100 }),
        )
        .await
        .unwrap();
        assert_eq!(logged.count, 1);
        assert_eq!(logged.predictions[0].request.features_count, 0);
    }

    #[tokio::test]
    async fn missing_model_returns_503_with_missing_list() {
        let (_dir, state) = context(None, ReferenceData::default());
        let err = predict_handler(State(state.clone()), empty_request())
            .await
            .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["missing"], json!(["model", "schema"]));
        assert!(body["error"].is_string());

        let Json(health) = health_handler(State(state)).await;
        assert_eq!(health.status, "ok");
        assert!(!health.ready);
        assert!(!health.model_loaded);
    }

    #[tokio::test]
    async fn health_and_meta_describe_a_ready_service() {
        let (_dir, state) = context(Some(Arc::default()), reference());
        let Json(health) = health_handler(State(state.clone())).await;
        assert!(health.ready);
        assert_eq!(health.environment, "development");

        let Json(schema) = meta_handler(State(state)).await;
        let body = serde_json::to_value(&schema).unwrap();
        assert_eq!(body["expected_cols"], json!(["tenure", "Contract"]));
        assert_eq!(body["defaults"]["tenure"], json!(12.0));
        assert_eq!(body["categorical_options"]["Contract"][1], json!("Two year"));
    }

    #[tokio::test]
    async fn sample_is_deterministic_and_complete() {
        let (_dir, state) = context(Some(Arc::default()), reference());
        let Json(first) = sample_handler(State(state.clone())).await.unwrap();
        let Json(second) = sample_handler(State(state)).await.unwrap();
        assert_eq!(first.features, second.features);
        assert!(matches!(first.features["tenure"], FeatureValue::Number(_)));
        assert!(!first.features["Contract"].is_missing());

        let (_dir, bare) = context(Some(Arc::default()), ReferenceData::default());
        let err = sample_handler(State(bare)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn monitoring_endpoints_follow_served_predictions() {
        let (_dir, state) = context(Some(Arc::default()), reference());

        let empty = body_json(stats_handler(State(state.clone())).await).await;
        assert_eq!(empty["count"], json!(0));
        assert!(empty["error"].is_string());

        for _ in 0..3 {
            predict_handler(State(state.clone()), empty_request())
                .await
                .unwrap();
        }
        let stats = body_json(stats_handler(State(state.clone())).await).await;
        assert_eq!(stats["count"], json!(3));

        let drift = |reference_mean| DriftQuery {
            reference_mean: Some(reference_mean),
            threshold: DEFAULT_DRIFT_THRESHOLD,
        };
        let Json(report) = drift_handler(State(state.clone()), Query(drift(0.5)))
            .await
            .unwrap();
        assert!(report.is_drift);
        let Json(report) = drift_handler(State(state.clone()), Query(drift(0.89)))
            .await
            .unwrap();
        assert!(!report.is_drift);

        let Json(report) = drift_handler(
            State(state.clone()),
            Query(DriftQuery {
                reference_mean: None,
                threshold: DEFAULT_DRIFT_THRESHOLD,
            }),
        )
        .await
        .unwrap();
        assert!(!report.is_drift);
        assert!(report.note.is_some());

        let Json(recent) =
            predictions_handler(State(state), Query(PredictionsQuery { limit: 2 }))
                .await
                .unwrap();
        assert_eq!(recent.count, 2);
    }

    #[tokio::test]
    async fn monitoring_failure_does_not_fail_the_prediction() {
        let model: Arc<dyn Classifier> = Arc::new(OutOfRangeClassifier);
        let (_dir, state) = context_with(Some(model), reference());

        let Json(prediction) = predict_handler(State(state.clone()), empty_request())
            .await
            .unwrap();
        assert_eq!(prediction.label, "Yes");
        assert!((prediction.probability - 1.5).abs() < f64::EPSILON);

        let stats = body_json(stats_handler(State(state)).await).await;
        assert_eq!(stats["count"], json!(0));
        assert!(stats["error"].is_string());
    }
}
