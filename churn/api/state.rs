//! Process-wide context built once at startup and shared read-only with handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use churn_model::{ChurnPipeline, Classifier, FeatureSchema, ReferenceData};
use churn_monitoring::Monitor;

use crate::config::ServiceConfig;

/// Everything a request handler needs. Immutable after construction.
pub struct AppContext {
    /// Settings the process started with.
    pub config: ServiceConfig,
    /// Loaded classifier, absent when no artifact was found.
    pub model: Option<Arc<dyn Classifier>>,
    /// Schema and cached reference features.
    pub reference: ReferenceData,
    /// Prediction log and statistics.
    pub monitor: Monitor,
}

/// Type alias used in axum handlers.
pub type SharedState = Arc<AppContext>;

/// Dependencies that are missing for serving predictions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotReady {
    /// `"model"` and/or `"schema"`.
    pub missing: Vec<&'static str>,
}

impl AppContext {
    /// Loads the model, derives the schema and opens monitoring storage.
    ///
    /// A missing model file or dataset leaves the service running but not
    /// ready. A present but unreadable artifact or dataset is an error.
    pub fn bootstrap(config: ServiceConfig) -> Result<Self> {
        let model: Option<Arc<dyn Classifier>> = if config.model_path.is_file() {
            let pipeline = ChurnPipeline::load(&config.model_path)
                .with_context(|| format!("loading model {}", config.model_path.display()))?;
            tracing::info!(path = %config.model_path.display(), "model loaded");
            let pipeline: Arc<dyn Classifier> = Arc::new(pipeline);
            Some(pipeline)
        } else {
            tracing::warn!(path = %config.model_path.display(), "model artifact missing, serving degraded");
            None
        };

        let reference = match &model {
            Some(model) => ReferenceData::load(&model.column_groups(), &config.dataset_path)
                .with_context(|| {
                    format!("deriving schema from {}", config.dataset_path.display())
                })?,
            None => ReferenceData::default(),
        };
        if reference.schema.is_ready() {
            tracing::info!(
                columns = reference.schema.expected_columns.len(),
                "feature schema derived"
            );
        }

        let monitor = Monitor::open(&config.monitoring_dir).with_context(|| {
            format!("opening monitoring dir {}", config.monitoring_dir.display())
        })?;

        Ok(Self::from_parts(config, model, reference, monitor))
    }

    /// Assembles a context from already-built parts.
    #[must_use]
    pub fn from_parts(
        config: ServiceConfig,
        model: Option<Arc<dyn Classifier>>,
        reference: ReferenceData,
        monitor: Monitor,
    ) -> Self {
        Self {
            config,
            model,
            reference,
            monitor,
        }
    }

    /// Feature schema; empty when not derived.
    #[must_use]
    pub fn schema(&self) -> &FeatureSchema {
        &self.reference.schema
    }

    /// Model and schema, or the list of what is missing.
    pub fn readiness(&self) -> Result<(&dyn Classifier, &FeatureSchema), NotReady> {
        let schema = self.schema();
        match (&self.model, schema.is_ready()) {
            (Some(model), true) => Ok((model.as_ref(), schema)),
            (model, schema_ready) => {
                let mut missing = Vec::new();
                if model.is_none() {
                    missing.push("model");
                }
                if !schema_ready {
                    missing.push("schema");
                }
                Err(NotReady { missing })
            }
        }
    }
}
