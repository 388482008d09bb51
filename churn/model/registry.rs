use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    metrics::TrainingMetrics,
    pipeline::ModelError,
    train::{TrainConfig, TrainingOutcome},
};

/// File name of the artifact the server loads.
pub const SERVING_ARTIFACT: &str = "churn_model.json";

const VERSION_FORMAT: &str = "%Y%m%d%H%M%S";
const MODEL_PREFIX: &str = "churn_model_v";
const METADATA_SUFFIX: &str = "_metadata.json";

/// Descriptive record stored beside each model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// `YYYYMMDDHHMMSS` version tag.
    pub version: String,
    /// When the model was registered.
    pub training_date: DateTime<Utc>,
    /// Estimator family.
    pub model_type: String,
    /// Held-out metrics.
    pub metrics: TrainingMetrics,
    /// Settings used for fitting.
    pub hyperparameters: TrainConfig,
    /// Class labels, positive last.
    pub classes: Vec<String>,
    /// Scaled input columns.
    pub numeric_columns: Vec<String>,
    /// One-hot input columns.
    pub categorical_columns: Vec<String>,
    /// Rows used for fitting.
    pub train_rows: usize,
    /// Rows used for evaluation.
    pub test_rows: usize,
}

impl ModelMetadata {
    /// Describes a fitted model.
    #[must_use]
    pub fn new(
        version: String,
        training_date: DateTime<Utc>,
        outcome: &TrainingOutcome,
        config: &TrainConfig,
    ) -> Self {
        let pipeline = &outcome.pipeline;
        Self {
            version,
            training_date,
            model_type: "logistic_regression".into(),
            metrics: outcome.metrics.clone(),
            hyperparameters: config.clone(),
            classes: pipeline.classifier.classes.to_vec(),
            numeric_columns: pipeline.preprocess.num.columns.clone(),
            categorical_columns: pipeline.preprocess.cat.columns.clone(),
            train_rows: outcome.train_rows,
            test_rows: outcome.test_rows,
        }
    }
}

/// One registered version as found on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Version tag.
    pub version: String,
    /// Artifact path.
    pub model_file: PathBuf,
    /// Metadata path.
    pub metadata_file: PathBuf,
    /// Whether the metadata file exists.
    pub has_metadata: bool,
    /// Parsed metadata, when readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ModelMetadata>,
    /// Why the metadata could not be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_error: Option<String>,
}

/// Versioned model artifacts in one directory.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    dir: PathBuf,
}

impl ModelRegistry {
    /// Registry rooted at `dir`; nothing is touched until [`register`](Self::register).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Registry directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Version tag for a timestamp.
    #[must_use]
    pub fn version_for(at: DateTime<Utc>) -> String {
        at.format(VERSION_FORMAT).to_string()
    }

    /// First free version at or after `at`, one second apart.
    #[must_use]
    pub fn next_version(&self, at: DateTime<Utc>) -> String {
        let mut at = at;
        loop {
            let version = Self::version_for(at);
            if !self.model_path(&version).exists() {
                return version;
            }
            at += Duration::seconds(1);
        }
    }

    /// Artifact path for a version.
    #[must_use]
    pub fn model_path(&self, version: &str) -> PathBuf {
        self.dir.join(format!("{MODEL_PREFIX}{version}.json"))
    }

    /// Metadata path for a version.
    #[must_use]
    pub fn metadata_path(&self, version: &str) -> PathBuf {
        self.dir.join(format!("{MODEL_PREFIX}{version}{METADATA_SUFFIX}"))
    }

    /// Path of the artifact served by default.
    #[must_use]
    pub fn serving_path(&self) -> PathBuf {
        self.dir.join(SERVING_ARTIFACT)
    }

    /// Writes the versioned artifact, its metadata and the serving copy.
    pub fn register(
        &self,
        outcome: &TrainingOutcome,
        config: &TrainConfig,
        at: DateTime<Utc>,
    ) -> Result<ModelMetadata, RegistryError> {
        fs::create_dir_all(&self.dir).map_err(|source| RegistryError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let version = self.next_version(at);
        let metadata = ModelMetadata::new(version.clone(), at, outcome, config);

        outcome.pipeline.save(self.model_path(&version))?;
        let metadata_path = self.metadata_path(&version);
        let body = serde_json::to_vec_pretty(&metadata)?;
        fs::write(&metadata_path, body).map_err(|source| RegistryError::Io {
            path: metadata_path.clone(),
            source,
        })?;
        outcome.pipeline.save(self.serving_path())?;

        tracing::info!(
            version = %version,
            dir = %self.dir.display(),
            accuracy = metadata.metrics.accuracy,
            "model registered"
        );
        Ok(metadata)
    }

    /// Registered versions in ascending order.
    pub fn list(&self) -> Result<Vec<ModelEntry>, RegistryError> {
        if !self.dir.is_dir() {
            return Err(RegistryError::MissingDir(self.dir.clone()));
        }
        let read = fs::read_dir(&self.dir).map_err(|source| RegistryError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut versions: Vec<String> = read
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| version_of(&name).map(ToOwned::to_owned))
            .collect();
        versions.sort();
        Ok(versions.into_iter().map(|v| self.entry(v)).collect())
    }

    fn entry(&self, version: String) -> ModelEntry {
        let metadata_file = self.metadata_path(&version);
        let has_metadata = metadata_file.is_file();
        let (metadata, metadata_error) = if has_metadata {
            match read_metadata(&metadata_file) {
                Ok(metadata) => (Some(metadata), None),
                Err(err) => (None, Some(err.to_string())),
            }
        } else {
            (None, None)
        };
        ModelEntry {
            model_file: self.model_path(&version),
            version,
            metadata_file,
            has_metadata,
            metadata,
            metadata_error,
        }
    }
}

fn version_of(file_name: &str) -> Option<&str> {
    if file_name.ends_with(METADATA_SUFFIX) {
        return None;
    }
    file_name
        .strip_prefix(MODEL_PREFIX)?
        .strip_suffix(".json")
        .filter(|version| !version.is_empty())
}

fn read_metadata(path: &Path) -> Result<ModelMetadata, RegistryError> {
    let raw = fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Errors raised by the model registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Artifacts directory does not exist.
    #[error("artifacts directory {} not found", .0.display())]
    MissingDir(PathBuf),
    /// Filesystem failure.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Metadata could not be (de)serialized.
    #[error("metadata json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Artifact could not be written.
    #[error(transparent)]
    Model(#[from] ModelError),
}
