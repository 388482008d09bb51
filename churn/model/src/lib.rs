#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Churn model stack: tabular dataset loading, feature schema derivation,
//! request normalization, the serialized pipeline, training and the registry.

/// Feature cell values and JSON coercion.
#[path = "../value.rs"]
pub mod value;

/// CSV-backed column frame.
#[path = "../dataset.rs"]
pub mod dataset;

/// Target split and leakage-column removal.
#[path = "../preprocess.rs"]
pub mod preprocess;

/// Feature schema derivation.
#[path = "../schema.rs"]
pub mod schema;

/// Sparse request to complete model row.
#[path = "../normalize.rs"]
pub mod normalize;

/// Serialized pipeline and the classifier seam.
#[path = "../pipeline.rs"]
pub mod pipeline;

/// Classification metrics.
#[path = "../metrics.rs"]
pub mod metrics;

/// Pipeline fitting.
#[path = "../train.rs"]
pub mod train;

/// Versioned artifact storage.
#[path = "../registry.rs"]
pub mod registry;

pub use dataset::{Cell, ColumnKind, DatasetError, Frame};
pub use metrics::{ClassificationReport, TrainingMetrics};
pub use normalize::{cells_to_request, normalize};
pub use pipeline::{ChurnPipeline, Classifier, ModelError};
pub use preprocess::{preprocess, Preprocessed, TARGET};
pub use registry::{ModelEntry, ModelMetadata, ModelRegistry, RegistryError, SERVING_ARTIFACT};
pub use schema::{ColumnGroup, FeatureSchema, ReferenceData};
pub use train::{train, TrainConfig, TrainingOutcome};
pub use value::{FeatureRow, FeatureValue};
