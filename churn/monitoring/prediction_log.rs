use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_logging::{read_tail, JsonLinesWriter};
use uuid::Uuid;

use crate::MonitoringError;

/// Request side of a logged prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    /// Number of keys the caller supplied.
    pub features_count: usize,
}

/// Response side of a logged prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSummary {
    /// Predicted label.
    pub pred_label: String,
    /// Positive-class probability.
    pub pred_proba_yes: f64,
}

/// One line of the prediction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionLogEntry {
    /// Correlates the entry with request traces.
    #[serde(default)]
    pub request_id: Uuid,
    /// When the prediction was served.
    pub timestamp: DateTime<Utc>,
    /// What was asked.
    pub request: RequestSummary,
    /// What was answered.
    pub response: ResponseSummary,
}

impl PredictionLogEntry {
    /// Entry stamped now with a fresh id.
    #[must_use]
    pub fn new(features_count: usize, label: impl Into<String>, probability: f64) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            request: RequestSummary { features_count },
            response: ResponseSummary {
                pred_label: label.into(),
                pred_proba_yes: probability,
            },
        }
    }
}

/// Append-only JSON-lines log of served predictions.
#[derive(Debug)]
pub struct PredictionLog {
    writer: JsonLinesWriter,
}

impl PredictionLog {
    /// Opens (or creates) the log file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MonitoringError> {
        Ok(Self {
            writer: JsonLinesWriter::open(path)?,
        })
    }

    /// Appends one entry.
    pub fn record(&self, entry: &PredictionLogEntry) -> Result<(), MonitoringError> {
        self.writer.append(entry)?;
        tracing::info!(
            request_id = %entry.request_id,
            label = %entry.response.pred_label,
            probability = entry.response.pred_proba_yes,
            "prediction logged"
        );
        Ok(())
    }

    /// Last `limit` readable entries, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<PredictionLogEntry>, MonitoringError> {
        Ok(read_tail(self.writer.path(), limit)?)
    }

    /// Log file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.writer.path()
    }
}
