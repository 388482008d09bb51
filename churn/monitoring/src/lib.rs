#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Best-effort prediction monitoring: a JSON-lines prediction log, running
//! probability statistics and a mean-shift drift check.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Running probability statistics.
#[path = "../stats.rs"]
pub mod stats;

/// Mean-shift drift check.
#[path = "../drift.rs"]
pub mod drift;

/// Prediction log.
#[path = "../prediction_log.rs"]
pub mod prediction_log;

pub use drift::{check_drift, DriftReport, DEFAULT_DRIFT_THRESHOLD};
pub use prediction_log::{PredictionLog, PredictionLogEntry};
pub use stats::{ProbabilityStats, StatsTracker};

/// File name of the prediction log inside the monitoring directory.
pub const PREDICTIONS_LOG: &str = "predictions.log";
/// File name of the statistics document inside the monitoring directory.
pub const PROBABILITY_STATS: &str = "probability_stats.json";

/// Errors raised by monitoring storage.
#[derive(Debug, Error)]
pub enum MonitoringError {
    /// Filesystem failure.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Stored JSON could not be (de)serialized.
    #[error("monitoring json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Probability outside `[0, 1]` or not finite.
    #[error("probability {0} is not a finite value in [0, 1]")]
    InvalidProbability(f64),
    /// Prediction log writer failure.
    #[error(transparent)]
    Log(#[from] anyhow::Error),
}

/// Prediction log and statistics sharing one monitoring directory.
#[derive(Debug)]
pub struct Monitor {
    dir: PathBuf,
    log: PredictionLog,
    stats: StatsTracker,
}

impl Monitor {
    /// Opens the monitoring directory, creating it when absent.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, MonitoringError> {
        let dir = dir.as_ref().to_path_buf();
        Ok(Self {
            log: PredictionLog::open(dir.join(PREDICTIONS_LOG))?,
            stats: StatsTracker::new(dir.join(PROBABILITY_STATS)),
            dir,
        })
    }

    /// Monitoring directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Logs a served prediction and folds its probability into the statistics.
    pub fn record_prediction(
        &self,
        features_count: usize,
        label: &str,
        probability: f64,
    ) -> Result<ProbabilityStats, MonitoringError> {
        self.log
            .record(&PredictionLogEntry::new(features_count, label, probability))?;
        self.stats.append(probability)
    }

    /// Current statistics, `None` before the first prediction.
    pub fn stats(&self) -> Result<Option<ProbabilityStats>, MonitoringError> {
        self.stats.read()
    }

    /// Drift report against an optional reference mean.
    #[must_use]
    pub fn drift(&self, reference_mean: Option<f64>, threshold: f64) -> DriftReport {
        match self.stats.read() {
            Ok(Some(stats)) => check_drift(&stats, reference_mean, threshold),
            Ok(None) => DriftReport::unavailable("statistics not found"),
            Err(err) => DriftReport::unavailable(format!("statistics unreadable: {err}")),
        }
    }

    /// Most recent log entries, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<PredictionLogEntry>, MonitoringError> {
        self.log.recent(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn records_predictions_end_to_end() {
        let dir = tempdir().unwrap();
        let monitor = Monitor::open(dir.path().join("monitoring")).unwrap();
        assert_eq!(monitor.stats().unwrap(), None);
        assert!(monitor.drift(Some(0.5), 0.1).error.is_some());

        for _ in 0..3 {
            monitor.record_prediction(4, "Yes", 0.9).unwrap();
        }
        let stats = monitor.stats().unwrap().unwrap();
        assert_eq!(stats.count, 3);
        assert!(monitor.drift(Some(0.5), 0.1).is_drift);
        assert!(!monitor.drift(Some(0.89), 0.1).is_drift);
        assert_eq!(monitor.recent(100).unwrap().len(), 3);
        assert!(dir.path().join("monitoring").join(PROBABILITY_STATS).is_file());
    }

    #[test]
    fn invalid_probability_is_logged_but_not_counted() {
        let dir = tempdir().unwrap();
        let monitor = Monitor::open(dir.path()).unwrap();
        assert!(monitor.record_prediction(1, "No", 2.0).is_err());
        assert_eq!(monitor.stats().unwrap(), None);
    }
}
