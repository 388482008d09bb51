use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::MonitoringError;

/// Running summary of served positive-class probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityStats {
    /// Observations so far.
    pub count: u64,
    /// Sum of observations.
    pub sum: f64,
    /// `sum / count`, 0 before the first observation.
    pub mean: f64,
    /// Smallest observation; starts at 1.0.
    pub min: f64,
    /// Largest observation; starts at 0.0.
    pub max: f64,
    /// Time of the last update.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ProbabilityStats {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            mean: 0.0,
            min: 1.0,
            max: 0.0,
            updated_at: None,
        }
    }
}

impl ProbabilityStats {
    /// Folds one observation into the summary.
    pub fn observe(&mut self, probability: f64, at: DateTime<Utc>) {
        self.count += 1;
        self.sum += probability;
        #[allow(clippy::cast_precision_loss)]
        let n = self.count as f64;
        self.mean = self.sum / n;
        self.min = self.min.min(probability);
        self.max = self.max.max(probability);
        self.updated_at = Some(at);
    }
}

/// Persists [`ProbabilityStats`] in a single JSON file.
///
/// Appends are serialized through an in-process lock and land via a sibling
/// temp file plus rename, so readers always see a complete document.
#[derive(Debug)]
pub struct StatsTracker {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl StatsTracker {
    /// Tracker backed by `path`; the file is created on first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persisted statistics; `None` when nothing has been recorded yet.
    pub fn read(&self) -> Result<Option<ProbabilityStats>, MonitoringError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(MonitoringError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Adds one probability and returns the updated summary.
    ///
    /// Missing or unreadable prior state restarts from zero.
    pub fn append(&self, probability: f64) -> Result<ProbabilityStats, MonitoringError> {
        if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
            return Err(MonitoringError::InvalidProbability(probability));
        }
        let _guard = self.write_lock.lock();
        let mut stats = match self.read() {
            Ok(stats) => stats.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "statistics unreadable, restarting from zero");
                ProbabilityStats::default()
            }
        };
        stats.observe(probability, Utc::now());
        self.write_atomic(&stats)?;
        Ok(stats)
    }

    fn write_atomic(&self, stats: &ProbabilityStats) -> Result<(), MonitoringError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| MonitoringError::Io { path, source }
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, serde_json::to_vec_pretty(stats)?).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))
    }
}
