use serde::{Deserialize, Serialize};

use crate::stats::ProbabilityStats;

/// Threshold used when the caller does not pass one.
pub const DEFAULT_DRIFT_THRESHOLD: f64 = 0.1;

/// Outcome of comparing the served mean against a reference mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Whether the mean moved by more than the threshold.
    pub is_drift: bool,
    /// Caller-supplied baseline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_mean: Option<f64>,
    /// Mean of served probabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_mean: Option<f64>,
    /// Absolute difference of the two means.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_amount: Option<f64>,
    /// Threshold applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Observations behind `current_mean`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Why no comparison was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Statistics were unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DriftReport {
    fn empty() -> Self {
        Self {
            is_drift: false,
            reference_mean: None,
            current_mean: None,
            drift_amount: None,
            threshold: None,
            count: None,
            note: None,
            error: None,
        }
    }

    /// Report for when no statistics could be read.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::empty()
        }
    }
}

/// Compares the current mean with `reference_mean`.
///
/// Without a reference there is nothing to compare: the report only carries
/// the current mean and a note.
#[must_use]
pub fn check_drift(
    stats: &ProbabilityStats,
    reference_mean: Option<f64>,
    threshold: f64,
) -> DriftReport {
    let Some(reference) = reference_mean else {
        return DriftReport {
            current_mean: Some(stats.mean),
            note: Some("reference_mean not provided".into()),
            ..DriftReport::empty()
        };
    };
    let drift_amount = (stats.mean - reference).abs();
    let is_drift = drift_amount > threshold;
    if is_drift {
        tracing::warn!(
            reference_mean = reference,
            current_mean = stats.mean,
            drift_amount,
            threshold,
            "probability drift detected"
        );
    }
    DriftReport {
        is_drift,
        reference_mean: Some(reference),
        current_mean: Some(stats.mean),
        drift_amount: Some(drift_amount),
        threshold: Some(threshold),
        count: Some(stats.count),
        ..DriftReport::empty()
    }
}
