use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Precision/recall/F1 for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// Class label.
    pub label: String,
    /// Precision.
    pub precision: f64,
    /// Recall.
    pub recall: f64,
    /// F1 score.
    pub f1_score: f64,
    /// True rows of this class.
    pub support: usize,
}

/// Averaged precision/recall/F1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageMetrics {
    /// Precision.
    pub precision: f64,
    /// Recall.
    pub recall: f64,
    /// F1 score.
    pub f1_score: f64,
    /// Rows averaged over.
    pub support: usize,
}

/// Headline metrics stored with a model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// Overall accuracy.
    pub accuracy: f64,
    /// Positive-class precision.
    pub precision: f64,
    /// Positive-class recall.
    pub recall: f64,
    /// Positive-class F1.
    pub f1_score: f64,
}

/// Per-class and averaged classification metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// One entry per class, in class order.
    pub classes: Vec<ClassMetrics>,
    /// Overall accuracy.
    pub accuracy: f64,
    /// Unweighted mean over classes.
    pub macro_avg: AverageMetrics,
    /// Support-weighted mean over classes.
    pub weighted_avg: AverageMetrics,
}

impl ClassificationReport {
    /// Scores predictions against the truth. Zero divisions score 0.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(classes: &[String], truth: &[String], predicted: &[String]) -> Self {
        let total = truth.len().min(predicted.len());
        let pairs = || truth.iter().zip(predicted);
        let per_class: Vec<ClassMetrics> = classes
            .iter()
            .map(|label| {
                let tp = pairs().filter(|(t, p)| *t == label && *p == label).count();
                let predicted_pos = pairs().filter(|(_, p)| *p == label).count();
                let support = pairs().filter(|(t, _)| *t == label).count();
                let precision = ratio(tp, predicted_pos);
                let recall = ratio(tp, support);
                let f1_score = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label: label.clone(),
                    precision,
                    recall,
                    f1_score,
                    support,
                }
            })
            .collect();
        let correct = pairs().filter(|(t, p)| t == p).count();
        Self {
            accuracy: ratio(correct, total),
            macro_avg: average(&per_class, |_| 1.0),
            weighted_avg: average(&per_class, |m| m.support as f64),
            classes: per_class,
        }
    }

    /// Metrics for one class.
    #[must_use]
    pub fn class(&self, label: &str) -> Option<&ClassMetrics> {
        self.classes.iter().find(|m| m.label == label)
    }

    /// Headline metrics for the given positive class.
    #[must_use]
    pub fn headline(&self, positive: &str) -> TrainingMetrics {
        let (precision, recall, f1_score) = self
            .class(positive)
            .map_or((0.0, 0.0, 0.0), |m| (m.precision, m.recall, m.f1_score));
        TrainingMetrics {
            accuracy: self.accuracy,
            precision,
            recall,
            f1_score,
        }
    }

    /// Text table in the familiar precision/recall/f1/support layout.
    #[must_use]
    pub fn render(&self) -> String {
        let width = self
            .classes
            .iter()
            .map(|m| m.label.len())
            .chain(["weighted avg".len()])
            .max()
            .unwrap_or(12);
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}\n",
            "", "precision", "recall", "f1-score", "support"
        );
        for m in &self.classes {
            let _ = writeln!(
                out,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                m.label, m.precision, m.recall, m.f1_score, m.support
            );
        }
        let support = self.macro_avg.support;
        let _ = writeln!(
            out,
            "\n{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, support
        );
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            let _ = writeln!(
                out,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, avg.precision, avg.recall, avg.f1_score, avg.support
            );
        }
        out
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn average(metrics: &[ClassMetrics], weight: impl Fn(&ClassMetrics) -> f64) -> AverageMetrics {
    let total: f64 = metrics.iter().map(&weight).sum();
    let mean = |field: fn(&ClassMetrics) -> f64| {
        if total > 0.0 {
            metrics.iter().map(|m| field(m) * weight(m)).sum::<f64>() / total
        } else {
            0.0
        }
    };
    AverageMetrics {
        precision: mean(|m| m.precision),
        recall: mean(|m| m.recall),
        f1_score: mean(|m| m.f1_score),
        support: metrics.iter().map(|m| m.support).sum(),
    }
}
