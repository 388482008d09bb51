//! Fits the churn pipeline: stratified split, scaler and encoder fitted on the
//! training partition, then L2-regularized logistic regression by full-batch
//! gradient descent.

use std::collections::BTreeSet;

use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    dataset::{Cell, Frame},
    metrics::{ClassificationReport, TrainingMetrics},
    pipeline::{
        dot, sigmoid, ChurnPipeline, Classifier, ColumnTransformer, LogisticRegression, ModelError,
        OneHotEncoder, StandardScaler,
    },
    preprocess::Preprocessed,
    schema::numeric_median,
    value::{parse_finite, FeatureRow, FeatureValue},
};

/// Training hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Share of each class held out for evaluation.
    pub test_size: f64,
    /// Split seed.
    pub seed: u64,
    /// Gradient descent iteration cap.
    pub max_iter: usize,
    /// Step size.
    pub learning_rate: f64,
    /// Inverse regularization strength.
    pub c: f64,
    /// Stops once every gradient component is below this.
    pub tolerance: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            seed: 42,
            max_iter: 1000,
            learning_rate: 0.1,
            c: 1.0,
            tolerance: 1e-4,
        }
    }
}

/// Fitted pipeline plus its held-out evaluation.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// Fitted model.
    pub pipeline: ChurnPipeline,
    /// Test-partition report.
    pub report: ClassificationReport,
    /// Headline metrics for the positive class.
    pub metrics: TrainingMetrics,
    /// Rows used for fitting.
    pub train_rows: usize,
    /// Rows used for evaluation.
    pub test_rows: usize,
    /// Iterations actually run.
    pub iterations: usize,
}

/// Train/test row indices, each sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// Training rows.
    pub train: Vec<usize>,
    /// Held-out rows.
    pub test: Vec<usize>,
}

/// Splits row indices so each label keeps its share in both partitions.
///
/// Every class with at least two rows keeps one row in training.
#[must_use]
pub fn stratified_split(labels: &[String], test_size: f64, seed: u64) -> Split {
    let classes: BTreeSet<&str> = labels.iter().map(String::as_str).collect();
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut split = Split {
        train: Vec::new(),
        test: Vec::new(),
    };
    for class in classes {
        let mut rows: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, label)| label.as_str() == class)
            .map(|(idx, _)| idx)
            .collect();
        rows.shuffle(&mut rng);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let mut held_out = (rows.len() as f64 * test_size).round() as usize;
        if rows.len() > 1 {
            held_out = held_out.min(rows.len() - 1);
        }
        split.test.extend_from_slice(&rows[..held_out]);
        split.train.extend_from_slice(&rows[held_out..]);
    }
    split.train.sort_unstable();
    split.test.sort_unstable();
    split
}

/// Fits and evaluates a pipeline on preprocessed data.
pub fn train(data: &Preprocessed, config: &TrainConfig) -> Result<TrainingOutcome, ModelError> {
    if !(config.test_size > 0.0 && config.test_size < 1.0) {
        return Err(ModelError::Training(format!(
            "test_size must be in (0, 1), got {}",
            config.test_size
        )));
    }

    let labelled: Vec<usize> = data
        .target
        .iter()
        .enumerate()
        .filter_map(|(idx, label)| label.as_ref().map(|_| idx))
        .collect();
    let dropped = data.target.len() - labelled.len();
    if dropped > 0 {
        tracing::warn!(dropped, "rows without a label skipped");
    }
    let labels: Vec<String> = labelled
        .iter()
        .filter_map(|idx| data.target[*idx].clone())
        .collect();
    let classes = binary_classes(&labels)?;

    let split = stratified_split(&labels, config.test_size, config.seed);
    let pick = |positions: &[usize]| -> Vec<usize> {
        positions.iter().map(|p| labelled[*p]).collect()
    };
    let train_frame = data.features.select_rows(&pick(&split.train));
    let test_frame = data.features.select_rows(&pick(&split.test));
    let train_labels: Vec<&String> = split.train.iter().map(|p| &labels[*p]).collect();
    let test_labels: Vec<String> = split.test.iter().map(|p| labels[*p].clone()).collect();

    let preprocess = ColumnTransformer {
        num: fit_scaler(&train_frame, &data.numeric),
        cat: fit_encoder(&train_frame, &data.categorical),
    };
    let rows = feature_rows(&train_frame, &data.numeric);
    let design = rows
        .iter()
        .map(|row| preprocess.transform(row))
        .collect::<Result<Vec<_>, _>>()?;
    let targets: Vec<f64> = train_labels
        .iter()
        .map(|label| if **label == classes[1] { 1.0 } else { 0.0 })
        .collect();

    tracing::info!(
        train_rows = design.len(),
        test_rows = test_labels.len(),
        width = preprocess.width(),
        "fitting logistic regression"
    );
    let (weights, intercept, iterations) = gradient_descent(&design, &targets, config);
    let pipeline = ChurnPipeline {
        preprocess,
        classifier: LogisticRegression {
            classes: classes.clone(),
            weights,
            intercept,
        },
    };

    let predicted = feature_rows(&test_frame, &data.numeric)
        .iter()
        .map(|row| pipeline.predict(row))
        .collect::<Result<Vec<_>, _>>()?;
    let report = ClassificationReport::compute(&classes, &test_labels, &predicted);
    let metrics = report.headline(&classes[1]);
    tracing::info!(
        accuracy = metrics.accuracy,
        f1 = metrics.f1_score,
        iterations,
        "training complete"
    );

    Ok(TrainingOutcome {
        pipeline,
        report,
        metrics,
        train_rows: design.len(),
        test_rows: test_labels.len(),
        iterations,
    })
}

fn binary_classes(labels: &[String]) -> Result<[String; 2], ModelError> {
    let distinct: BTreeSet<&String> = labels.iter().collect();
    let mut iter = distinct.iter();
    match (iter.next(), iter.next(), iter.next()) {
        (Some(negative), Some(positive), None) => Ok([(*negative).clone(), (*positive).clone()]),
        _ => Err(ModelError::Training(format!(
            "target must have exactly two classes, found {}",
            distinct.len()
        ))),
    }
}

fn fit_scaler(frame: &Frame, columns: &[String]) -> StandardScaler {
    let mut scaler = StandardScaler {
        columns: columns.to_vec(),
        means: Vec::with_capacity(columns.len()),
        scales: Vec::with_capacity(columns.len()),
        fill_values: Vec::with_capacity(columns.len()),
    };
    for name in columns {
        let cells = frame.column(name).unwrap_or_default();
        let fill = numeric_median(cells).unwrap_or(0.0);
        let values: Vec<f64> = cells
            .iter()
            .map(|cell| cell.as_deref().and_then(parse_finite).unwrap_or(fill))
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let n = values.len().max(1) as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        scaler.fill_values.push(fill);
        scaler.means.push(mean);
        scaler.scales.push(if std > 0.0 { std } else { 1.0 });
    }
    scaler
}

fn fit_encoder(frame: &Frame, columns: &[String]) -> OneHotEncoder {
    OneHotEncoder {
        columns: columns.to_vec(),
        categories: columns
            .iter()
            .map(|name| {
                frame
                    .column(name)
                    .unwrap_or_default()
                    .iter()
                    .flatten()
                    .cloned()
                    .collect::<BTreeSet<String>>()
                    .into_iter()
                    .collect()
            })
            .collect(),
    }
}

/// Typed rows from a frame: numeric columns parse to numbers, the rest stay text.
#[must_use]
pub fn feature_rows(frame: &Frame, numeric: &[String]) -> Vec<FeatureRow> {
    (0..frame.n_rows())
        .filter_map(|idx| frame.row(idx))
        .map(|row| {
            row.into_iter()
                .map(|(name, cell)| {
                    let value = typed_cell(numeric.contains(&name), cell);
                    (name, value)
                })
                .collect()
        })
        .collect()
}

fn typed_cell(numeric: bool, cell: Cell) -> FeatureValue {
    match cell {
        None => FeatureValue::Missing,
        Some(text) if numeric => {
            parse_finite(&text).map_or(FeatureValue::Missing, FeatureValue::Number)
        }
        Some(text) => FeatureValue::Text(text),
    }
}

fn gradient_descent(x: &[Vec<f64>], y: &[f64], config: &TrainConfig) -> (Vec<f64>, f64, usize) {
    let width = x.first().map_or(0, Vec::len);
    let mut weights = vec![0.0; width];
    let mut intercept = 0.0;
    if x.is_empty() {
        return (weights, intercept, 0);
    }
    #[allow(clippy::cast_precision_loss)]
    let n = x.len() as f64;
    let penalty = 1.0 / (config.c * n);

    let mut iterations = 0;
    while iterations < config.max_iter {
        iterations += 1;
        let mut grad_w: Vec<f64> = weights.iter().map(|w| w * penalty).collect();
        let mut grad_b = 0.0;
        for (row, target) in x.iter().zip(y) {
            let err = sigmoid(dot(&weights, row) + intercept) - target;
            for (g, v) in grad_w.iter_mut().zip(row) {
                *g += err * v / n;
            }
            grad_b += err / n;
        }
        for (w, g) in weights.iter_mut().zip(&grad_w) {
            *w -= config.learning_rate * g;
        }
        intercept -= config.learning_rate * grad_b;

        let largest = grad_w.iter().fold(grad_b.abs(), |acc, g| acc.max(g.abs()));
        if largest < config.tolerance {
            break;
        }
    }
    (weights, intercept, iterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::split_kinds;

    fn labels(yes: usize, no: usize) -> Vec<String> {
        std::iter::repeat("Yes".to_string())
            .take(yes)
            .chain(std::iter::repeat("No".to_string()).take(no))
            .collect()
    }

    fn separable(n: usize) -> Preprocessed {
        let tenure = (0..n).map(|i| Some(i.to_string())).collect();
        let contract = (0..n)
            .map(|i| Some(if i % 3 == 0 { "Two year" } else { "Month-to-month" }.to_string()))
            .collect();
        let target = (0..n)
            .map(|i| Some(if i < n * 3 / 10 { "Yes" } else { "No" }.to_string()))
            .collect();
        let frame = Frame::from_columns(vec![
            ("tenure".to_string(), tenure),
            ("Contract".to_string(), contract),
        ])
        .unwrap();
        split_kinds(frame, target)
    }

    #[test]
    fn split_keeps_class_proportions() {
        let labels = labels(30, 70);
        let split = stratified_split(&labels, 0.2, 42);
        assert_eq!(split.test.len(), 20);
        assert_eq!(split.train.len(), 80);
        let test_yes = split.test.iter().filter(|i| labels[**i] == "Yes").count();
        assert_eq!(test_yes, 6);
        assert_eq!(split, stratified_split(&labels, 0.2, 42));
    }

    #[test]
    fn singleton_class_stays_in_training() {
        let labels = labels(1, 9);
        let split = stratified_split(&labels, 0.2, 7);
        assert!(split.train.contains(&0));
    }

    #[test]
    fn learns_separable_data() {
        let data = separable(200);
        let outcome = train(&data, &TrainConfig::default()).unwrap();
        assert_eq!(outcome.pipeline.classifier.classes, ["No".to_string(), "Yes".to_string()]);
        assert_eq!(outcome.train_rows + outcome.test_rows, 200);
        assert!(outcome.metrics.accuracy >= 0.8, "accuracy {}", outcome.metrics.accuracy);
        assert!(outcome.pipeline.classifier.weights[0] < 0.0);
    }

    #[test]
    fn unlabelled_rows_are_skipped() {
        let mut data = separable(100);
        data.target[5] = None;
        let outcome = train(&data, &TrainConfig::default()).unwrap();
        assert_eq!(outcome.train_rows + outcome.test_rows, 99);
    }

    #[test]
    fn rejects_single_class_targets() {
        let mut data = separable(20);
        data.target = vec![Some("No".to_string()); 20];
        let err = train(&data, &TrainConfig::default()).unwrap_err();
        assert!(matches!(err, ModelError::Training(_)));
    }
}
