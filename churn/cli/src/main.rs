use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use chrono::Utc;
use churn_model::{
    cells_to_request, normalize, preprocess, train, ChurnPipeline, Classifier, ColumnGroup,
    FeatureSchema, Frame, ModelEntry, ModelMetadata, ModelRegistry, Preprocessed, TrainConfig,
};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};
use shared_logging::{Environment, JsonLogger, LogLevel};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "churn", version, about = "Churn model training and offline tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trains a model, prints its report and registers a new version.
    Train(TrainArgs),
    /// Lists registered model versions.
    Models {
        #[arg(long, default_value = "artifacts")]
        artifacts: PathBuf,
    },
    /// Summarizes a raw dataset.
    Inspect {
        #[arg(long, default_value = "data/raw/telco.csv")]
        data: PathBuf,
    },
    /// Scores a deterministic sample of dataset rows with a saved model.
    Predict {
        #[arg(long, default_value = "artifacts/churn_model.json")]
        model: PathBuf,
        #[arg(long, default_value = "data/raw/telco.csv")]
        data: PathBuf,
        /// Number of rows to score.
        #[arg(long, default_value_t = 10)]
        rows: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Prints one request body suitable for `POST /predict`.
    Sample {
        #[arg(long, default_value = "data/raw/telco.csv")]
        data: PathBuf,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Parser, Debug)]
struct TrainArgs {
    #[arg(long, default_value = "data/raw/telco.csv")]
    data: PathBuf,
    #[arg(long, default_value = "artifacts")]
    artifacts: PathBuf,
    #[arg(long, default_value_t = 0.2)]
    test_size: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 1000)]
    max_iter: usize,
    /// Appends JSON-lines job records here.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    shared_logging::init_tracing(Environment::from_env(), None)?;
    let cli = Cli::parse();
    match cli.command {
        Commands::Train(args) => {
            let metadata = handle_train(&args)?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            Ok(())
        }
        Commands::Models { artifacts } => {
            let entries = ModelRegistry::new(&artifacts).list()?;
            if entries.is_empty() {
                println!("no models registered in {}", artifacts.display());
            }
            for entry in &entries {
                println!("{}", describe_entry(entry));
            }
            Ok(())
        }
        Commands::Inspect { data } => {
            let summary = inspect(&data)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Predict {
            model,
            data,
            rows,
            seed,
        } => {
            for scored in score_sample(&model, &data, rows, seed)? {
                println!(
                    "{:>6} | {:<6} | {:.4}",
                    scored.row, scored.pred_label, scored.pred_proba_yes
                );
            }
            Ok(())
        }
        Commands::Sample { data, seed } => {
            let body = sample_request(&data, seed)?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
    }
}

fn load(data: &Path) -> Result<Preprocessed> {
    let frame = Frame::from_csv_path(data)?;
    preprocess(&frame).with_context(|| format!("preprocessing {}", data.display()))
}

fn handle_train(args: &TrainArgs) -> Result<ModelMetadata> {
    let job_id = format!("train-{}", Uuid::new_v4());
    let logger = args
        .log_file
        .as_ref()
        .map(|path| JsonLogger::new("churn.train", path))
        .transpose()?;
    let log = |level: LogLevel, message: &str, metadata: Value| -> Result<()> {
        match &logger {
            Some(logger) => logger.log(level, message, metadata),
            None => Ok(()),
        }
    };

    log(
        LogLevel::Info,
        "training started",
        json!({ "job_id": job_id, "data": args.data, "artifacts": args.artifacts }),
    )?;
    let config = TrainConfig {
        test_size: args.test_size,
        seed: args.seed,
        max_iter: args.max_iter,
        ..TrainConfig::default()
    };
    let outcome = match load(&args.data).and_then(|data| Ok(train(&data, &config)?)) {
        Ok(outcome) => outcome,
        Err(err) => {
            log(
                LogLevel::Error,
                "training failed",
                json!({ "job_id": job_id, "error": format!("{err:#}") }),
            )?;
            return Err(err);
        }
    };
    tracing::info!(
        %job_id,
        train_rows = outcome.train_rows,
        test_rows = outcome.test_rows,
        iterations = outcome.iterations,
        "model fitted"
    );
    println!("{}", outcome.report.render());

    let metadata =
        ModelRegistry::new(&args.artifacts).register(&outcome, &config, Utc::now())?;
    tracing::info!(%job_id, version = %metadata.version, "model registered");
    log(
        LogLevel::Info,
        "training completed",
        json!({
            "job_id": job_id,
            "version": metadata.version,
            "accuracy": metadata.metrics.accuracy,
            "f1_score": metadata.metrics.f1_score,
        }),
    )?;
    Ok(metadata)
}

fn describe_entry(entry: &ModelEntry) -> String {
    match (&entry.metadata, &entry.metadata_error) {
        (Some(meta), _) => format!(
            "v{} | {} | trained {} | accuracy {:.4} | f1 {:.4}",
            entry.version,
            entry.model_file.display(),
            meta.training_date.to_rfc3339(),
            meta.metrics.accuracy,
            meta.metrics.f1_score
        ),
        (None, Some(err)) => format!(
            "v{} | {} | metadata unreadable: {err}",
            entry.version,
            entry.model_file.display()
        ),
        (None, None) => format!(
            "v{} | {} | no metadata",
            entry.version,
            entry.model_file.display()
        ),
    }
}

#[derive(Debug, Serialize)]
struct DatasetSummary {
    rows: usize,
    columns: usize,
    column_names: Vec<String>,
    target_distribution: IndexMap<String, usize>,
    categorical: Vec<String>,
    numeric: Vec<String>,
}

fn inspect(data: &Path) -> Result<DatasetSummary> {
    let frame = Frame::from_csv_path(data)?;
    let prepared = preprocess(&frame)?;
    Ok(DatasetSummary {
        rows: frame.n_rows(),
        columns: frame.n_cols(),
        column_names: frame.column_names().map(ToOwned::to_owned).collect(),
        target_distribution: prepared.target_distribution(),
        categorical: prepared.categorical,
        numeric: prepared.numeric,
    })
}

/// Groups equivalent to a fitted pipeline's, taken from column kinds.
fn groups_of(data: &Preprocessed) -> Vec<ColumnGroup> {
    vec![
        ColumnGroup::new("num", data.numeric.clone()),
        ColumnGroup::new("cat", data.categorical.clone()),
    ]
}

#[derive(Debug, Serialize)]
struct ScoredRow {
    row: usize,
    pred_label: String,
    pred_proba_yes: f64,
}

fn score_sample(model: &Path, data: &Path, rows: usize, seed: u64) -> Result<Vec<ScoredRow>> {
    ensure!(rows > 0, "--rows must be positive");
    let pipeline = ChurnPipeline::load(model)?;
    let prepared = load(data)?;
    let schema = FeatureSchema::derive(&pipeline.column_groups(), &prepared);
    prepared
        .features
        .sample_indices(rows, seed)
        .into_iter()
        .filter_map(|idx| prepared.features.row(idx).map(|cells| (idx, cells)))
        .map(|(idx, cells)| -> Result<ScoredRow> {
            let row = normalize(&schema, &cells_to_request(&cells));
            Ok(ScoredRow {
                row: idx,
                pred_label: pipeline.predict(&row)?,
                pred_proba_yes: pipeline.predict_proba(&row)?,
            })
        })
        .collect()
}

fn sample_request(data: &Path, seed: u64) -> Result<Value> {
    let prepared = load(data)?;
    let schema = FeatureSchema::derive(&groups_of(&prepared), &prepared);
    let features = schema
        .sample_record(&prepared.features, seed)
        .context("dataset has no rows")?;
    Ok(json!({ "features": features }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;
    use tempfile::tempdir;

    fn write_dataset(dir: &Path) -> PathBuf {
        let mut csv = String::from("Customer ID,Contract,Tenure in Months,Churn Label\n");
        for i in 0..80 {
            let contract = if i % 4 == 0 { "Two Year" } else { "Month-to-Month" };
            let label = if i < 24 { "Yes" } else { "No" };
            let _ = writeln!(csv, "C{i:03},{contract},{i},{label}");
        }
        let path = dir.join("telco.csv");
        std::fs::write(&path, csv).unwrap();
        path
    }

    #[test]
    fn train_registers_a_servable_model() {
        let dir = tempdir().unwrap();
        let data = write_dataset(dir.path());
        let args = TrainArgs {
            data: data.clone(),
            artifacts: dir.path().join("artifacts"),
            test_size: 0.2,
            seed: 42,
            max_iter: 500,
            log_file: Some(dir.path().join("logs/train.jsonl")),
        };
        let metadata = handle_train(&args).unwrap();
        assert_eq!(metadata.numeric_columns, vec!["Tenure in Months"]);
        assert_eq!(metadata.categorical_columns, vec!["Contract"]);

        let entries = ModelRegistry::new(&args.artifacts).list().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(describe_entry(&entries[0]).contains("accuracy"));

        let log = std::fs::read_to_string(dir.path().join("logs/train.jsonl")).unwrap();
        assert_eq!(log.lines().count(), 2);

        let scored = score_sample(&args.artifacts.join("churn_model.json"), &data, 5, 42).unwrap();
        assert_eq!(scored.len(), 5);
        assert!(scored
            .iter()
            .all(|s| (0.0..=1.0).contains(&s.pred_proba_yes)));
    }

    #[test]
    fn inspect_and_sample_describe_the_dataset() {
        let dir = tempdir().unwrap();
        let data = write_dataset(dir.path());

        let summary = inspect(&data).unwrap();
        assert_eq!((summary.rows, summary.columns), (80, 4));
        let body = serde_json::to_value(&summary).unwrap();
        assert_eq!(body["target_distribution"], json!({ "No": 56, "Yes": 24 }));

        let request = sample_request(&data, 42).unwrap();
        assert_eq!(request, sample_request(&data, 42).unwrap());
        assert!(request["features"]["Tenure in Months"].is_f64());
        assert!(request["features"].get("Customer ID").is_none());
    }
}
