#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSON-lines logging and diagnostics setup shared by the churn crates.

use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing_subscriber::{fmt::writer::MakeWriterExt, EnvFilter};

/// File name used for the production API log inside the log directory.
pub const API_LOG_FILE: &str = "api.log";

/// Environment variable holding the deployment tag.
pub const ENV_VAR: &str = "ENV";

/// Deployment environment tag.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local work: verbose diagnostics, permissive CORS.
    #[default]
    Development,
    /// Deployed service: info diagnostics mirrored to a file, strict CORS.
    Production,
}

impl Environment {
    /// Parses a tag. Anything other than `production` is development.
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        if tag.trim().eq_ignore_ascii_case("production") {
            Self::Production
        } else {
            Self::Development
        }
    }

    /// Reads the tag from `ENV`, defaulting to development.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var(ENV_VAR).map_or(Self::Development, |tag| Self::parse(&tag))
    }

    /// Returns true for production.
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Lowercase tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installs the global `tracing` subscriber for a binary.
///
/// Development logs at `debug` to stdout. Production logs at `info` to stdout
/// and, when `log_dir` is given, appends the same lines to `<log_dir>/api.log`.
/// `RUST_LOG` overrides the level in both cases.
pub fn init_tracing(environment: Environment, log_dir: Option<&Path>) -> Result<()> {
    let level = if environment.is_production() {
        "info"
    } else {
        "debug"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},tower_http=debug")));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match (environment, log_dir) {
        (Environment::Production, Some(dir)) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating log dir {}", dir.display()))?;
            let path = dir.join(API_LOG_FILE);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::io::stdout.and(std::sync::Mutex::new(file)))
                .try_init()
        }
        _ => builder.try_init(),
    };
    installed.map_err(|err| anyhow!("installing tracing subscriber: {err}"))
}

/// Append-only writer of JSON values, one object per line.
#[derive(Debug)]
pub struct JsonLinesWriter {
    path: PathBuf,
    writer: Mutex<File>,
}

impl JsonLinesWriter {
    /// Creates or opens the file, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Serializes `value` and appends it as a single line.
    pub fn append<T: Serialize>(&self, value: &T) -> Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        let mut writer = self.writer.lock();
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }

    /// Target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads the last `limit` well-formed entries of a JSON-lines file, oldest first.
///
/// A missing file reads as empty. Blank and malformed lines are skipped.
pub fn read_tail<T: DeserializeOwned>(path: impl AsRef<Path>, limit: usize) -> Result<Vec<T>> {
    let path = path.as_ref();
    if limit == 0 || !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let lines = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("reading {}", path.display()))?;
    let mut entries: Vec<T> = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    let start = entries.len().saturating_sub(limit);
    Ok(entries.split_off(start))
}

/// Log severity level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational events.
    Info,
    /// Warning indicator.
    Warn,
    /// Error indicator.
    Error,
}

/// Structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp in ISO8601.
    pub timestamp: DateTime<Utc>,
    /// Component emitting the record.
    pub module: String,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Arbitrary JSON fields.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            level,
            message: message.into(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attaches the fields of a JSON object; other values are ignored.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = metadata {
            self.metadata = map;
        }
        self
    }
}

/// JSON-lines logger of [`LogRecord`]s for a single component.
#[derive(Debug)]
pub struct JsonLogger {
    module: String,
    sink: JsonLinesWriter,
}

impl JsonLogger {
    /// Creates or opens a logger at the desired path.
    pub fn new(module: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            module: module.into(),
            sink: JsonLinesWriter::open(path)?,
        })
    }

    /// Writes a record built from the arguments.
    pub fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) -> Result<()> {
        self.sink
            .append(&LogRecord::new(&self.module, level, message).with_metadata(metadata))
    }

    /// Returns the underlying file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.sink.path()
    }
}
