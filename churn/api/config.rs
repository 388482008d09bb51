use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use shared_logging::Environment;
use thiserror::Error;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_ENV: &str = "CHURN_CONFIG";

/// Runtime settings for the serving process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Serialized pipeline to serve.
    pub model_path: PathBuf,
    /// Raw reference dataset used to derive the feature schema.
    pub dataset_path: PathBuf,
    /// Deployment tag.
    pub environment: Environment,
    /// Prediction log and statistics directory.
    pub monitoring_dir: PathBuf,
    /// Production log file directory.
    pub log_dir: PathBuf,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origins allowed in production.
    pub cors_origins: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("artifacts/churn_model.json"),
            dataset_path: PathBuf::from("data/raw/telco.csv"),
            environment: Environment::Development,
            monitoring_dir: PathBuf::from("monitoring"),
            log_dir: PathBuf::from("logs"),
            host: "0.0.0.0".into(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:5173".into(),
                "http://127.0.0.1:5173".into(),
            ],
        }
    }
}

impl ServiceConfig {
    /// Defaults, overlaid by `file` when given, then by process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env(|key| std::env::var(key).ok())
    }

    /// Parses a TOML document; absent keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `MODEL_PATH`, `DATA_PATH`, `ENV`, `MONITORING_DIR`, `LOG_DIR` and `PORT`.
    pub fn with_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("MODEL_PATH") {
            self.model_path = value.into();
        }
        if let Some(value) = lookup("DATA_PATH") {
            self.dataset_path = value.into();
        }
        if let Some(value) = lookup(shared_logging::ENV_VAR) {
            self.environment = Environment::parse(&value);
        }
        if let Some(value) = lookup("MONITORING_DIR") {
            self.monitoring_dir = value.into();
        }
        if let Some(value) = lookup("LOG_DIR") {
            self.log_dir = value.into();
        }
        if let Some(value) = lookup("PORT") {
            self.port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(value))?;
        }
        Ok(self)
    }

    /// Socket address to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::InvalidAddress(raw))
    }
}

/// Errors raised while assembling [`ServiceConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file unreadable.
    #[error("reading config {}: {source}", path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Config file is not valid TOML for this schema.
    #[error("parsing config {}: {source}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },
    /// `PORT` is not a port number.
    #[error("invalid port `{0}`")]
    InvalidPort(String),
    /// Host and port do not form a socket address.
    #[error("invalid bind address `{0}`")]
    InvalidAddress(String),
}
