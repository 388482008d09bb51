#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Churn prediction HTTP service.
//!
//! # Endpoints
//!
//! - `GET  /health`                  : liveness plus model/schema readiness
//! - `POST /predict`                 : sparse feature map to label and probability
//! - `GET  /meta`                    : expected columns, defaults, categorical options
//! - `GET  /sample`                  : one deterministic reference record
//! - `GET  /monitoring/stats`        : running probability statistics
//! - `GET  /monitoring/drift`        : mean-shift check against a reference mean
//! - `GET  /monitoring/predictions`  : most recent prediction log entries

use axum::http::{HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Layered service configuration.
#[path = "../config.rs"]
pub mod config;

/// Shared application context.
#[path = "../state.rs"]
pub mod state;

/// Prediction flow and best-effort monitoring.
#[path = "../service.rs"]
pub mod service;

/// HTTP handlers.
#[path = "../routes.rs"]
pub mod routes;

pub use config::{ConfigError, ServiceConfig};
pub use service::{PredictError, Prediction};
pub use state::{AppContext, NotReady, SharedState};

/// Builds the router with tracing and environment-specific CORS.
pub fn build_app(state: SharedState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .merge(routes::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Production allows only the configured origins with credentials; development is permissive.
#[must_use]
pub fn cors_layer(config: &ServiceConfig) -> CorsLayer {
    if !config.environment.is_production() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use churn_model::ReferenceData;
    use churn_monitoring::Monitor;
    use shared_logging::Environment;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn builds_for_both_environments() {
        for environment in [Environment::Development, Environment::Production] {
            let dir = tempdir().unwrap();
            let config = ServiceConfig {
                environment,
                ..ServiceConfig::default()
            };
            let monitor = Monitor::open(dir.path()).unwrap();
            let state = AppContext::from_parts(config, None, ReferenceData::default(), monitor);
            let _app = build_app(Arc::new(state));
        }
    }
}
