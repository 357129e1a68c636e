//! HTTP surface: health, stats and Prometheus exposition.

mod health;
mod metrics;

use axum::{routing::get, Router};

use crate::server::AppState;

pub use health::{health, stats};
pub use metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
}
