use std::sync::Arc;
use std::time::Duration;

use crate::admission::{AdmissionController, QuotaPolicy};
use crate::auth::JwtValidator;
use crate::broadcast::BroadcastScheduler;
use crate::config::Settings;
use crate::metrics_source::{InMemoryMetricsSource, MetricsSource};
use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ConnectionRegistry>,
    pub admission: Arc<AdmissionController>,
    pub metrics_source: Arc<dyn MetricsSource>,
    pub scheduler: Arc<BroadcastScheduler>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self::with_source(settings, Arc::new(InMemoryMetricsSource::new()))
    }

    /// Build state around a specific metrics source. The injection seam
    /// for alternative collaborators and for tests.
    pub fn with_source(settings: Settings, metrics_source: Arc<dyn MetricsSource>) -> Self {
        let validator = Arc::new(JwtValidator::new(&settings.token));
        let registry = Arc::new(ConnectionRegistry::new(
            settings.realtime.max_connections_per_scope,
        ));
        let admission = Arc::new(AdmissionController::new(
            validator,
            registry.clone(),
            QuotaPolicy::new(settings.realtime.max_connections_per_scope),
        ));
        let scheduler = Arc::new(BroadcastScheduler::new(
            metrics_source.clone(),
            Duration::from_secs(settings.realtime.broadcast_interval),
        ));

        Self {
            settings: Arc::new(settings),
            registry,
            admission,
            metrics_source,
            scheduler,
        }
    }
}
