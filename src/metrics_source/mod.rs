//! Scope-filtered metric snapshots.
//!
//! Snapshots are transient: they are pulled on demand and never stored.
//! Every record carries the scope it belongs to, and a source only ever
//! returns records for the scope it was asked about.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::scope::Scope;

/// A single metric observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub category: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub scope: Scope,
}

impl MetricRecord {
    pub fn new(scope: Scope, category: impl Into<String>, value: f64) -> Self {
        Self {
            category: category.into(),
            value,
            timestamp: Utc::now(),
            scope,
        }
    }
}

/// Supplies metric snapshots, always pre-filtered to one scope.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Current snapshot for a scope, in recording order.
    async fn metrics_for_scope(&self, scope: Scope) -> Vec<MetricRecord>;

    /// Optional capability: the timezone metric timestamps are reported
    /// in. Sources that do not track one return `None`; callers surface
    /// "unsupported" instead of substituting a default.
    fn timezone(&self) -> Option<&str> {
        None
    }
}

/// In-memory metrics source backing local deployments and tests.
/// Snapshots are replaced wholesale per scope.
pub struct InMemoryMetricsSource {
    records: DashMap<Scope, Vec<MetricRecord>>,
    timezone: Option<String>,
}

impl InMemoryMetricsSource {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            timezone: None,
        }
    }

    /// Enable the timezone capability.
    pub fn with_timezone(timezone: impl Into<String>) -> Self {
        Self {
            records: DashMap::new(),
            timezone: Some(timezone.into()),
        }
    }

    /// Replace the snapshot for a scope.
    pub fn set_metrics(&self, scope: Scope, records: Vec<MetricRecord>) {
        self.records.insert(scope, records);
    }

    /// Append a record to its scope's snapshot.
    pub fn push_metric(&self, record: MetricRecord) {
        self.records.entry(record.scope).or_default().push(record);
    }
}

impl Default for InMemoryMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSource for InMemoryMetricsSource {
    async fn metrics_for_scope(&self, scope: Scope) -> Vec<MetricRecord> {
        self.records
            .get(&scope)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let source = InMemoryMetricsSource::new();
        source.push_metric(MetricRecord::new(Scope::Development, "cpu", 0.5));
        source.push_metric(MetricRecord::new(Scope::Enterprise, "cpu", 0.9));

        let dev = source.metrics_for_scope(Scope::Development).await;
        assert_eq!(dev.len(), 1);
        assert!(dev.iter().all(|m| m.scope == Scope::Development));

        let sandbox = source.metrics_for_scope(Scope::LocalSandbox).await;
        assert!(sandbox.is_empty());
    }

    #[tokio::test]
    async fn test_set_metrics_replaces_snapshot() {
        let source = InMemoryMetricsSource::new();
        source.push_metric(MetricRecord::new(Scope::Development, "cpu", 0.5));
        source.set_metrics(
            Scope::Development,
            vec![MetricRecord::new(Scope::Development, "memory", 0.7)],
        );

        let dev = source.metrics_for_scope(Scope::Development).await;
        assert_eq!(dev.len(), 1);
        assert_eq!(dev[0].category, "memory");
    }

    #[test]
    fn test_timezone_capability() {
        let plain = InMemoryMetricsSource::new();
        assert_eq!(plain.timezone(), None);

        let zoned = InMemoryMetricsSource::with_timezone("UTC");
        assert_eq!(zoned.timezone(), Some("UTC"));
    }
}
