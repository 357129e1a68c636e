//! Per-connection recurring metric broadcasts.
//!
//! Every Open connection gets an independent recurring timer that pulls a
//! scope-filtered snapshot and pushes it down the socket. The timer
//! handle lives on the connection record and is aborted by the close path
//! the moment the connection leaves Open.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::metrics::BroadcastMetrics;
use crate::metrics_source::MetricsSource;
use crate::registry::{Connection, ConnectionRegistry};
use crate::scope::Scope;
use crate::websocket::{close_code, ServerMessage, SnapshotSummary};

/// Starts and feeds the per-connection broadcast timers.
pub struct BroadcastScheduler {
    source: Arc<dyn MetricsSource>,
    interval: Duration,
}

impl BroadcastScheduler {
    pub fn new(source: Arc<dyn MetricsSource>, interval: Duration) -> Self {
        Self { source, interval }
    }

    /// Build a metrics_update for one scope. Records come pre-filtered
    /// from the source; the summary carries the source's timezone only
    /// when that capability is supported.
    pub async fn snapshot_update(&self, scope: Scope) -> ServerMessage {
        scope_update(self.source.as_ref(), scope).await
    }

    /// Build a subscription_update: the scope-visible snapshot
    /// intersected with the requested categories.
    pub async fn subscription_update(&self, scope: Scope, categories: &[String]) -> ServerMessage {
        let visible = self.source.metrics_for_scope(scope).await;
        let requested: HashSet<&str> = categories.iter().map(String::as_str).collect();
        let metrics = visible
            .into_iter()
            .filter(|m| requested.contains(m.category.as_str()))
            .collect();

        ServerMessage::SubscriptionUpdate {
            categories: categories.to_vec(),
            metrics,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Spawn the recurring timer for a connection. Only meaningful while
    /// the connection is Open; the loop double-checks state on every tick
    /// and the handle is stored through the connection's Open-only slot.
    pub async fn start(&self, conn: Arc<Connection>, registry: Arc<ConnectionRegistry>) {
        let source = self.source.clone();
        let period = self.interval;
        let timer_conn = conn.clone();

        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            // The registration instant is not a tick
            timer.tick().await;

            loop {
                timer.tick().await;

                if !timer_conn.is_open() {
                    break;
                }

                let update = scope_update(source.as_ref(), timer_conn.scope).await;
                if timer_conn.send(update).await.is_err() {
                    // Writer gone: same cleanup path as an explicit close.
                    // Detach first so the close path does not abort this
                    // task while it is mid-teardown.
                    BroadcastMetrics::record_failure();
                    timer_conn.detach_broadcast().await;
                    registry
                        .close(&timer_conn, close_code::NORMAL, "broadcast send failed")
                        .await;
                    break;
                }
                BroadcastMetrics::record_sent();
            }
        });

        conn.set_broadcast_task(task).await;
    }
}

async fn scope_update(source: &dyn MetricsSource, scope: Scope) -> ServerMessage {
    let metrics = source.metrics_for_scope(scope).await;

    ServerMessage::MetricsUpdate {
        scope,
        timestamp: Utc::now().to_rfc3339(),
        summary: SnapshotSummary {
            total: metrics.len(),
            scope,
            timezone: source.timezone().map(str::to_string),
        },
        metrics,
    }
}
