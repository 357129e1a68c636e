use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::RealtimeConfig;
use crate::metrics::SweepMetrics;
use crate::registry::ConnectionRegistry;
use crate::websocket::{close_code, ServerMessage};

/// Timeout for individual heartbeat send operations
const HEARTBEAT_SEND_TIMEOUT_MS: u64 = 5000;

/// Maximum concurrent heartbeat sends to avoid overwhelming the system
const MAX_CONCURRENT_HEARTBEATS: usize = 1000;

/// Background task for the two global sweeps: heartbeat and idle reaping.
///
/// Both run on their own timers, decoupled from the per-connection
/// broadcast timers, and cost time proportional to the live connection
/// count.
pub struct SweepTask {
    config: RealtimeConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl SweepTask {
    pub fn new(
        config: RealtimeConfig,
        registry: Arc<ConnectionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
        }
    }

    /// Run the heartbeat and reaper sweeps until shutdown
    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval);
        let reaper_interval = Duration::from_secs(self.config.reaper_interval);
        let idle_timeout = self.config.idle_timeout;

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut reaper_timer = tokio::time::interval(reaper_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        reaper_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            reaper_interval_secs = self.config.reaper_interval,
            idle_timeout_secs = idle_timeout,
            "Sweep task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Sweep task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats().await;
                }
                _ = reaper_timer.tick() => {
                    self.reap_idle_connections(idle_timeout).await;
                }
            }
        }

        tracing::info!("Sweep task stopped");
    }

    /// Send a heartbeat frame to every Open connection, in parallel with
    /// batching. Heartbeats are server-initiated and never advance a
    /// connection's `last_activity`; liveness is judged on what the
    /// client sends back.
    async fn send_heartbeats(&self) {
        let connections = self.registry.open_connections();
        let total_count = connections.len();

        if total_count == 0 {
            return;
        }

        let start = Instant::now();
        let sent = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let timed_out = Arc::new(AtomicUsize::new(0));

        for batch in connections.chunks(MAX_CONCURRENT_HEARTBEATS) {
            let futures: Vec<_> = batch
                .iter()
                .map(|conn| {
                    let sent = sent.clone();
                    let failed = failed.clone();
                    let timed_out = timed_out.clone();
                    let conn = conn.clone();

                    async move {
                        let send_timeout = Duration::from_millis(HEARTBEAT_SEND_TIMEOUT_MS);
                        match timeout(send_timeout, conn.send(ServerMessage::heartbeat())).await {
                            Ok(Ok(_)) => {
                                sent.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(Err(_)) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(
                                    connection_id = %conn.id,
                                    "Failed to send heartbeat, connection may be dead"
                                );
                            }
                            Err(_) => {
                                timed_out.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(
                                    connection_id = %conn.id,
                                    timeout_ms = HEARTBEAT_SEND_TIMEOUT_MS,
                                    "Heartbeat send timed out"
                                );
                            }
                        }
                    }
                })
                .collect();

            // Execute batch in parallel
            join_all(futures).await;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let sent_count = sent.load(Ordering::Relaxed);
        let failed_count = failed.load(Ordering::Relaxed);
        let timed_out_count = timed_out.load(Ordering::Relaxed);

        SweepMetrics::record_heartbeat_round(sent_count, elapsed_ms);

        tracing::debug!(
            total = total_count,
            sent = sent_count,
            failed = failed_count,
            timed_out = timed_out_count,
            elapsed_ms = elapsed_ms,
            "Heartbeat sweep completed"
        );

        // Warn if the sweep eats into the next interval
        if elapsed_ms > (self.config.heartbeat_interval * 1000 / 2) {
            tracing::warn!(
                elapsed_ms = elapsed_ms,
                heartbeat_interval_ms = self.config.heartbeat_interval * 1000,
                connections = total_count,
                "Heartbeat sweep took more than 50% of interval"
            );
        }
    }

    /// Force-close every connection whose last inbound activity is older
    /// than the idle timeout.
    async fn reap_idle_connections(&self, idle_timeout_secs: u64) {
        let idle = self.registry.idle_connections(idle_timeout_secs);
        let mut reaped = 0usize;

        for conn in idle {
            if self
                .registry
                .close(&conn, close_code::IDLE_TIMEOUT, "idle timeout")
                .await
            {
                SweepMetrics::record_reaped();
                reaped += 1;
            }
        }

        if reaped > 0 {
            tracing::info!(
                reaped,
                idle_timeout_secs,
                "Reaped idle connections"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Connection;
    use crate::scope::Scope;
    use crate::websocket::Outbound;
    use tokio::sync::mpsc;

    fn test_config() -> RealtimeConfig {
        RealtimeConfig {
            heartbeat_interval: 1,
            idle_timeout: 60,
            reaper_interval: 60,
            ..Default::default()
        }
    }

    fn register_open_connection(
        registry: &ConnectionRegistry,
        handle: u64,
    ) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(
            Scope::Development,
            vec![],
            "ab12".into(),
            handle,
            tx,
        ));
        registry.insert(conn.clone()).unwrap();
        conn.mark_open();
        (conn, rx)
    }

    #[tokio::test]
    async fn test_sweep_task_shutdown() {
        let registry = Arc::new(ConnectionRegistry::new(10));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = SweepTask::new(test_config(), registry, shutdown_rx);
        let handle = tokio::spawn(async move {
            task.run().await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn test_heartbeat_reaches_connections_without_touching_activity() {
        let registry = Arc::new(ConnectionRegistry::new(10));
        let (conn, mut rx) = register_open_connection(&registry, 1);
        let before = conn.last_activity();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = SweepTask::new(test_config(), registry.clone(), shutdown_rx);
        let task_handle = tokio::spawn(async move {
            task.run().await;
        });

        let frame = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("Should receive heartbeat")
            .expect("Channel should not be closed");
        assert!(matches!(
            frame,
            Outbound::Message(ServerMessage::Heartbeat { .. })
        ));

        // Server-initiated traffic does not extend the client's lease
        assert_eq!(conn.last_activity(), before);

        shutdown_tx.send(()).unwrap();
        let _ = task_handle.await;
    }

    #[tokio::test]
    async fn test_reaper_closes_idle_connections_only() {
        let registry = Arc::new(ConnectionRegistry::new(10));
        let (idle_conn, mut idle_rx) = register_open_connection(&registry, 1);
        let (live_conn, _live_rx) = register_open_connection(&registry, 2);

        idle_conn.backdate_activity(600);

        let config = RealtimeConfig {
            heartbeat_interval: 60,
            idle_timeout: 120,
            reaper_interval: 1,
            ..Default::default()
        };
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = SweepTask::new(config, registry.clone(), shutdown_rx);
        let task_handle = tokio::spawn(async move {
            task.run().await;
        });

        // The idle connection gets the idle-timeout close frame
        let frame = tokio::time::timeout(Duration::from_secs(3), idle_rx.recv())
            .await
            .expect("Should receive close frame")
            .expect("Channel should not be closed");
        match frame {
            Outbound::Close { code, .. } => assert_eq!(code, close_code::IDLE_TIMEOUT),
            other => panic!("expected close frame, got {:?}", other),
        }

        assert!(registry.get(idle_conn.id).is_none());
        assert!(registry.get(live_conn.id).is_some());

        shutdown_tx.send(()).unwrap();
        let _ = task_handle.await;
    }
}
