use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::scope::Scope;
use crate::websocket::Outbound;

use super::stats::{RegistryStats, ScopeConnectionStats};
use super::types::{Connection, HandleId};

/// Single source of truth for live connections, partitioned by scope.
///
/// Owned by the server state and injected into every component that
/// needs it. All mutation paths (admit, route, reap, close) go through
/// here.
pub struct ConnectionRegistry {
    /// connection_id -> Connection
    connections: DashMap<Uuid, Arc<Connection>>,
    /// scope -> connection ids, in admission order
    scope_index: DashMap<Scope, Vec<Uuid>>,
    /// transport handle -> connection id (resolves inbound traffic)
    handle_index: DashMap<HandleId, Uuid>,
    /// Per-scope connection quota, re-enforced on insert.
    max_per_scope: usize,
}

impl ConnectionRegistry {
    pub fn new(max_per_scope: usize) -> Self {
        Self {
            connections: DashMap::new(),
            scope_index: DashMap::new(),
            handle_index: DashMap::new(),
            max_per_scope,
        }
    }

    /// Register a connection after admission.
    ///
    /// The quota is re-checked under the scope entry lock: the admission
    /// check and this insert straddle the upgrade await point, so the
    /// count may have moved in between. A duplicate handle is an internal
    /// error, never a protocol one.
    pub fn insert(&self, conn: Arc<Connection>) -> Result<(), RegistryError> {
        let mut scoped = self.scope_index.entry(conn.scope).or_default();

        if scoped.len() >= self.max_per_scope {
            return Err(RegistryError::CapacityExceeded {
                scope: conn.scope,
                current: scoped.len(),
                max: self.max_per_scope,
            });
        }
        if self.handle_index.contains_key(&conn.handle) {
            return Err(RegistryError::HandleInUse(conn.handle));
        }

        scoped.push(conn.id);
        self.handle_index.insert(conn.handle, conn.id);
        self.connections.insert(conn.id, conn.clone());
        drop(scoped);

        tracing::info!(
            connection_id = %conn.id,
            scope = %conn.scope,
            handle = conn.handle,
            "Connection registered"
        );

        Ok(())
    }

    /// Remove a connection from all indexes. Returns the record if it was
    /// present.
    pub fn remove(&self, connection_id: Uuid) -> Option<Arc<Connection>> {
        let (_, conn) = self.connections.remove(&connection_id)?;

        if let Some(mut scoped) = self.scope_index.get_mut(&conn.scope) {
            scoped.retain(|id| *id != connection_id);
        }
        self.handle_index.remove(&conn.handle);

        tracing::info!(
            connection_id = %connection_id,
            scope = %conn.scope,
            "Connection unregistered"
        );

        Some(conn)
    }

    pub fn get(&self, connection_id: Uuid) -> Option<Arc<Connection>> {
        self.connections.get(&connection_id).map(|c| c.clone())
    }

    /// Resolve inbound traffic to its owning connection.
    pub fn by_handle(&self, handle: HandleId) -> Option<Arc<Connection>> {
        let id = *self.handle_index.get(&handle)?;
        self.connections.get(&id).map(|c| c.clone())
    }

    pub fn count(&self, scope: Scope) -> usize {
        self.scope_index.get(&scope).map(|v| v.len()).unwrap_or(0)
    }

    /// All Open connections, for the heartbeat sweep.
    pub fn open_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|r| r.value().is_open())
            .map(|r| r.value().clone())
            .collect()
    }

    /// Connections with no inbound traffic for longer than the timeout.
    pub fn idle_connections(&self, timeout_secs: u64) -> Vec<Arc<Connection>> {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        self.connections
            .iter()
            .filter(|r| now.signed_duration_since(r.value().last_activity()) > timeout)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Tear down a connection. Every termination path lands here:
    /// explicit close, transport error, failed broadcast send, reaper
    /// eviction. Returns false when another caller already won the
    /// Open -> Closing transition.
    ///
    /// Timer cancellation precedes entry removal, so no tick can target a
    /// removed connection.
    pub async fn close(&self, conn: &Arc<Connection>, code: u16, reason: &str) -> bool {
        if !conn.begin_close() {
            return false;
        }

        conn.abort_broadcast().await;
        let _ = conn.sender.try_send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
        self.remove(conn.id);
        conn.mark_closed();

        tracing::info!(
            connection_id = %conn.id,
            scope = %conn.scope,
            code,
            reason,
            "Connection closed"
        );

        true
    }

    pub fn stats(&self) -> RegistryStats {
        let scopes = Scope::ALL
            .iter()
            .map(|scope| ScopeConnectionStats {
                scope: *scope,
                connections: self.count(*scope),
                quota: self.max_per_scope,
            })
            .collect();

        RegistryStats {
            total_connections: self.connections.len(),
            scopes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::close_code;
    use tokio::sync::mpsc;

    fn registry(max_per_scope: usize) -> ConnectionRegistry {
        ConnectionRegistry::new(max_per_scope)
    }

    fn connection(scope: Scope, handle: HandleId) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(scope, vec![], "ab12".into(), handle, tx));
        (conn, rx)
    }

    #[test]
    fn test_insert_and_reverse_lookup() {
        let reg = registry(10);
        let (conn, _rx) = connection(Scope::Development, 1);

        reg.insert(conn.clone()).unwrap();

        let resolved = reg.by_handle(1).unwrap();
        assert_eq!(resolved.id, conn.id);
        assert_eq!(reg.count(Scope::Development), 1);
        assert_eq!(reg.count(Scope::Enterprise), 0);
    }

    #[test]
    fn test_duplicate_handle_is_internal_error() {
        let reg = registry(10);
        let (a, _rx_a) = connection(Scope::Development, 7);
        let (b, _rx_b) = connection(Scope::Development, 7);

        reg.insert(a).unwrap();
        let err = reg.insert(b).unwrap_err();
        assert!(matches!(err, RegistryError::HandleInUse(7)));
        assert_eq!(reg.count(Scope::Development), 1);
    }

    #[test]
    fn test_quota_enforced_on_insert() {
        let reg = registry(2);
        let (a, _rx_a) = connection(Scope::Development, 1);
        let (b, _rx_b) = connection(Scope::Development, 2);
        let (c, _rx_c) = connection(Scope::Development, 3);

        reg.insert(a).unwrap();
        reg.insert(b).unwrap();
        let err = reg.insert(c).unwrap_err();
        assert!(matches!(err, RegistryError::CapacityExceeded { .. }));
        assert_eq!(reg.count(Scope::Development), 2);
    }

    #[test]
    fn test_quota_is_per_scope() {
        let reg = registry(1);
        let (a, _rx_a) = connection(Scope::Development, 1);
        let (b, _rx_b) = connection(Scope::Enterprise, 2);

        reg.insert(a).unwrap();
        // A full Development scope does not affect Enterprise
        reg.insert(b).unwrap();
    }

    #[test]
    fn test_zero_quota_admits_nothing() {
        let reg = registry(0);
        let (conn, _rx) = connection(Scope::LocalSandbox, 1);

        assert!(reg.insert(conn).is_err());
    }

    #[tokio::test]
    async fn test_quota_scenario_admit_close_admit() {
        let reg = registry(2);
        let (a, _rx_a) = connection(Scope::Development, 1);
        let (b, _rx_b) = connection(Scope::Development, 2);
        let (c, _rx_c) = connection(Scope::Development, 3);
        let (d, _rx_d) = connection(Scope::Development, 4);

        reg.insert(a.clone()).unwrap();
        a.mark_open();
        reg.insert(b.clone()).unwrap();
        b.mark_open();
        assert!(reg.insert(c).is_err());
        assert_eq!(reg.count(Scope::Development), 2);

        assert!(reg.close(&a, close_code::NORMAL, "bye").await);
        assert_eq!(reg.count(Scope::Development), 1);

        reg.insert(d).unwrap();
        assert_eq!(reg.count(Scope::Development), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_removes_entry() {
        let reg = registry(10);
        let (conn, mut rx) = connection(Scope::Development, 1);
        reg.insert(conn.clone()).unwrap();
        conn.mark_open();

        assert!(reg.close(&conn, close_code::IDLE_TIMEOUT, "idle timeout").await);
        assert!(!reg.close(&conn, close_code::IDLE_TIMEOUT, "idle timeout").await);

        assert!(reg.get(conn.id).is_none());
        assert!(reg.by_handle(1).is_none());

        // The transport writer saw exactly one close frame
        match rx.recv().await.unwrap() {
            Outbound::Close { code, .. } => assert_eq!(code, close_code::IDLE_TIMEOUT),
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    #[test]
    fn test_idle_connections_respects_threshold() {
        let reg = registry(10);
        let (fresh, _rx_a) = connection(Scope::Development, 1);
        let (stale, _rx_b) = connection(Scope::Development, 2);
        reg.insert(fresh.clone()).unwrap();
        reg.insert(stale.clone()).unwrap();

        stale.backdate_activity(300);

        let idle = reg.idle_connections(120);
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].id, stale.id);
    }

    #[test]
    fn test_stats_reports_all_scopes() {
        let reg = registry(5);
        let (conn, _rx) = connection(Scope::Enterprise, 1);
        reg.insert(conn).unwrap();

        let stats = reg.stats();
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.scopes.len(), Scope::ALL.len());
        let enterprise = stats
            .scopes
            .iter()
            .find(|s| s.scope == Scope::Enterprise)
            .unwrap();
        assert_eq!(enterprise.connections, 1);
        assert_eq!(enterprise.quota, 5);
    }
}
