//! Connection record and lifecycle state

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::scope::Scope;
use crate::websocket::{Outbound, ServerMessage};

/// Identity of an upgraded transport socket. At most one live connection
/// may reference a handle at any time.
pub type HandleId = u64;

/// Lifecycle of a connection. Transitions are one-way:
/// Admitted -> Open -> Closing -> Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Admitted = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

/// A live client connection.
#[derive(Debug)]
pub struct Connection {
    pub id: Uuid,
    pub scope: Scope,
    pub handle: HandleId,
    pub permissions: Vec<String>,
    /// Hash prefix of the admission token; the raw token is never kept.
    pub token_hash: String,
    pub sender: mpsc::Sender<Outbound>,
    pub connected_at: DateTime<Utc>,
    /// Last inbound activity (Unix seconds) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
    /// Subscribed category names
    pub subscriptions: RwLock<HashSet<String>>,
    state: AtomicU8,
    /// Recurring broadcast timer; aborted when leaving Open.
    broadcast_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn new(
        scope: Scope,
        permissions: Vec<String>,
        token_hash: String,
        handle: HandleId,
        sender: mpsc::Sender<Outbound>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            scope,
            handle,
            permissions,
            token_hash,
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            subscriptions: RwLock::new(HashSet::new()),
            state: AtomicU8::new(ConnectionState::Admitted as u8),
            broadcast_task: Mutex::new(None),
        }
    }

    /// Advance `last_activity`. Called only for inbound client traffic;
    /// server-initiated sends never extend a client's lease.
    pub fn touch(&self) {
        // fetch_max keeps the timestamp monotonically non-decreasing
        self.last_activity
            .fetch_max(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            0 => ConnectionState::Admitted,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Admitted -> Open, once registered.
    pub fn mark_open(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Admitted as u8,
            ConnectionState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Move into Closing. Returns false if another caller already won the
    /// transition, so teardown runs exactly once.
    pub fn begin_close(&self) -> bool {
        for from in [ConnectionState::Open, ConnectionState::Admitted] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    ConnectionState::Closing as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Attach the recurring broadcast timer. Timers only exist while
    /// Open; a handle stored after the connection left Open is aborted on
    /// the spot.
    pub async fn set_broadcast_task(&self, task: JoinHandle<()>) {
        if !self.is_open() {
            task.abort();
            return;
        }
        let mut slot = self.broadcast_task.lock().await;
        if let Some(old) = slot.replace(task) {
            old.abort();
        }
    }

    /// Cancel the broadcast timer.
    pub async fn abort_broadcast(&self) {
        if let Some(task) = self.broadcast_task.lock().await.take() {
            task.abort();
        }
    }

    /// Release the timer handle without cancelling the task. A failing
    /// tick tears its own connection down and must not be aborted
    /// mid-cleanup; it detaches itself first, then exits its loop.
    pub async fn detach_broadcast(&self) {
        self.broadcast_task.lock().await.take();
    }

    /// Queue a message for the transport writer.
    pub async fn send(
        &self,
        message: ServerMessage,
    ) -> Result<(), mpsc::error::SendError<Outbound>> {
        self.sender.send(Outbound::Message(message)).await
    }

    #[cfg(test)]
    pub fn backdate_activity(&self, secs: i64) {
        self.last_activity
            .fetch_sub(secs, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_connection() -> Connection {
        let (tx, _rx) = mpsc::channel(4);
        Connection::new(Scope::Development, vec![], "ab12".into(), 1, tx)
    }

    #[test]
    fn test_lifecycle_transitions() {
        let conn = test_connection();
        assert_eq!(conn.state(), ConnectionState::Admitted);

        conn.mark_open();
        assert!(conn.is_open());

        assert!(conn.begin_close());
        assert_eq!(conn.state(), ConnectionState::Closing);
        // Second closer loses the race
        assert!(!conn.begin_close());

        conn.mark_closed();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_begin_close_from_admitted() {
        let conn = test_connection();
        assert!(conn.begin_close());
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let conn = test_connection();
        conn.backdate_activity(60);
        let before = conn.last_activity();
        conn.touch();
        assert!(conn.last_activity() >= before);
    }
}
