//! Process-local map of live connections to their outbound queues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;

use carlot_core::{ChatError, ChatMessage, ConnectionHandle, Identity};

use crate::dispatcher::PushTarget;
use crate::protocol::ServerEvent;

/// One live WebSocket connection as seen by the rest of the process.
pub struct Connection {
    pub handle: ConnectionHandle,
    pub identity: Identity,
    tx: mpsc::Sender<String>,
    open: AtomicBool,
    last_seen: Mutex<Instant>,
}

impl Connection {
    fn new(handle: ConnectionHandle, identity: Identity, tx: mpsc::Sender<String>) -> Self {
        Self {
            handle,
            identity,
            tx,
            open: AtomicBool::new(true),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed) && !self.tx.is_closed()
    }

    fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
    }

    /// Record inbound activity (any frame, including pongs).
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Queue a frame without waiting. A full queue drops the frame.
    pub fn send(&self, frame: String) -> Result<(), ChatError> {
        if !self.is_open() {
            return Err(ChatError::PushFailed(format!("{} is closed", self.handle)));
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                warn!(
                    handle = %self.handle,
                    frame_len = frame.len(),
                    "send queue full, dropping frame"
                );
                Err(ChatError::PushFailed(format!("{} send queue full", self.handle)))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                Err(ChatError::PushFailed(format!("{} is closed", self.handle)))
            }
        }
    }
}

/// Registry of every connection accepted by this process.
pub struct ConnectionHub {
    connections: DashMap<ConnectionHandle, Arc<Connection>>,
    max_send_queue: usize,
}

impl ConnectionHub {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Allocate a fresh handle for `identity` and return the connection and
    /// the receiving end of its outbound queue.
    pub fn register(&self, identity: Identity) -> (Arc<Connection>, mpsc::Receiver<String>) {
        let handle = ConnectionHandle::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let connection = Arc::new(Connection::new(handle.clone(), identity, tx));
        self.connections.insert(handle, Arc::clone(&connection));
        (connection, rx)
    }

    /// Forget a connection. Returns false if it was already gone.
    pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
        match self.connections.remove(handle) {
            Some((_, connection)) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, handle: &ConnectionHandle) -> Option<Arc<Connection>> {
        self.connections.get(handle).map(|entry| Arc::clone(entry.value()))
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn send_to(&self, handle: &ConnectionHandle, frame: String) -> Result<(), ChatError> {
        // Clone out of the map so the shard lock is not held while sending.
        let connection = self
            .get(handle)
            .ok_or_else(|| ChatError::PushFailed(format!("{handle} is not connected here")))?;
        connection.send(frame)
    }
}

impl PushTarget for ConnectionHub {
    fn push(&self, handle: &ConnectionHandle, message: &ChatMessage) -> Result<(), ChatError> {
        let frame = ServerEvent::Receive {
            message: message.clone(),
        }
        .to_json()
        .map_err(|e| ChatError::PushFailed(format!("encode receive frame: {e}")))?;
        self.send_to(handle, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carlot_core::{MessageId, SubjectId};

    fn message() -> ChatMessage {
        ChatMessage {
            id: MessageId::new(),
            subject: SubjectId::from_raw("car_1"),
            sender: Identity::from_raw("alice"),
            receiver: Identity::from_raw("bob"),
            content: "hello".into(),
            created_at: "2026-01-01T00:00:00.000000Z".into(),
            updated_at: "2026-01-01T00:00:00.000000Z".into(),
        }
    }

    #[test]
    fn register_and_unregister() {
        let hub = ConnectionHub::new(8);
        let (a, _rx_a) = hub.register(Identity::from_raw("alice"));
        let (b, _rx_b) = hub.register(Identity::from_raw("alice"));
        assert_ne!(a.handle, b.handle);
        assert!(a.handle.as_str().starts_with("conn_"));
        assert_eq!(hub.count(), 2);

        assert!(hub.unregister(&a.handle));
        assert!(!hub.unregister(&a.handle));
        assert!(!a.is_open());
        assert_eq!(hub.count(), 1);
    }

    #[test]
    fn push_delivers_receive_frame() {
        let hub = ConnectionHub::new(8);
        let (conn, mut rx) = hub.register(Identity::from_raw("bob"));
        hub.push(&conn.handle, &message()).unwrap();

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "receive");
        assert_eq!(frame["message"]["content"], "hello");
    }

    #[test]
    fn push_to_unknown_handle_fails() {
        let hub = ConnectionHub::new(8);
        let err = hub.push(&ConnectionHandle::new(), &message()).unwrap_err();
        assert_eq!(err.code(), "push_failed");
    }

    #[test]
    fn push_to_closed_receiver_fails() {
        let hub = ConnectionHub::new(8);
        let (conn, rx) = hub.register(Identity::from_raw("bob"));
        drop(rx);
        assert!(hub.push(&conn.handle, &message()).is_err());
        assert!(!conn.is_open());
    }

    #[test]
    fn full_queue_drops_frame() {
        let hub = ConnectionHub::new(2);
        let (conn, _rx) = hub.register(Identity::from_raw("bob"));
        assert!(hub.send_to(&conn.handle, "1".into()).is_ok());
        assert!(hub.send_to(&conn.handle, "2".into()).is_ok());
        let err = hub.send_to(&conn.handle, "3".into()).unwrap_err();
        assert!(err.to_string().contains("queue full"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_tracking() {
        let hub = ConnectionHub::new(2);
        let (conn, _rx) = hub.register(Identity::from_raw("bob"));
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(conn.idle_for() >= Duration::from_secs(45));
        conn.mark_alive();
        assert!(conn.idle_for() < Duration::from_secs(1));
    }
}
