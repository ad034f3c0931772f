use std::collections::HashMap;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::models::event::JobStatusEvent;

/// Channel sender half for pushing messages to one WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Per-user registry of live push connections.
///
/// A user may hold several simultaneous connections; events fan out to all
/// of them. Delivery is at-most-once and best-effort: nothing is buffered
/// for users with no open connection. Thread-safe via interior `RwLock`,
/// designed to be wrapped in `Arc` and shared with every handler and the
/// worker task.
pub struct NotificationHub {
    connections: RwLock<HashMap<String, HashMap<Uuid, WsSender>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection under `user_id`.
    ///
    /// Returns the receiver half of the outbound channel; the socket task
    /// forwards everything it yields to the WebSocket sink.
    pub async fn subscribe(
        &self,
        user_id: &str,
        conn_id: Uuid,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .insert(conn_id, tx);
        rx
    }

    /// Remove a connection from every user's set.
    ///
    /// The disconnect path may not know which user the connection was filed
    /// under, so removal scans all entries unconditionally.
    pub async fn unsubscribe(&self, conn_id: Uuid) {
        let mut conns = self.connections.write().await;
        for senders in conns.values_mut() {
            senders.remove(&conn_id);
        }
        conns.retain(|_, senders| !senders.is_empty());
    }

    /// Push a status event to every open connection for `user_id`.
    ///
    /// Silent no-op when the user has no registered connections. Senders
    /// whose receiver is gone are skipped; the socket task cleans them up
    /// on disconnect.
    pub async fn notify_user(&self, user_id: &str, event: &JobStatusEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize job status event");
                return;
            }
        };

        let conns = self.connections.read().await;
        if let Some(senders) = conns.get(user_id) {
            for sender in senders.values() {
                let _ = sender.send(Message::Text(payload.clone().into()));
            }
        }
    }

    /// Total number of registered connections, across all users.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.values().map(HashMap::len).sum()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;

    fn event(status: JobStatus) -> JobStatusEvent {
        JobStatusEvent::new(Uuid::new_v4(), status)
    }

    #[tokio::test]
    async fn test_subscribe_and_notify() {
        let hub = NotificationHub::new();
        let mut rx = hub.subscribe("alice", Uuid::new_v4()).await;

        hub.notify_user("alice", &event(JobStatus::Pending)).await;

        let msg = rx.recv().await.unwrap();
        let Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        assert!(text.contains("\"status\":\"PENDING\""));
    }

    #[tokio::test]
    async fn test_fanout_to_multiple_connections() {
        let hub = NotificationHub::new();
        let mut rx1 = hub.subscribe("alice", Uuid::new_v4()).await;
        let mut rx2 = hub.subscribe("alice", Uuid::new_v4()).await;

        hub.notify_user("alice", &event(JobStatus::Done)).await;

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_notify_does_not_cross_users() {
        let hub = NotificationHub::new();
        let mut alice_rx = hub.subscribe("alice", Uuid::new_v4()).await;
        let mut bob_rx = hub.subscribe("bob", Uuid::new_v4()).await;

        hub.notify_user("alice", &event(JobStatus::Processing)).await;

        assert!(alice_rx.recv().await.is_some());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notify_unknown_user_is_noop() {
        let hub = NotificationHub::new();
        // Must not panic or block.
        hub.notify_user("nobody", &event(JobStatus::Failed)).await;
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_connection() {
        let hub = NotificationHub::new();
        let conn_id = Uuid::new_v4();
        let mut rx = hub.subscribe("alice", conn_id).await;
        assert_eq!(hub.connection_count().await, 1);

        hub.unsubscribe(conn_id).await;
        assert_eq!(hub.connection_count().await, 0);

        hub.notify_user("alice", &event(JobStatus::Done)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_connection_is_noop() {
        let hub = NotificationHub::new();
        let _rx = hub.subscribe("alice", Uuid::new_v4()).await;

        hub.unsubscribe(Uuid::new_v4()).await;
        assert_eq!(hub.connection_count().await, 1);
    }
}
