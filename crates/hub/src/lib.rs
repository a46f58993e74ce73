//! In-memory registry of live push connections.
//!
//! The registry maps a user id to at most one connection and is owned by a
//! single control loop (`HubRunner::run`); every operation, reads included,
//! travels through its mailbox, so access is serialized without locks.
//! `Hub` is the cheap clonable handle the rest of the process talks through.
//!
//! The hub is the single authority on whether a user is currently reachable,
//! but it never manages the transport itself: the connection wrapper that
//! created a `Client` owns the socket lifecycle and must `unregister` on
//! every exit path. A failed delivery therefore does not evict the entry —
//! eviction is the read loop's job.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// A registered push connection.
///
/// `sender` is the opaque delivery capability: one JSON-serializable message
/// per send, failing when the connection's forward task is gone or its
/// buffer is full.
#[derive(Debug, Clone)]
pub struct Client {
    pub user_id: String,
    pub sender: mpsc::Sender<Value>,
}

enum HubCommand {
    Register(Client),
    Unregister(String),
    IsRegistered(String, oneshot::Sender<bool>),
    SendToUser(String, Value, oneshot::Sender<bool>),
    Broadcast(Value),
    Stop,
}

/// Handle to the connection hub.
///
/// All methods are safe to call after the control loop has stopped: commands
/// sent to a stopped hub are dropped silently.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl Hub {
    /// Create a hub handle and its control loop. The runner must be driven
    /// on a dedicated task: `tokio::spawn(runner.run())`.
    pub fn new() -> (Hub, HubRunner) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Hub { tx },
            HubRunner {
                rx,
                clients: HashMap::new(),
            },
        )
    }

    /// Register a connection, replacing any existing entry for the same
    /// user id. The evicted connection is not notified.
    pub fn register(&self, client: Client) {
        let _ = self.tx.send(HubCommand::Register(client));
    }

    /// Remove the entry for a user id. No-op when the id is not present.
    pub fn unregister(&self, user_id: &str) {
        let _ = self.tx.send(HubCommand::Unregister(user_id.to_string()));
    }

    /// Point-in-time membership check.
    pub async fn is_registered(&self, user_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(HubCommand::IsRegistered(user_id.to_string(), reply))
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Deliver one message to a user's live connection.
    ///
    /// Returns `false` when the user has no registered connection (a normal
    /// outcome, not an error) or when delivery fails; `true` only when the
    /// message was handed to the connection.
    pub async fn send_to_user(&self, user_id: &str, message: Value) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(HubCommand::SendToUser(user_id.to_string(), message, reply))
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Deliver a message to every registered connection. Per-client
    /// failures are logged and do not abort the remaining deliveries.
    pub fn broadcast(&self, message: Value) {
        let _ = self.tx.send(HubCommand::Broadcast(message));
    }

    /// Signal the control loop to exit. Idempotent: calling it again, or
    /// after the loop already stopped, does nothing.
    pub fn stop(&self) {
        let _ = self.tx.send(HubCommand::Stop);
    }
}

/// The hub's control loop state. Sole owner of the registry.
pub struct HubRunner {
    rx: mpsc::UnboundedReceiver<HubCommand>,
    clients: HashMap<String, Client>,
}

impl HubRunner {
    /// Serially process hub commands until `Stop` or until every handle is
    /// dropped.
    pub async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                HubCommand::Register(client) => {
                    tracing::debug!(user_id = %client.user_id, "Push client registered");
                    self.clients.insert(client.user_id.clone(), client);
                }
                HubCommand::Unregister(user_id) => {
                    if self.clients.remove(&user_id).is_some() {
                        tracing::debug!(user_id = %user_id, "Push client unregistered");
                    }
                }
                HubCommand::IsRegistered(user_id, reply) => {
                    let _ = reply.send(self.clients.contains_key(&user_id));
                }
                HubCommand::SendToUser(user_id, message, reply) => {
                    let _ = reply.send(self.deliver(&user_id, message));
                }
                HubCommand::Broadcast(message) => {
                    for user_id in self.clients.keys() {
                        self.deliver(user_id, message.clone());
                    }
                }
                HubCommand::Stop => {
                    tracing::info!("Connection hub stopped");
                    return;
                }
            }
        }
    }

    fn deliver(&self, user_id: &str, message: Value) -> bool {
        let Some(client) = self.clients.get(user_id) else {
            return false;
        };
        match client.sender.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                // Stale entry stays registered; the connection's read loop
                // is the authoritative eviction trigger.
                tracing::warn!(user_id = %user_id, error = %e, "Push delivery failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spawn_hub() -> Hub {
        let (hub, runner) = Hub::new();
        tokio::spawn(runner.run());
        hub
    }

    fn make_client(user_id: &str) -> (Client, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(8);
        (
            Client {
                user_id: user_id.to_string(),
                sender: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_register_then_unregister() {
        let hub = spawn_hub();
        let (client, _rx) = make_client("user-1");

        hub.register(client);
        assert!(hub.is_registered("user-1").await);

        hub.unregister("user-1");
        assert!(!hub.is_registered("user-1").await);
    }

    #[tokio::test]
    async fn test_unregister_unknown_user_is_noop() {
        let hub = spawn_hub();
        hub.unregister("ghost");
        assert!(!hub.is_registered("ghost").await);
    }

    #[tokio::test]
    async fn test_send_to_unknown_user_returns_false() {
        let hub = spawn_hub();
        assert!(!hub.send_to_user("nobody", json!({"x": 1})).await);
    }

    #[tokio::test]
    async fn test_send_to_user_delivers_message() {
        let hub = spawn_hub();
        let (client, mut rx) = make_client("user-1");
        hub.register(client);

        assert!(hub.send_to_user("user-1", json!({"type": "ping"})).await);
        assert_eq!(rx.recv().await.unwrap(), json!({"type": "ping"}));
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_evict() {
        let hub = spawn_hub();
        let (client, rx) = make_client("user-1");
        hub.register(client);
        drop(rx); // connection gone

        assert!(!hub.send_to_user("user-1", json!({})).await);
        // Entry survives; only unregister evicts.
        assert!(hub.is_registered("user-1").await);
    }

    #[tokio::test]
    async fn test_second_register_replaces_first() {
        let hub = spawn_hub();
        let (first, mut first_rx) = make_client("user-1");
        let (second, mut second_rx) = make_client("user-1");

        hub.register(first);
        hub.register(second);

        assert!(hub.send_to_user("user-1", json!({"n": 1})).await);
        assert_eq!(second_rx.recv().await.unwrap(), json!({"n": 1}));
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_and_survives_broken_client() {
        let hub = spawn_hub();
        let (alive_a, mut rx_a) = make_client("a");
        let (broken, broken_rx) = make_client("b");
        let (alive_c, mut rx_c) = make_client("c");
        hub.register(alive_a);
        hub.register(broken);
        hub.register(alive_c);
        drop(broken_rx);

        hub.broadcast(json!({"type": "announce"}));

        assert_eq!(rx_a.recv().await.unwrap(), json!({"type": "announce"}));
        assert_eq!(rx_c.recv().await.unwrap(), json!({"type": "announce"}));
    }

    #[tokio::test]
    async fn test_concurrent_registry_mutations_converge() {
        let hub = spawn_hub();

        let mut handles = Vec::new();
        for i in 0..100 {
            let hub = hub.clone();
            handles.push(tokio::spawn(async move {
                let (client, rx) = make_client(&format!("user-{i}"));
                hub.register(client);
                // Odd users disconnect again.
                if i % 2 == 1 {
                    hub.unregister(&format!("user-{i}"));
                }
                // Keep the receiver alive past the hub interaction.
                drop(rx);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for i in 0..100 {
            let expected = i % 2 == 0;
            assert_eq!(
                hub.is_registered(&format!("user-{i}")).await,
                expected,
                "user-{i}"
            );
        }
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_post_stop_calls_do_not_panic() {
        let (hub, runner) = Hub::new();
        let loop_handle = tokio::spawn(runner.run());

        hub.stop();
        hub.stop();
        loop_handle.await.unwrap();

        // Dropped, not delivered — and no panic.
        let (client, _rx) = make_client("late");
        hub.register(client);
        assert!(!hub.is_registered("late").await);
        assert!(!hub.send_to_user("late", json!({})).await);
    }
}
