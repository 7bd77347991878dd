use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use muse_types::events::GatewayEvent;

/// Tracks the live connection of every online user.
///
/// Process-local: the persisted conversations and messages stay the source
/// of truth, this only decides where to push them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Presence fan-out; every connection receives these
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Users with a live socket, by id, with their username
    online_users: RwLock<HashMap<Uuid, String>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender).
    /// At most one per user; the most recent connection wins.
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to broadcast events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Fan an event out to every open socket.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel, replacing any previous one.
    /// Returns (conn_id, receiver).
    pub async fn register_user_channel(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.user_channels.write().await.insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Drop the user's channel unless a newer connection replaced it.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(&user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to a specific user. Returns false when the user
    /// has no live connection, so the caller can fall back to another channel.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        let channels = self.inner.user_channels.read().await;
        match channels.get(&user_id) {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Mark the user online and announce it.
    pub async fn user_online(&self, user_id: Uuid, username: String) {
        self.inner.online_users.write().await.insert(user_id, username);
        self.broadcast(GatewayEvent::PresenceUpdate { user_id, online: true });
    }

    /// Mark the user offline, unless `conn_id` was already superseded.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        let is_current = {
            let channels = self.inner.user_channels.read().await;
            channels.get(&user_id).is_some_and(|(cid, _)| *cid == conn_id)
        };

        if !is_current {
            // A newer connection has taken over
            return;
        }

        self.inner.online_users.write().await.remove(&user_id);
        self.unregister_user_channel(user_id, conn_id).await;
        self.broadcast(GatewayEvent::PresenceUpdate { user_id, online: false });
    }

    /// Snapshot of everyone online.
    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect()
    }
}
