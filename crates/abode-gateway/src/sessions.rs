use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use abode_types::UserId;
use abode_types::events::GatewayEvent;

/// Open gateway connections, one per user. A newer connection replaces the
/// older one's slot; the older one then can no longer unregister it.
#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<RwLock<HashMap<UserId, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns (conn_id, receiver) for the new connection.
    pub async fn register(&self, user_id: UserId) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Removes the slot only if `conn_id` still owns it.
    pub async fn unregister(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let mut sessions = self.inner.write().await;
        match sessions.get(&user_id) {
            Some((current, _)) if *current == conn_id => {
                sessions.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// Returns false when the user has no live connection.
    pub async fn send_to_user(&self, user_id: UserId, event: GatewayEvent) -> bool {
        let sessions = self.inner.read().await;
        match sessions.get(&user_id) {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => {
                debug!("No gateway session for {}, event dropped", user_id);
                false
            }
        }
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.read().await.contains_key(&user_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
