use crate::session::Client;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use walklink_core::protocol::ServerEvent;
use walklink_core::HubError;

/// Broadcast scopes. Kinds never collide even when ids do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    Chat(String),
    Walk(String),
    User(String),
    Presence(String),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::Chat(id) => write!(f, "{id}"),
            RoomKey::Walk(id) => write!(f, "paseo_{id}"),
            RoomKey::User(uid) => write!(f, "user_{uid}"),
            RoomKey::Presence(uid) => write!(f, "presence_{uid}"),
        }
    }
}

#[derive(Default)]
struct RoomsInner {
    members: HashMap<RoomKey, HashMap<String, Arc<Client>>>,
    memberships: HashMap<String, HashSet<RoomKey>>,
}

#[derive(Default)]
pub struct RoomTable {
    inner: RwLock<RoomsInner>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(&self, key: RoomKey, client: &Arc<Client>) {
        let mut inner = self.inner.write().await;
        inner
            .members
            .entry(key.clone())
            .or_default()
            .insert(client.conn_id.clone(), client.clone());
        inner
            .memberships
            .entry(client.conn_id.clone())
            .or_default()
            .insert(key);
    }

    /// Runs `authorize`; on success joins the room and sends the returned
    /// confirmation to the caller only.
    pub async fn join_with<F, Fut>(
        &self,
        key: RoomKey,
        client: &Arc<Client>,
        authorize: F,
    ) -> Result<(), HubError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ServerEvent, HubError>>,
    {
        let confirmation = authorize().await?;
        self.join(key.clone(), client).await;
        debug!(event = "room_join", room = %key, conn_id = %client.conn_id);
        client.send_event(&confirmation).await;
        Ok(())
    }

    pub async fn leave(&self, key: &RoomKey, conn_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let removed = match inner.members.get_mut(key) {
            Some(members) => {
                let removed = members.remove(conn_id).is_some();
                if members.is_empty() {
                    inner.members.remove(key);
                }
                removed
            }
            None => false,
        };
        if let Some(keys) = inner.memberships.get_mut(conn_id) {
            keys.remove(key);
            if keys.is_empty() {
                inner.memberships.remove(conn_id);
            }
        }
        removed
    }

    /// Drops every membership of a connection and returns the rooms it was in.
    pub async fn leave_all(&self, conn_id: &str) -> Vec<RoomKey> {
        let mut inner = self.inner.write().await;
        let keys: Vec<RoomKey> = inner
            .memberships
            .remove(conn_id)
            .map(|keys| keys.into_iter().collect())
            .unwrap_or_default();
        for key in &keys {
            if let Some(members) = inner.members.get_mut(key) {
                members.remove(conn_id);
                if members.is_empty() {
                    inner.members.remove(key);
                }
            }
        }
        keys
    }

    pub async fn is_member(&self, key: &RoomKey, conn_id: &str) -> bool {
        self.inner
            .read()
            .await
            .members
            .get(key)
            .map(|members| members.contains_key(conn_id))
            .unwrap_or(false)
    }

    pub async fn members(&self, key: &RoomKey) -> Vec<Arc<Client>> {
        self.inner
            .read()
            .await
            .members
            .get(key)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Best-effort fan-out to a snapshot of the room. Returns how many
    /// members accepted the frame.
    pub async fn broadcast(
        &self,
        key: &RoomKey,
        event: &ServerEvent,
        exclude: Option<&str>,
    ) -> usize {
        let text = match event.to_text() {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "encode_error", room = %key, error = %err);
                return 0;
            }
        };
        let targets = self.members(key).await;
        let mut delivered = 0;
        for member in targets {
            if exclude == Some(member.conn_id.as_str()) {
                continue;
            }
            if member.send_text(&text).await {
                delivered += 1;
            } else {
                warn!(event = "send_error", room = %key, conn_id = %member.conn_id);
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drain, identity, test_client};
    use walklink_core::Role;

    #[tokio::test]
    async fn broadcast_reaches_members_except_excluded() {
        let rooms = RoomTable::new();
        let (a, mut rx_a) = test_client("conn-a", identity("owner-1", Role::Owner));
        let (b, mut rx_b) = test_client("conn-b", identity("walker-1", Role::Walker));
        let key = RoomKey::Chat("chat-1".to_string());
        rooms.join(key.clone(), &a).await;
        rooms.join(key.clone(), &b).await;

        let event = ServerEvent::Pong { timestamp: 1 };
        assert_eq!(rooms.broadcast(&key, &event, Some("conn-a")).await, 1);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);

        assert_eq!(rooms.broadcast(&key, &event, None).await, 2);
    }

    #[tokio::test]
    async fn room_kinds_do_not_collide() {
        let rooms = RoomTable::new();
        let (a, _rx) = test_client("conn-a", identity("x", Role::Owner));
        rooms.join(RoomKey::Chat("x".to_string()), &a).await;
        assert!(!rooms.is_member(&RoomKey::User("x".to_string()), "conn-a").await);
        assert_eq!(RoomKey::Walk("S1".to_string()).to_string(), "paseo_S1");
        assert_eq!(RoomKey::Presence("u".to_string()).to_string(), "presence_u");
    }

    #[tokio::test]
    async fn leave_all_clears_every_membership() {
        let rooms = RoomTable::new();
        let (a, _rx) = test_client("conn-a", identity("owner-1", Role::Owner));
        rooms.join(RoomKey::Chat("chat-1".to_string()), &a).await;
        rooms.join(RoomKey::Walk("S1".to_string()), &a).await;
        assert!(rooms.leave(&RoomKey::Walk("S1".to_string()), "conn-a").await);
        assert!(!rooms.leave(&RoomKey::Walk("S1".to_string()), "conn-a").await);

        let left = rooms.leave_all("conn-a").await;
        assert_eq!(left, vec![RoomKey::Chat("chat-1".to_string())]);
        assert!(rooms
            .members(&RoomKey::Chat("chat-1".to_string()))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn failed_authorization_does_not_join() {
        let rooms = RoomTable::new();
        let (a, mut rx) = test_client("conn-a", identity("owner-1", Role::Owner));
        let key = RoomKey::Chat("chat-1".to_string());
        let err = rooms
            .join_with(key.clone(), &a, || async {
                Err::<ServerEvent, _>(HubError::authorization("No autorizado"))
            })
            .await
            .expect_err("denied");
        assert_eq!(err.code(), "authorization_failed");
        assert!(!rooms.is_member(&key, "conn-a").await);
        assert!(drain(&mut rx).is_empty());
    }
}
