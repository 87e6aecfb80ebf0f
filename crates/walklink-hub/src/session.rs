use axum::extract::ws::{CloseFrame, Message};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tracing::{info, warn};
use walklink_core::protocol::ServerEvent;
use walklink_core::{IdentityError, IdentityVerifier, RecordStore, Role};

pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
const FALLBACK_DISPLAY_NAME: &str = "Usuario";

/// Who is behind a connection, resolved once at connect time.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub uid: String,
    pub role: Role,
    pub display_name: String,
    pub email: Option<String>,
}

pub struct Client {
    pub conn_id: String,
    pub identity: Identity,
    pub sender: mpsc::Sender<Message>,
    last_seen: Arc<AsyncMutex<Instant>>,
}

impl Client {
    pub fn new(conn_id: String, identity: Identity, sender: mpsc::Sender<Message>) -> Self {
        Self {
            conn_id,
            identity,
            sender,
            last_seen: Arc::new(AsyncMutex::new(Instant::now())),
        }
    }

    pub fn uid(&self) -> &str {
        &self.identity.uid
    }

    pub async fn touch(&self) {
        let mut last = self.last_seen.lock().await;
        *last = Instant::now();
    }

    pub async fn last_seen(&self) -> Instant {
        *self.last_seen.lock().await
    }

    pub async fn send_text(&self, text: &str) -> bool {
        self.sender.send(Message::Text(text.to_string())).await.is_ok()
    }

    pub async fn send_event(&self, event: &ServerEvent) -> bool {
        match event.to_text() {
            Ok(text) => self.send_text(&text).await,
            Err(err) => {
                warn!(event = "encode_error", conn_id = %self.conn_id, error = %err);
                false
            }
        }
    }

    pub async fn close(&self, reason: &str) {
        let _ = self
            .sender
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: reason.to_string().into(),
            })))
            .await;
    }
}

#[derive(Default)]
struct RegistryInner {
    clients: HashMap<String, Arc<Client>>,
    by_user: HashMap<String, HashSet<String>>,
}

/// Live authenticated connections, indexed by connection and by user.
#[derive(Default)]
pub struct SessionRegistry {
    conn_counter: AtomicU64,
    inner: RwLock<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{id}")
    }

    /// Returns true when this is the user's first live connection.
    pub async fn register(&self, client: Arc<Client>) -> bool {
        let mut inner = self.inner.write().await;
        let conns = inner.by_user.entry(client.uid().to_string()).or_default();
        let first = conns.is_empty();
        conns.insert(client.conn_id.clone());
        inner.clients.insert(client.conn_id.clone(), client.clone());
        info!(
            event = "client_connected",
            conn_id = %client.conn_id,
            uid = %client.uid(),
            role = %client.identity.role
        );
        first
    }

    /// `None` when the connection was already gone, otherwise whether it was
    /// the user's last one.
    pub async fn unregister(&self, client: &Client) -> Option<bool> {
        let mut inner = self.inner.write().await;
        inner.clients.remove(&client.conn_id)?;
        let mut last = false;
        if let Some(conns) = inner.by_user.get_mut(client.uid()) {
            conns.remove(&client.conn_id);
            if conns.is_empty() {
                inner.by_user.remove(client.uid());
                last = true;
            }
        }
        Some(last)
    }

    pub async fn is_connected(&self, conn_id: &str) -> bool {
        self.inner.read().await.clients.contains_key(conn_id)
    }

    pub async fn is_online(&self, uid: &str) -> bool {
        self.inner.read().await.by_user.contains_key(uid)
    }

    pub async fn online_subset(&self, uids: &[String]) -> Vec<String> {
        let inner = self.inner.read().await;
        uids.iter()
            .filter(|uid| inner.by_user.contains_key(uid.as_str()))
            .cloned()
            .collect()
    }

    pub async fn connections_for(&self, uid: &str) -> Vec<Arc<Client>> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(uid)
            .map(|conns| {
                conns
                    .iter()
                    .filter_map(|conn_id| inner.clients.get(conn_id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> Vec<Arc<Client>> {
        self.inner.read().await.clients.values().cloned().collect()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.clients.len()
    }
}

/// Pulls the bearer credential from `Authorization` or the already decoded
/// `token` query parameter.
pub fn extract_token(authorization: Option<&str>, query_token: Option<&str>) -> Option<String> {
    if let Some(header) = authorization {
        let header = header.trim();
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .unwrap_or(header)
            .trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    query_token
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub async fn authenticate(
    verifier: &dyn IdentityVerifier,
    store: &dyn RecordStore,
    token: Option<&str>,
) -> Result<Identity, IdentityError> {
    let token = token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(IdentityError::MissingToken)?;

    let verified = match verifier.verify(token).await {
        Ok(value) => value,
        Err(IdentityError::MissingToken) => return Err(IdentityError::MissingToken),
        Err(err) => {
            warn!(event = "auth_rejected", error = %err);
            return Err(IdentityError::InvalidToken);
        }
    };

    let profile = match store.get_profile(&verified.uid).await {
        Ok(value) => value,
        Err(err) => {
            warn!(event = "auth_profile_error", uid = %verified.uid, error = %err);
            return Err(IdentityError::InvalidToken);
        }
    };

    let email = profile
        .as_ref()
        .and_then(|p| p.email.clone())
        .or(verified.email);
    let role = profile.as_ref().map(|p| p.role).unwrap_or_default();
    let display_name = profile
        .and_then(|p| p.display_name)
        .filter(|name| !name.trim().is_empty())
        .or_else(|| email.clone())
        .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string());

    Ok(Identity {
        uid: verified.uid,
        role,
        display_name,
        email,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{identity, seeded_store};
    use walklink_core::TokenTableVerifier;

    fn verifier() -> TokenTableVerifier {
        TokenTableVerifier::new()
            .with_token("tok-owner", "owner-1", Some("ana@example.com"))
            .with_token("tok-stranger", "stranger", Some("x@example.com"))
            .with_token("tok-anon", "anon", None)
    }

    #[test]
    fn token_is_read_from_header_then_query() {
        assert_eq!(
            extract_token(Some("Bearer abc"), Some("zzz")),
            Some("abc".to_string())
        );
        assert_eq!(
            extract_token(Some("   "), Some(" zzz ")),
            Some("zzz".to_string())
        );
        assert_eq!(extract_token(Some("Bearer  "), Some("")), None);
        assert_eq!(extract_token(None, None), None);
    }

    #[tokio::test]
    async fn authentication_resolves_profile_or_falls_back() {
        let store = seeded_store();
        let verifier = verifier();

        let owner = authenticate(&verifier, store.as_ref(), Some("tok-owner"))
            .await
            .expect("owner");
        assert_eq!(owner.role, Role::Owner);
        assert_eq!(owner.display_name, "Ana");

        let stranger = authenticate(&verifier, store.as_ref(), Some("tok-stranger"))
            .await
            .expect("stranger");
        assert_eq!(stranger.role, Role::Owner);
        assert_eq!(stranger.display_name, "x@example.com");

        let anon = authenticate(&verifier, store.as_ref(), Some("tok-anon"))
            .await
            .expect("anon");
        assert_eq!(anon.display_name, "Usuario");
    }

    #[tokio::test]
    async fn authentication_failures_map_to_close_reasons() {
        let store = seeded_store();
        let verifier = verifier();
        let missing = authenticate(&verifier, store.as_ref(), None)
            .await
            .expect_err("missing");
        assert_eq!(missing.to_string(), "Authentication token required");
        let bad = authenticate(&verifier, store.as_ref(), Some("forged"))
            .await
            .expect_err("forged");
        assert_eq!(bad.to_string(), "Authentication failed");
    }

    #[tokio::test]
    async fn registry_tracks_first_and_last_connection_per_user() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let a = Arc::new(Client::new(
            registry.next_conn_id(),
            identity("owner-1", Role::Owner),
            tx.clone(),
        ));
        let b = Arc::new(Client::new(
            registry.next_conn_id(),
            identity("owner-1", Role::Owner),
            tx,
        ));
        assert_ne!(a.conn_id, b.conn_id);
        assert!(registry.register(a.clone()).await);
        assert!(!registry.register(b.clone()).await);
        assert_eq!(registry.connections_for("owner-1").await.len(), 2);
        assert_eq!(
            registry
                .online_subset(&["owner-1".to_string(), "walker-1".to_string()])
                .await,
            vec!["owner-1".to_string()]
        );

        assert_eq!(registry.unregister(&a).await, Some(false));
        assert!(registry.is_online("owner-1").await);
        assert_eq!(registry.unregister(&b).await, Some(true));
        assert!(!registry.is_online("owner-1").await);
        assert_eq!(registry.unregister(&b).await, None);
    }
}
