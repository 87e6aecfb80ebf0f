use crate::config::Config;
use crate::hub::Hub;
use crate::session::{Client, Identity};
use async_trait::async_trait;
use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use walklink_core::{
    ChatMessage, ChatNotification, ChatRoomRecord, LocationSample, MemberPatch,
    MemoryStore, NewChatMessage, NotifyError, Notifier, PositionUpdate, PresenceStatus,
    RecordStore, Role, Seed, StoreError, TokenTableVerifier, UserProfile, WalkRecord, WalkStatus,
};

pub const SEED: &str = r#"{
    "users": [
        {"uid": "owner-1", "nombre_display": "Ana", "rol": "DUENO", "email": "ana@example.com"},
        {"uid": "owner-2", "nombre_display": "Bea", "rol": "DUENO", "email": "bea@example.com"},
        {"uid": "walker-1", "nombre_display": "Luis", "rol": "PASEADOR", "email": "luis@example.com"},
        {"uid": "walker-2", "nombre_display": "Marta", "rol": "PASEADOR"}
    ],
    "chats": [
        {"chat_id": "chat-1", "participantes": ["owner-1", "walker-1"]},
        {"chat_id": "chat-2", "participantes": ["owner-2", "walker-1"]}
    ],
    "walks": [
        {"walk_id": "S123", "id_paseador": "walker-1", "id_dueno": "owner-1", "estado": "EN_CURSO"},
        {"walk_id": "S200", "id_paseador": "walker-1", "id_dueno": "owner-1", "estado": "CONFIRMADO"},
        {"walk_id": "S300", "id_paseador": "walker-2", "id_dueno": "owner-2", "estado": "EN_CURSO"}
    ]
}"#;

pub fn identity(uid: &str, role: Role) -> Identity {
    let display_name = match uid {
        "owner-1" => "Ana",
        "owner-2" => "Bea",
        "walker-1" => "Luis",
        "walker-2" => "Marta",
        other => other,
    };
    Identity {
        uid: uid.to_string(),
        role,
        display_name: display_name.to_string(),
        email: None,
    }
}

pub fn seeded_store() -> Arc<MemoryStore> {
    let seed = Seed::from_json(SEED).expect("seed");
    Arc::new(MemoryStore::from_seed(seed))
}

/// In-memory store with switchable failures.
#[derive(Default)]
pub struct TestStore {
    inner: MemoryStore,
    failing_chats: Mutex<HashSet<String>>,
    failing_messages: Mutex<bool>,
}

impl TestStore {
    pub fn seeded() -> Self {
        Self {
            inner: MemoryStore::from_seed(Seed::from_json(SEED).expect("seed")),
            ..Self::default()
        }
    }

    pub async fn fail_chat(&self, chat_id: &str) {
        self.failing_chats.lock().await.insert(chat_id.to_string());
    }

    pub async fn fail_message_writes(&self) {
        *self.failing_messages.lock().await = true;
    }

    async fn check_chat(&self, chat_id: &str) -> Result<(), StoreError> {
        if self.failing_chats.lock().await.contains(chat_id) {
            return Err(StoreError::Unavailable(format!("chat {chat_id} offline")));
        }
        Ok(())
    }
}

impl Deref for TestStore {
    type Target = MemoryStore;

    fn deref(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl RecordStore for TestStore {
    async fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, StoreError> {
        self.inner.get_profile(uid).await
    }

    async fn set_user_presence(
        &self,
        uid: &str,
        status: PresenceStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.set_user_presence(uid, status, at).await
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRoomRecord>, StoreError> {
        self.inner.get_chat(chat_id).await
    }

    async fn chats_for_participant(&self, uid: &str) -> Result<Vec<String>, StoreError> {
        self.inner.chats_for_participant(uid).await
    }

    async fn update_chat_member(
        &self,
        chat_id: &str,
        uid: &str,
        patch: &MemberPatch,
    ) -> Result<(), StoreError> {
        self.check_chat(chat_id).await?;
        self.inner.update_chat_member(chat_id, uid, patch).await
    }

    async fn insert_message(&self, message: &NewChatMessage) -> Result<String, StoreError> {
        if *self.failing_messages.lock().await {
            return Err(StoreError::Unavailable("message writes disabled".to_string()));
        }
        self.inner.insert_message(message).await
    }

    async fn get_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<ChatMessage>, StoreError> {
        self.inner.get_message(chat_id, message_id).await
    }

    async fn record_message_sent(
        &self,
        chat_id: &str,
        recipient_id: &str,
        preview: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_chat(chat_id).await?;
        self.inner
            .record_message_sent(chat_id, recipient_id, preview, at)
            .await
    }

    async fn mark_message_read(&self, chat_id: &str, message_id: &str) -> Result<(), StoreError> {
        self.inner.mark_message_read(chat_id, message_id).await
    }

    async fn reset_unread(&self, chat_id: &str, uid: &str) -> Result<(), StoreError> {
        self.check_chat(chat_id).await?;
        self.inner.reset_unread(chat_id, uid).await
    }

    async fn get_walk(&self, walk_id: &str) -> Result<Option<WalkRecord>, StoreError> {
        self.inner.get_walk(walk_id).await
    }

    async fn set_walk_status(
        &self,
        walk_id: &str,
        status: &WalkStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.set_walk_status(walk_id, status, at).await
    }

    async fn append_walk_location(
        &self,
        walk_id: &str,
        sample: &LocationSample,
    ) -> Result<(), StoreError> {
        self.inner.append_walk_location(walk_id, sample).await
    }

    async fn update_user_position(
        &self,
        uid: &str,
        update: &PositionUpdate,
    ) -> Result<(), StoreError> {
        self.inner.update_user_position(uid, update).await
    }

    async fn upsert_walker_search_position(
        &self,
        uid: &str,
        update: &PositionUpdate,
    ) -> Result<(), StoreError> {
        self.inner.upsert_walker_search_position(uid, update).await
    }
}

/// Records every notification it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    attempts: Mutex<usize>,
    sent: Mutex<Vec<ChatNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub async fn count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn sent(&self) -> Vec<ChatNotification> {
        self.sent.lock().await.clone()
    }

    pub async fn attempts(&self) -> usize {
        *self.attempts.lock().await
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_chat_message(&self, notification: &ChatNotification) -> Result<(), NotifyError> {
        *self.attempts.lock().await += 1;
        if self.fail {
            return Err(NotifyError::Rejected(500));
        }
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

pub fn test_client(conn_id: &str, identity: Identity) -> (Arc<Client>, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel(64);
    (Arc::new(Client::new(conn_id.to_string(), identity, tx)), rx)
}

pub fn test_verifier() -> TokenTableVerifier {
    TokenTableVerifier::new()
        .with_token("tok-owner-1", "owner-1", Some("ana@example.com"))
        .with_token("tok-walker-1", "walker-1", Some("luis@example.com"))
        .with_token("tok+walker/1=", "walker-1", Some("luis@example.com"))
}

pub fn test_hub_config(
    config: Config,
    notifier: Arc<RecordingNotifier>,
) -> (Arc<Hub>, Arc<TestStore>) {
    let store = Arc::new(TestStore::seeded());
    let hub = Hub::new(config, store.clone(), Arc::new(test_verifier()), notifier);
    (Arc::new(hub), store)
}

pub fn test_hub_with(notifier: Arc<RecordingNotifier>) -> (Arc<Hub>, Arc<TestStore>) {
    test_hub_config(Config::default(), notifier)
}

pub fn test_hub() -> Arc<Hub> {
    test_hub_with(RecordingNotifier::new()).0
}

/// Every text frame queued for a client, decoded.
pub fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            frames.push(serde_json::from_str(&text).expect("server frame is json"));
        }
    }
    frames
}

pub fn events_named(frames: &[Value], name: &str) -> Vec<Value> {
    frames
        .iter()
        .filter(|frame| frame["event"] == name)
        .cloned()
        .collect()
}

/// Polls `check` for up to a second.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
