use crate::error::StoreError;
use crate::model::{
    ChatMessage, ChatRoomRecord, GeoPoint, LocationSample, MemberPatch, NewChatMessage,
    PositionUpdate, PresenceStatus, Role, UserProfile, WalkRecord, WalkStatus,
};
use crate::store::RecordStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// Initial documents for an in-memory system of record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<UserProfile>,
    #[serde(default)]
    pub chats: Vec<ChatRoomRecord>,
    #[serde(default)]
    pub walks: Vec<WalkRecord>,
}

impl Seed {
    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        serde_json::from_str(raw).map_err(|err| StoreError::Serialization(err.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Self::from_json(&raw)
    }
}

#[derive(Debug, Clone)]
struct UserEntry {
    profile: UserProfile,
    presence: Option<PresenceStatus>,
    last_activity: Option<DateTime<Utc>>,
    position: Option<PositionUpdate>,
}

#[derive(Debug, Clone, Default)]
struct SearchEntry {
    presence: Option<PresenceStatus>,
    position: Option<PositionUpdate>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct WalkEntry {
    record: WalkRecord,
    current: Option<GeoPoint>,
    locations: Vec<LocationSample>,
    status_times: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<String, UserEntry>,
    search: HashMap<String, SearchEntry>,
    chats: HashMap<String, ChatRoomRecord>,
    messages: HashMap<String, Vec<ChatMessage>>,
    walks: HashMap<String, WalkEntry>,
}

/// Process-local system of record. Used for development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let mut inner = Inner::default();
        for profile in seed.users {
            inner.users.insert(
                profile.uid.clone(),
                UserEntry {
                    profile,
                    presence: None,
                    last_activity: None,
                    position: None,
                },
            );
        }
        for chat in seed.chats {
            inner.chats.insert(chat.chat_id.clone(), chat);
        }
        for walk in seed.walks {
            inner.walks.insert(walk.walk_id.clone(), walk_entry(walk));
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub async fn put_user(&self, profile: UserProfile) {
        let mut inner = self.inner.write().await;
        inner.users.insert(
            profile.uid.clone(),
            UserEntry {
                profile,
                presence: None,
                last_activity: None,
                position: None,
            },
        );
    }

    pub async fn put_chat(&self, chat: ChatRoomRecord) {
        self.inner
            .write()
            .await
            .chats
            .insert(chat.chat_id.clone(), chat);
    }

    pub async fn put_walk(&self, walk: WalkRecord) {
        self.inner
            .write()
            .await
            .walks
            .insert(walk.walk_id.clone(), walk_entry(walk));
    }

    pub async fn presence_of(&self, uid: &str) -> Option<PresenceStatus> {
        self.inner
            .read()
            .await
            .users
            .get(uid)
            .and_then(|entry| entry.presence)
    }

    pub async fn search_presence_of(&self, uid: &str) -> Option<PresenceStatus> {
        self.inner
            .read()
            .await
            .search
            .get(uid)
            .and_then(|entry| entry.presence)
    }

    pub async fn search_position(&self, uid: &str) -> Option<PositionUpdate> {
        self.inner
            .read()
            .await
            .search
            .get(uid)
            .and_then(|entry| entry.position.clone())
    }

    pub async fn walk_position(&self, walk_id: &str) -> Option<GeoPoint> {
        self.inner
            .read()
            .await
            .walks
            .get(walk_id)
            .and_then(|entry| entry.current)
    }

    pub async fn walk_locations(&self, walk_id: &str) -> Vec<LocationSample> {
        self.inner
            .read()
            .await
            .walks
            .get(walk_id)
            .map(|entry| entry.locations.clone())
            .unwrap_or_default()
    }

    pub async fn user_position(&self, uid: &str) -> Option<GeoPoint> {
        self.inner
            .read()
            .await
            .users
            .get(uid)
            .and_then(|entry| entry.position.as_ref().map(|p| p.point))
    }

    pub async fn status_time(&self, walk_id: &str, field: &str) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .await
            .walks
            .get(walk_id)
            .and_then(|entry| entry.status_times.get(field).copied())
    }

    pub async fn message_count(&self, chat_id: &str) -> usize {
        self.inner
            .read()
            .await
            .messages
            .get(chat_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn walk_entry(record: WalkRecord) -> WalkEntry {
    WalkEntry {
        record,
        current: None,
        locations: Vec::new(),
        status_times: HashMap::new(),
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .get(uid)
            .map(|entry| entry.profile.clone()))
    }

    async fn set_user_presence(
        &self,
        uid: &str,
        status: PresenceStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .users
            .get_mut(uid)
            .ok_or_else(|| StoreError::not_found("user", uid))?;
        entry.presence = Some(status);
        entry.last_activity = Some(at);
        let is_walker = entry.profile.role == Role::Walker;
        if is_walker {
            let search = inner.search.entry(uid.to_string()).or_default();
            search.presence = Some(status);
            search.updated_at = Some(at);
        }
        Ok(())
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRoomRecord>, StoreError> {
        Ok(self.inner.read().await.chats.get(chat_id).cloned())
    }

    async fn chats_for_participant(&self, uid: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let mut ids: Vec<String> = inner
            .chats
            .values()
            .filter(|chat| chat.is_participant(uid))
            .map(|chat| chat.chat_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn update_chat_member(
        &self,
        chat_id: &str,
        uid: &str,
        patch: &MemberPatch,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let chat = inner
            .chats
            .get_mut(chat_id)
            .ok_or_else(|| StoreError::not_found("chat", chat_id))?;
        if !chat.is_participant(uid) {
            return Err(StoreError::not_found("chat member", format!("{chat_id}/{uid}")));
        }
        chat.apply(uid, patch);
        Ok(())
    }

    async fn insert_message(&self, message: &NewChatMessage) -> Result<String, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.chats.contains_key(&message.chat_id) {
            return Err(StoreError::not_found("chat", message.chat_id.clone()));
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        inner
            .messages
            .entry(message.chat_id.clone())
            .or_default()
            .push(message.clone().into_message(id.clone()));
        Ok(id)
    }

    async fn get_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<ChatMessage>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .messages
            .get(chat_id)
            .and_then(|messages| messages.iter().find(|m| m.id == message_id).cloned()))
    }

    async fn record_message_sent(
        &self,
        chat_id: &str,
        recipient_id: &str,
        preview: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let chat = inner
            .chats
            .get_mut(chat_id)
            .ok_or_else(|| StoreError::not_found("chat", chat_id))?;
        chat.last_message = Some(preview.to_string());
        chat.last_message_at = Some(at);
        let counter = chat.unread.entry(recipient_id.to_string()).or_insert(0);
        *counter = counter.saturating_add(1);
        Ok(())
    }

    async fn mark_message_read(&self, chat_id: &str, message_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let message = inner
            .messages
            .get_mut(chat_id)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(|| StoreError::not_found("message", message_id))?;
        message.read = true;
        Ok(())
    }

    async fn reset_unread(&self, chat_id: &str, uid: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let chat = inner
            .chats
            .get_mut(chat_id)
            .ok_or_else(|| StoreError::not_found("chat", chat_id))?;
        chat.unread.insert(uid.to_string(), 0);
        Ok(())
    }

    async fn get_walk(&self, walk_id: &str) -> Result<Option<WalkRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .walks
            .get(walk_id)
            .map(|entry| entry.record.clone()))
    }

    async fn set_walk_status(
        &self,
        walk_id: &str,
        status: &WalkStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .walks
            .get_mut(walk_id)
            .ok_or_else(|| StoreError::not_found("walk", walk_id))?;
        entry.record.status = status.clone();
        entry.status_times.insert(status.timestamp_field(), at);
        Ok(())
    }

    async fn append_walk_location(
        &self,
        walk_id: &str,
        sample: &LocationSample,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .walks
            .get_mut(walk_id)
            .ok_or_else(|| StoreError::not_found("walk", walk_id))?;
        entry.current = Some(sample.point());
        entry.locations.push(sample.clone());
        Ok(())
    }

    async fn update_user_position(
        &self,
        uid: &str,
        update: &PositionUpdate,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .users
            .get_mut(uid)
            .ok_or_else(|| StoreError::not_found("user", uid))?;
        entry.position = Some(update.clone());
        entry.presence = Some(PresenceStatus::Online);
        Ok(())
    }

    async fn upsert_walker_search_position(
        &self,
        uid: &str,
        update: &PositionUpdate,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.search.entry(uid.to_string()).or_default();
        entry.position = Some(update.clone());
        entry.presence = Some(PresenceStatus::Online);
        entry.updated_at = Some(update.at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemberState, MessageKind};

    const SEED: &str = r#"{
        "users": [
            {"uid": "owner-1", "nombre_display": "Ana", "rol": "DUENO"},
            {"uid": "walker-1", "nombre_display": "Luis", "rol": "PASEADOR"}
        ],
        "chats": [{"chat_id": "chat-1", "participantes": ["owner-1", "walker-1"]}],
        "walks": [{"walk_id": "S123", "id_paseador": "walker-1", "id_dueno": "owner-1", "estado": "EN_CURSO"}]
    }"#;

    fn store() -> MemoryStore {
        MemoryStore::from_seed(Seed::from_json(SEED).expect("seed"))
    }

    fn message(text: &str) -> NewChatMessage {
        let now = Utc::now();
        NewChatMessage {
            chat_id: "chat-1".to_string(),
            sender_id: "owner-1".to_string(),
            recipient_id: "walker-1".to_string(),
            kind: MessageKind::Text,
            text: text.to_string(),
            image_url: None,
            location: None,
            sent_at: now,
            expires_at: NewChatMessage::expiry_for(now),
        }
    }

    #[tokio::test]
    async fn seed_loads_users_chats_and_walks() {
        let store = store();
        let walker = store.get_profile("walker-1").await.expect("profile");
        assert_eq!(walker.map(|p| p.role), Some(Role::Walker));
        let walk = store.get_walk("S123").await.expect("walk").expect("exists");
        assert_eq!(walk.status, WalkStatus::InProgress);
        assert_eq!(
            store.chats_for_participant("owner-1").await.expect("chats"),
            vec!["chat-1".to_string()]
        );
    }

    #[tokio::test]
    async fn message_lifecycle_updates_counters() {
        let store = store();
        let id = store.insert_message(&message("hola")).await.expect("insert");
        store
            .record_message_sent("chat-1", "walker-1", "hola", Utc::now())
            .await
            .expect("counters");
        store
            .record_message_sent("chat-1", "walker-1", "hola", Utc::now())
            .await
            .expect("counters");
        let chat = store.get_chat("chat-1").await.expect("chat").expect("exists");
        assert_eq!(chat.unread_for("walker-1"), 2);
        assert_eq!(chat.last_message.as_deref(), Some("hola"));

        store.mark_message_read("chat-1", &id).await.expect("read");
        let stored = store.get_message("chat-1", &id).await.expect("get").expect("exists");
        assert!(stored.read);
        assert!(store
            .mark_message_read("chat-1", "missing")
            .await
            .expect_err("missing")
            .is_not_found());

        store.reset_unread("chat-1", "walker-1").await.expect("reset");
        let chat = store.get_chat("chat-1").await.expect("chat").expect("exists");
        assert_eq!(chat.unread_for("walker-1"), 0);
    }

    #[tokio::test]
    async fn presence_mirrors_walkers_into_search_projection() {
        let store = store();
        let now = Utc::now();
        store
            .set_user_presence("walker-1", PresenceStatus::Online, now)
            .await
            .expect("walker");
        store
            .set_user_presence("owner-1", PresenceStatus::Online, now)
            .await
            .expect("owner");
        assert_eq!(
            store.search_presence_of("walker-1").await,
            Some(PresenceStatus::Online)
        );
        assert_eq!(store.search_presence_of("owner-1").await, None);
        assert!(store
            .set_user_presence("ghost", PresenceStatus::Online, now)
            .await
            .expect_err("missing user")
            .is_not_found());
    }

    #[tokio::test]
    async fn walk_status_and_locations_are_recorded() {
        let store = store();
        let now = Utc::now();
        store
            .set_walk_status("S123", &WalkStatus::Completed, now)
            .await
            .expect("status");
        assert_eq!(store.status_time("S123", "fecha_completado").await, Some(now));

        let sample = LocationSample {
            latitude: 10.1,
            longitude: -84.2,
            accuracy: 4.0,
            speed: 1.2,
            captured_at: now,
        };
        store.append_walk_location("S123", &sample).await.expect("append");
        assert_eq!(store.walk_locations("S123").await.len(), 1);
        assert_eq!(
            store.walk_position("S123").await,
            Some(GeoPoint::new(10.1, -84.2))
        );
    }

    #[tokio::test]
    async fn member_patch_requires_existing_chat() {
        let store = store();
        store
            .update_chat_member("chat-1", "owner-1", &MemberPatch::state(MemberState::Typing))
            .await
            .expect("patch");
        let chat = store.get_chat("chat-1").await.expect("chat").expect("exists");
        assert_eq!(chat.member_state("owner-1"), Some(MemberState::Typing));
        assert!(store
            .update_chat_member("nope", "owner-1", &MemberPatch::left())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn member_patch_rejects_non_participants() {
        let store = store();
        let err = store
            .update_chat_member("chat-1", "stranger", &MemberPatch::state(MemberState::Typing))
            .await
            .expect_err("not a member");
        assert!(err.is_not_found());
        let chat = store.get_chat("chat-1").await.expect("chat").expect("exists");
        assert_eq!(chat.member_state("stranger"), None);
    }
}
