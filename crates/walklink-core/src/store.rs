use crate::error::StoreError;
use crate::model::{
    ChatMessage, ChatRoomRecord, LocationSample, MemberPatch, NewChatMessage,
    PositionUpdate, PresenceStatus, UserProfile, WalkRecord, WalkStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The external system of record holding authoritative user, chat and walk
/// state. Every call is a suspension point; nothing here is cached.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, StoreError>;

    /// Updates `estado`, `en_linea` and `ultima_actividad` on the user record
    /// and mirrors them into the walker search projection.
    async fn set_user_presence(
        &self,
        uid: &str,
        status: PresenceStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRoomRecord>, StoreError>;

    /// Ids of every chat whose participant set contains `uid`.
    async fn chats_for_participant(&self, uid: &str) -> Result<Vec<String>, StoreError>;

    async fn update_chat_member(
        &self,
        chat_id: &str,
        uid: &str,
        patch: &MemberPatch,
    ) -> Result<(), StoreError>;

    /// Persists a message and returns its assigned id.
    async fn insert_message(&self, message: &NewChatMessage) -> Result<String, StoreError>;

    async fn get_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<ChatMessage>, StoreError>;

    /// Updates the room preview and timestamp and increments the recipient's
    /// unread counter.
    async fn record_message_sent(
        &self,
        chat_id: &str,
        recipient_id: &str,
        preview: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn mark_message_read(&self, chat_id: &str, message_id: &str) -> Result<(), StoreError>;

    async fn reset_unread(&self, chat_id: &str, uid: &str) -> Result<(), StoreError>;

    async fn get_walk(&self, walk_id: &str) -> Result<Option<WalkRecord>, StoreError>;

    /// Writes `estado` plus the status-specific `fecha_<status>` timestamp.
    async fn set_walk_status(
        &self,
        walk_id: &str,
        status: &WalkStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Appends to the walk's location history and moves `ubicacion_actual`.
    async fn append_walk_location(
        &self,
        walk_id: &str,
        sample: &LocationSample,
    ) -> Result<(), StoreError>;

    /// Walker's own user record: current position and geohash.
    async fn update_user_position(
        &self,
        uid: &str,
        update: &PositionUpdate,
    ) -> Result<(), StoreError>;

    /// Search-optimized walker projection, created when missing.
    async fn upsert_walker_search_position(
        &self,
        uid: &str,
        update: &PositionUpdate,
    ) -> Result<(), StoreError>;
}
