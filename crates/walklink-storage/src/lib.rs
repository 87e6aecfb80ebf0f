use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use walklink_core::model::{
    ChatMessage, ChatRoomRecord, GeoPoint, LocationSample, MemberPatch, MemberState,
    MessageKind, NewChatMessage, OpenFlag, PositionUpdate, PresenceStatus, Role, UserProfile,
    WalkRecord, WalkStatus,
};
use walklink_core::{RecordStore, Seed, StoreError};

pub const WALKLINK_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("connection lock poisoned")]
    Poisoned,
    #[error("{kind} not found: {id}")]
    Missing { kind: &'static str, id: String },
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Missing { kind, id } => StoreError::NotFound { kind, id },
            StorageError::Timestamp(reason) => StoreError::Serialization(reason),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// SQLite-backed system of record.
///
/// A single connection is shared behind a mutex; async callers reach it
/// through `spawn_blocking`.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        schema_version(&conn)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(exists > 0)
    }

    /// Inserts or replaces the seed documents. Existing runtime state on
    /// seeded rows is reset.
    pub fn import_seed(&self, seed: &Seed) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        let tx = conn.transaction()?;
        for user in &seed.users {
            tx.execute(
                "
                INSERT INTO users (uid, display_name, role, email, push_token)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(uid) DO UPDATE SET
                    display_name=excluded.display_name,
                    role=excluded.role,
                    email=excluded.email,
                    push_token=excluded.push_token
                ",
                params![
                    user.uid,
                    user.display_name,
                    user.role.as_str(),
                    user.email,
                    user.push_token,
                ],
            )?;
        }
        for chat in &seed.chats {
            tx.execute(
                "
                INSERT INTO chats (chat_id, last_message, last_message_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(chat_id) DO UPDATE SET
                    last_message=excluded.last_message,
                    last_message_at=excluded.last_message_at
                ",
                params![
                    chat.chat_id,
                    chat.last_message,
                    chat.last_message_at.map(|at| at.to_rfc3339()),
                ],
            )?;
            tx.execute("DELETE FROM chat_members WHERE chat_id = ?1", [&chat.chat_id])?;
            for (ordinal, uid) in chat.participants.iter().enumerate() {
                tx.execute(
                    "
                    INSERT INTO chat_members (chat_id, uid, ordinal, open_chat, state, unread)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ",
                    params![
                        chat.chat_id,
                        uid,
                        ordinal as i64,
                        chat.open_chat_for(uid),
                        chat.member_state(uid).map(|state| state.as_str()),
                        chat.unread_for(uid) as i64,
                    ],
                )?;
            }
        }
        for walk in &seed.walks {
            tx.execute(
                "
                INSERT INTO walks (walk_id, walker_id, owner_id, status)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(walk_id) DO UPDATE SET
                    walker_id=excluded.walker_id,
                    owner_id=excluded.owner_id,
                    status=excluded.status
                ",
                params![
                    walk.walk_id,
                    walk.walker_id,
                    walk.owner_id,
                    walk.status.as_str()
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let outcome = tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StorageError::Poisoned)?;
            work(&guard)
        })
        .await
        .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        outcome.map_err(StoreError::from)
    }

    /// Like `with_conn`, but the work commits as one transaction.
    async fn with_tx<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let outcome = tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
            let mut guard = conn.lock().map_err(|_| StorageError::Poisoned)?;
            let tx = guard.transaction()?;
            let value = work(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
        .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        outcome.map_err(StoreError::from)
    }

    /// Location history of a walk, oldest first.
    pub async fn walk_locations(&self, walk_id: &str) -> Result<Vec<LocationSample>, StoreError> {
        let walk_id = walk_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "
                SELECT latitude, longitude, accuracy, speed, captured_at
                FROM walk_locations
                WHERE walk_id = ?1
                ORDER BY seq ASC
                ",
            )?;
            let rows = stmt.query_map([&walk_id], |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;
            let mut samples = Vec::new();
            for row in rows {
                let (latitude, longitude, accuracy, speed, captured_at) = row?;
                samples.push(LocationSample {
                    latitude,
                    longitude,
                    accuracy,
                    speed,
                    captured_at: parse_timestamp(captured_at)?,
                });
            }
            Ok(samples)
        })
        .await
    }

    /// Last position written to the user record.
    pub async fn user_position(&self, uid: &str) -> Result<Option<GeoPoint>, StoreError> {
        let uid = uid.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT latitude, longitude FROM users WHERE uid = ?1",
                    [&uid],
                    |row| {
                        Ok((
                            row.get::<_, Option<f64>>(0)?,
                            row.get::<_, Option<f64>>(1)?,
                        ))
                    },
                )
                .optional()?;
            Ok(match row {
                Some((Some(latitude), Some(longitude))) => {
                    Some(GeoPoint::new(latitude, longitude))
                }
                _ => None,
            })
        })
        .await
    }
}

fn schema_version(conn: &Connection) -> Result<i64, StorageError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn migrate(conn: &Connection) -> Result<(), StorageError> {
    let current = schema_version(conn)?;
    if current > WALKLINK_SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchemaVersion {
            found: current,
            supported: WALKLINK_SCHEMA_VERSION,
        });
    }

    if current < 1 {
        let sql = include_str!("../migrations/0001_walklink_schema.sql");
        conn.execute_batch(sql)?;
        conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
    }

    Ok(())
}

fn load_chat(conn: &Connection, chat_id: &str) -> Result<Option<ChatRoomRecord>, StorageError> {
    let header = conn
        .query_row(
            "SELECT last_message, last_message_at FROM chats WHERE chat_id = ?1",
            [chat_id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                ))
            },
        )
        .optional()?;
    let Some((last_message, last_message_at)) = header else {
        return Ok(None);
    };

    let mut record = ChatRoomRecord {
        chat_id: chat_id.to_string(),
        last_message,
        last_message_at: last_message_at.map(parse_timestamp).transpose()?,
        ..ChatRoomRecord::default()
    };

    let mut stmt = conn.prepare(
        "
        SELECT uid, open_chat, state, unread
        FROM chat_members
        WHERE chat_id = ?1
        ORDER BY ordinal ASC, uid ASC
        ",
    )?;
    let rows = stmt.query_map([chat_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;
    for row in rows {
        let (uid, open_chat, state, unread) = row?;
        if let Some(open_chat) = open_chat {
            record.open_flags.insert(uid.clone(), open_chat);
        }
        if let Some(state) = state.and_then(|value| value.parse::<MemberState>().ok()) {
            record.member_states.insert(uid.clone(), state);
        }
        record.unread.insert(uid.clone(), unread.max(0) as u32);
        record.participants.push(uid);
    }

    Ok(Some(record))
}

fn require_chat(conn: &Connection, chat_id: &str) -> Result<(), StorageError> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chats WHERE chat_id = ?1",
        [chat_id],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Err(StorageError::Missing {
            kind: "chat",
            id: chat_id.to_string(),
        });
    }
    Ok(())
}

fn missing_if_unchanged(
    changes: usize,
    kind: &'static str,
    id: &str,
) -> Result<(), StorageError> {
    if changes == 0 {
        return Err(StorageError::Missing {
            kind,
            id: id.to_string(),
        });
    }
    Ok(())
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, StoreError> {
        let uid = uid.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT uid, display_name, role, email, push_token FROM users WHERE uid = ?1",
                    [&uid],
                    |row| {
                        let role: String = row.get(2)?;
                        Ok(UserProfile {
                            uid: row.get(0)?,
                            display_name: row.get(1)?,
                            role: role.parse::<Role>().unwrap_or_default(),
                            email: row.get(3)?,
                            push_token: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    async fn set_user_presence(
        &self,
        uid: &str,
        status: PresenceStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let uid = uid.to_string();
        self.with_tx(move |conn| {
            let at = at.to_rfc3339();
            let changes = conn.execute(
                "
                UPDATE users SET presence = ?2, online = ?3, last_activity = ?4
                WHERE uid = ?1
                ",
                params![uid, status.as_str(), status.is_online(), at],
            )?;
            missing_if_unchanged(changes, "user", &uid)?;

            let role: String =
                conn.query_row("SELECT role FROM users WHERE uid = ?1", [&uid], |row| {
                    row.get(0)
                })?;
            if role.parse::<Role>().ok() == Some(Role::Walker) {
                conn.execute(
                    "
                    INSERT INTO walker_search (uid, presence, online, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(uid) DO UPDATE SET
                        presence=excluded.presence,
                        online=excluded.online,
                        updated_at=excluded.updated_at
                    ",
                    params![uid, status.as_str(), status.is_online(), at],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRoomRecord>, StoreError> {
        let chat_id = chat_id.to_string();
        self.with_conn(move |conn| load_chat(conn, &chat_id)).await
    }

    async fn chats_for_participant(&self, uid: &str) -> Result<Vec<String>, StoreError> {
        let uid = uid.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id FROM chat_members WHERE uid = ?1 ORDER BY chat_id ASC",
            )?;
            let rows = stmt.query_map([&uid], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            Ok(ids)
        })
        .await
    }

    async fn update_chat_member(
        &self,
        chat_id: &str,
        uid: &str,
        patch: &MemberPatch,
    ) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        let uid = uid.to_string();
        let patch = patch.clone();
        self.with_tx(move |conn| {
            require_chat(conn, &chat_id)?;
            let member = format!("{chat_id}/{uid}");
            match &patch.open {
                Some(OpenFlag::Open(open_chat)) => {
                    let changes = conn.execute(
                        "UPDATE chat_members SET open_chat = ?3 WHERE chat_id = ?1 AND uid = ?2",
                        params![chat_id, uid, open_chat],
                    )?;
                    missing_if_unchanged(changes, "chat member", &member)?;
                }
                Some(OpenFlag::Closed) => {
                    let changes = conn.execute(
                        "UPDATE chat_members SET open_chat = NULL WHERE chat_id = ?1 AND uid = ?2",
                        params![chat_id, uid],
                    )?;
                    missing_if_unchanged(changes, "chat member", &member)?;
                }
                None => {}
            }
            if let Some(state) = patch.state {
                let changes = conn.execute(
                    "UPDATE chat_members SET state = ?3 WHERE chat_id = ?1 AND uid = ?2",
                    params![chat_id, uid, state.as_str()],
                )?;
                missing_if_unchanged(changes, "chat member", &member)?;
            }
            Ok(())
        })
        .await
    }

    async fn insert_message(&self, message: &NewChatMessage) -> Result<String, StoreError> {
        let message = message.clone();
        self.with_conn(move |conn| {
            require_chat(conn, &message.chat_id)?;
            let message_id = uuid::Uuid::new_v4().simple().to_string();
            conn.execute(
                "
                INSERT INTO messages (
                    message_id,
                    chat_id,
                    sender_id,
                    recipient_id,
                    kind,
                    text,
                    image_url,
                    latitude,
                    longitude,
                    sent_at,
                    expires_at,
                    read,
                    delivered
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, 1)
                ",
                params![
                    message_id,
                    message.chat_id,
                    message.sender_id,
                    message.recipient_id,
                    message.kind.as_str(),
                    message.text,
                    message.image_url,
                    message.location.map(|point| point.latitude),
                    message.location.map(|point| point.longitude),
                    message.sent_at.to_rfc3339(),
                    message.expires_at.to_rfc3339(),
                ],
            )?;
            Ok(message_id)
        })
        .await
    }

    async fn get_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<ChatMessage>, StoreError> {
        let chat_id = chat_id.to_string();
        let message_id = message_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "
                    SELECT message_id, chat_id, sender_id, recipient_id, kind, text, image_url,
                           latitude, longitude, sent_at, expires_at, read, delivered
                    FROM messages
                    WHERE chat_id = ?1 AND message_id = ?2
                    ",
                    params![chat_id, message_id],
                    |row| {
                        Ok((
                            (
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, String>(5)?,
                                row.get::<_, Option<String>>(6)?,
                            ),
                            (
                                row.get::<_, Option<f64>>(7)?,
                                row.get::<_, Option<f64>>(8)?,
                                row.get::<_, String>(9)?,
                                row.get::<_, String>(10)?,
                                row.get::<_, bool>(11)?,
                                row.get::<_, bool>(12)?,
                            ),
                        ))
                    },
                )
                .optional()?;
            let Some((
                (id, chat_id, sender_id, recipient_id, kind, text, image_url),
                (latitude, longitude, sent_at, expires_at, read, delivered),
            )) = row
            else {
                return Ok(None);
            };
            let location = match (latitude, longitude) {
                (Some(latitude), Some(longitude)) => Some(GeoPoint::new(latitude, longitude)),
                _ => None,
            };
            Ok(Some(ChatMessage {
                id,
                chat_id,
                sender_id,
                recipient_id,
                kind: kind.parse::<MessageKind>().unwrap_or_default(),
                text,
                image_url,
                location,
                sent_at: parse_timestamp(sent_at)?,
                expires_at: parse_timestamp(expires_at)?,
                read,
                delivered,
            }))
        })
        .await
    }

    async fn record_message_sent(
        &self,
        chat_id: &str,
        recipient_id: &str,
        preview: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        let recipient_id = recipient_id.to_string();
        let preview = preview.to_string();
        self.with_conn(move |conn| {
            let changes = conn.execute(
                "UPDATE chats SET last_message = ?2, last_message_at = ?3 WHERE chat_id = ?1",
                params![chat_id, preview, at.to_rfc3339()],
            )?;
            missing_if_unchanged(changes, "chat", &chat_id)?;
            conn.execute(
                "
                UPDATE chat_members SET unread = unread + 1
                WHERE chat_id = ?1 AND uid = ?2
                ",
                params![chat_id, recipient_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn mark_message_read(&self, chat_id: &str, message_id: &str) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        let message_id = message_id.to_string();
        self.with_conn(move |conn| {
            let changes = conn.execute(
                "UPDATE messages SET read = 1 WHERE chat_id = ?1 AND message_id = ?2",
                params![chat_id, message_id],
            )?;
            missing_if_unchanged(changes, "message", &message_id)
        })
        .await
    }

    async fn reset_unread(&self, chat_id: &str, uid: &str) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        let uid = uid.to_string();
        self.with_conn(move |conn| {
            require_chat(conn, &chat_id)?;
            conn.execute(
                "UPDATE chat_members SET unread = 0 WHERE chat_id = ?1 AND uid = ?2",
                params![chat_id, uid],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_walk(&self, walk_id: &str) -> Result<Option<WalkRecord>, StoreError> {
        let walk_id = walk_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT walk_id, walker_id, owner_id, status FROM walks WHERE walk_id = ?1",
                    [&walk_id],
                    |row| {
                        Ok(WalkRecord {
                            walk_id: row.get(0)?,
                            walker_id: row.get(1)?,
                            owner_id: row.get(2)?,
                            status: WalkStatus::from(row.get::<_, String>(3)?),
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    async fn set_walk_status(
        &self,
        walk_id: &str,
        status: &WalkStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let walk_id = walk_id.to_string();
        let status = status.clone();
        self.with_tx(move |conn| {
            let changes = conn.execute(
                "UPDATE walks SET status = ?2 WHERE walk_id = ?1",
                params![walk_id, status.as_str()],
            )?;
            missing_if_unchanged(changes, "walk", &walk_id)?;
            conn.execute(
                "
                INSERT INTO walk_status_times (walk_id, field, at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(walk_id, field) DO UPDATE SET at=excluded.at
                ",
                params![walk_id, status.timestamp_field(), at.to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_walk_location(
        &self,
        walk_id: &str,
        sample: &LocationSample,
    ) -> Result<(), StoreError> {
        let walk_id = walk_id.to_string();
        let sample = sample.clone();
        self.with_tx(move |conn| {
            let captured_at = sample.captured_at.to_rfc3339();
            let changes = conn.execute(
                "
                UPDATE walks
                SET current_latitude = ?2, current_longitude = ?3, current_at = ?4
                WHERE walk_id = ?1
                ",
                params![walk_id, sample.latitude, sample.longitude, captured_at],
            )?;
            missing_if_unchanged(changes, "walk", &walk_id)?;
            conn.execute(
                "
                INSERT INTO walk_locations (walk_id, latitude, longitude, accuracy, speed, captured_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
                params![
                    walk_id,
                    sample.latitude,
                    sample.longitude,
                    sample.accuracy,
                    sample.speed,
                    captured_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_user_position(
        &self,
        uid: &str,
        update: &PositionUpdate,
    ) -> Result<(), StoreError> {
        let uid = uid.to_string();
        let update = update.clone();
        self.with_conn(move |conn| {
            let changes = conn.execute(
                "
                UPDATE users
                SET latitude = ?2, longitude = ?3, geohash = ?4, position_at = ?5,
                    presence = 'online', online = 1
                WHERE uid = ?1
                ",
                params![
                    uid,
                    update.point.latitude,
                    update.point.longitude,
                    update.geohash,
                    update.at.to_rfc3339(),
                ],
            )?;
            missing_if_unchanged(changes, "user", &uid)
        })
        .await
    }

    async fn upsert_walker_search_position(
        &self,
        uid: &str,
        update: &PositionUpdate,
    ) -> Result<(), StoreError> {
        let uid = uid.to_string();
        let update = update.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "
                INSERT INTO walker_search (uid, presence, online, latitude, longitude, geohash, updated_at)
                VALUES (?1, 'online', 1, ?2, ?3, ?4, ?5)
                ON CONFLICT(uid) DO UPDATE SET
                    presence=excluded.presence,
                    online=excluded.online,
                    latitude=excluded.latitude,
                    longitude=excluded.longitude,
                    geohash=excluded.geohash,
                    updated_at=excluded.updated_at
                ",
                params![
                    uid,
                    update.point.latitude,
                    update.point.longitude,
                    update.geohash,
                    update.at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }
}
