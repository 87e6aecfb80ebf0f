use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const MESSAGE_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    #[serde(rename = "DUENO")]
    Owner,
    #[serde(rename = "PASEADOR")]
    Walker,
}

impl Default for Role {
    fn default() -> Self {
        Self::Owner
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "DUENO",
            Role::Walker => "PASEADOR",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_uppercase().as_str() {
            "DUENO" | "DUEÑO" | "OWNER" => Ok(Role::Owner),
            "PASEADOR" | "WALKER" => Ok(Role::Walker),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub uid: String,
    #[serde(default, rename = "nombre_display")]
    pub display_name: Option<String>,
    #[serde(default, rename = "rol")]
    pub role: Role,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "fcmToken")]
    pub push_token: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, PresenceStatus::Online)
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user state string kept inside a chat room (`estado_usuarios.<uid>`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberState {
    #[serde(rename = "online")]
    Online,
    #[serde(rename = "escribiendo")]
    Typing,
    #[serde(rename = "offline")]
    Offline,
}

impl MemberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberState::Online => "online",
            MemberState::Typing => "escribiendo",
            MemberState::Offline => "offline",
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, MemberState::Online | MemberState::Typing)
    }
}

impl FromStr for MemberState {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "online" => Ok(MemberState::Online),
            "escribiendo" | "typing" => Ok(MemberState::Typing),
            "offline" => Ok(MemberState::Offline),
            other => Err(format!("Unknown member state: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenFlag {
    Open(String),
    Closed,
}

/// Partial update of one user's sub-state inside a chat room.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberPatch {
    pub open: Option<OpenFlag>,
    pub state: Option<MemberState>,
}

impl MemberPatch {
    pub fn joined(chat_id: &str) -> Self {
        Self {
            open: Some(OpenFlag::Open(chat_id.to_string())),
            state: Some(MemberState::Online),
        }
    }

    pub fn left() -> Self {
        Self {
            open: Some(OpenFlag::Closed),
            state: Some(MemberState::Online),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            open: Some(OpenFlag::Closed),
            state: Some(MemberState::Offline),
        }
    }

    pub fn state(state: MemberState) -> Self {
        Self {
            open: None,
            state: Some(state),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatRoomRecord {
    pub chat_id: String,
    #[serde(rename = "participantes")]
    pub participants: Vec<String>,
    #[serde(default, rename = "chat_abierto")]
    pub open_flags: HashMap<String, String>,
    #[serde(default, rename = "estado_usuarios")]
    pub member_states: HashMap<String, MemberState>,
    #[serde(default, rename = "mensajes_no_leidos")]
    pub unread: HashMap<String, u32>,
    #[serde(default, rename = "ultimo_mensaje")]
    pub last_message: Option<String>,
    #[serde(default, rename = "ultimo_timestamp")]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ChatRoomRecord {
    pub fn new(chat_id: &str, participants: &[&str]) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            participants: participants.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn is_participant(&self, uid: &str) -> bool {
        self.participants.iter().any(|p| p == uid)
    }

    pub fn other_participant(&self, uid: &str) -> Option<&str> {
        self.participants
            .iter()
            .map(String::as_str)
            .find(|p| *p != uid)
    }

    pub fn open_chat_for(&self, uid: &str) -> Option<&str> {
        self.open_flags.get(uid).map(String::as_str)
    }

    pub fn member_state(&self, uid: &str) -> Option<MemberState> {
        self.member_states.get(uid).copied()
    }

    pub fn unread_for(&self, uid: &str) -> u32 {
        self.unread.get(uid).copied().unwrap_or(0)
    }

    pub fn apply(&mut self, uid: &str, patch: &MemberPatch) {
        match &patch.open {
            Some(OpenFlag::Open(chat_id)) => {
                self.open_flags.insert(uid.to_string(), chat_id.clone());
            }
            Some(OpenFlag::Closed) => {
                self.open_flags.remove(uid);
            }
            None => {}
        }
        if let Some(state) = patch.state {
            self.member_states.insert(uid.to_string(), state);
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageKind {
    #[serde(rename = "texto")]
    Text,
    #[serde(rename = "imagen")]
    Image,
    #[serde(rename = "ubicacion")]
    Location,
}

impl Default for MessageKind {
    fn default() -> Self {
        Self::Text
    }
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "texto",
            MessageKind::Image => "imagen",
            MessageKind::Location => "ubicacion",
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "texto" | "text" => Ok(MessageKind::Text),
            "imagen" | "image" => Ok(MessageKind::Image),
            "ubicacion" | "location" => Ok(MessageKind::Location),
            other => Err(format!("Unknown message kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewChatMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub kind: MessageKind,
    pub text: String,
    pub image_url: Option<String>,
    pub location: Option<GeoPoint>,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewChatMessage {
    pub fn expiry_for(sent_at: DateTime<Utc>) -> DateTime<Utc> {
        sent_at + Duration::days(MESSAGE_RETENTION_DAYS)
    }

    pub fn into_message(self, id: String) -> ChatMessage {
        ChatMessage {
            id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            kind: self.kind,
            text: self.text,
            image_url: self.image_url,
            location: self.location,
            sent_at: self.sent_at,
            expires_at: self.expires_at,
            read: false,
            delivered: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    #[serde(rename = "id_remitente")]
    pub sender_id: String,
    #[serde(rename = "id_destinatario")]
    pub recipient_id: String,
    #[serde(rename = "tipo")]
    pub kind: MessageKind,
    #[serde(rename = "texto")]
    pub text: String,
    #[serde(rename = "imagen_url")]
    pub image_url: Option<String>,
    pub location: Option<GeoPoint>,
    #[serde(rename = "timestamp")]
    pub sent_at: DateTime<Utc>,
    #[serde(rename = "fecha_eliminacion")]
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "leido")]
    pub read: bool,
    #[serde(rename = "entregado")]
    pub delivered: bool,
}

/// Walk lifecycle as recorded by the system of record.
///
/// Values this build does not know are kept verbatim so they round-trip and
/// are treated as "not in progress".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WalkStatus {
    PendingAcceptance,
    Pending,
    Accepted,
    Confirmed,
    ReadyToStart,
    InProgress,
    CancellationRequested,
    Completed,
    Cancelled,
    Rejected,
    RejectedTimeout,
    Other(String),
}

impl WalkStatus {
    pub fn as_str(&self) -> &str {
        match self {
            WalkStatus::PendingAcceptance => "PENDIENTE_ACEPTACION",
            WalkStatus::Pending => "PENDIENTE",
            WalkStatus::Accepted => "ACEPTADO",
            WalkStatus::Confirmed => "CONFIRMADO",
            WalkStatus::ReadyToStart => "LISTO_PARA_INICIAR",
            WalkStatus::InProgress => "EN_CURSO",
            WalkStatus::CancellationRequested => "SOLICITUD_CANCELACION",
            WalkStatus::Completed => "COMPLETADO",
            WalkStatus::Cancelled => "CANCELADO",
            WalkStatus::Rejected => "RECHAZADO",
            WalkStatus::RejectedTimeout => "RECHAZADO_TIMEOUT",
            WalkStatus::Other(value) => value.as_str(),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, WalkStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WalkStatus::Completed | WalkStatus::Cancelled)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, WalkStatus::Other(_))
    }

    /// Name of the per-status timestamp field, e.g. `fecha_en_curso`.
    pub fn timestamp_field(&self) -> String {
        format!("fecha_{}", self.as_str().to_lowercase())
    }
}

impl fmt::Display for WalkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for WalkStatus {
    fn from(input: &str) -> Self {
        match input.trim().to_uppercase().as_str() {
            "PENDIENTE_ACEPTACION" => WalkStatus::PendingAcceptance,
            "PENDIENTE" => WalkStatus::Pending,
            "ACEPTADO" => WalkStatus::Accepted,
            "CONFIRMADO" => WalkStatus::Confirmed,
            "LISTO_PARA_INICIAR" => WalkStatus::ReadyToStart,
            "EN_CURSO" => WalkStatus::InProgress,
            "SOLICITUD_CANCELACION" => WalkStatus::CancellationRequested,
            "COMPLETADO" => WalkStatus::Completed,
            "CANCELADO" => WalkStatus::Cancelled,
            "RECHAZADO" => WalkStatus::Rejected,
            "RECHAZADO_TIMEOUT" => WalkStatus::RejectedTimeout,
            _ => WalkStatus::Other(input.to_string()),
        }
    }
}

impl From<String> for WalkStatus {
    fn from(input: String) -> Self {
        WalkStatus::from(input.as_str())
    }
}

impl From<WalkStatus> for String {
    fn from(status: WalkStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalkRecord {
    pub walk_id: String,
    #[serde(rename = "id_paseador")]
    pub walker_id: String,
    #[serde(rename = "id_dueno")]
    pub owner_id: String,
    #[serde(rename = "estado")]
    pub status: WalkStatus,
}

impl WalkRecord {
    pub fn is_participant(&self, uid: &str) -> bool {
        self.walker_id == uid || self.owner_id == uid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationSample {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
    #[serde(rename = "acc")]
    pub accuracy: f64,
    pub speed: f64,
    #[serde(rename = "ts")]
    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Denormalized current-position write for user and search projections.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub point: GeoPoint,
    pub geohash: String,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_status_round_trips_known_and_unknown_values() {
        assert_eq!(WalkStatus::from("en_curso"), WalkStatus::InProgress);
        assert_eq!(WalkStatus::from("COMPLETADO"), WalkStatus::Completed);
        let odd = WalkStatus::from("EN_PAUSA");
        assert_eq!(odd, WalkStatus::Other("EN_PAUSA".to_string()));
        assert!(!odd.is_in_progress());
        assert!(!odd.is_known());

        let json = serde_json::to_string(&WalkStatus::ReadyToStart).expect("serialize");
        assert_eq!(json, "\"LISTO_PARA_INICIAR\"");
        let parsed: WalkStatus = serde_json::from_str("\"CANCELADO\"").expect("parse");
        assert!(parsed.is_terminal());
    }

    #[test]
    fn only_completed_and_cancelled_are_terminal() {
        for status in [
            WalkStatus::PendingAcceptance,
            WalkStatus::Confirmed,
            WalkStatus::InProgress,
            WalkStatus::Rejected,
            WalkStatus::CancellationRequested,
        ] {
            assert!(!status.is_terminal(), "{status} should not be terminal");
        }
        assert!(WalkStatus::Completed.is_terminal());
        assert!(WalkStatus::Cancelled.is_terminal());
        assert_eq!(WalkStatus::InProgress.timestamp_field(), "fecha_en_curso");
    }

    #[test]
    fn member_patch_clears_open_flag_but_not_unread() {
        let mut room = ChatRoomRecord::new("chat-1", &["owner", "walker"]);
        room.unread.insert("owner".to_string(), 3);
        room.apply("owner", &MemberPatch::joined("chat-1"));
        assert_eq!(room.open_chat_for("owner"), Some("chat-1"));
        assert_eq!(room.member_state("owner"), Some(MemberState::Online));

        room.apply("owner", &MemberPatch::disconnected());
        assert_eq!(room.open_chat_for("owner"), None);
        assert_eq!(room.member_state("owner"), Some(MemberState::Offline));
        assert_eq!(room.unread_for("owner"), 3);
        assert_eq!(room.other_participant("owner"), Some("walker"));
    }

    #[test]
    fn role_parses_record_values() {
        assert_eq!("PASEADOR".parse::<Role>(), Ok(Role::Walker));
        assert_eq!("dueno".parse::<Role>(), Ok(Role::Owner));
        assert!("admin".parse::<Role>().is_err());
        let profile: UserProfile =
            serde_json::from_str(r#"{"uid":"u1","nombre_display":"Ana"}"#).expect("profile");
        assert_eq!(profile.role, Role::Owner);
    }

    #[test]
    fn message_expiry_is_seven_days_after_send() {
        let sent = Utc::now();
        assert_eq!(NewChatMessage::expiry_for(sent) - sent, Duration::days(7));
        assert!(GeoPoint::new(10.1, -84.2).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }
}
