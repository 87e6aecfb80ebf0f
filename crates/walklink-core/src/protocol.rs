use crate::geo::iso_timestamp;
use crate::location::LocationPayload;
use crate::model::{ChatMessage, MessageKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MAX_FRAME_BYTES: usize = 64 * 1024;
pub const MAX_PRESENCE_IDS: usize = 200;

/// Every frame on the socket, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("invalid payload for {event}: {reason}")]
    InvalidPayload { event: String, reason: String },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SendMessagePayload {
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(default, rename = "destinatarioId")]
    pub recipient_id: Option<String>,
    #[serde(default, rename = "texto")]
    pub text: Option<String>,
    #[serde(default, rename = "tipo")]
    pub kind: Option<MessageKind>,
    #[serde(default, rename = "imagen_url")]
    pub image_url: Option<String>,
    #[serde(default, rename = "latitud")]
    pub latitude: Option<f64>,
    #[serde(default, rename = "longitud")]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MarkReadPayload {
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StatusChangePayload {
    #[serde(rename = "paseoId")]
    pub walk_id: String,
    #[serde(rename = "nuevoEstado")]
    pub new_status: String,
}

/// Inbound commands, one per event name.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    JoinChat(String),
    LeaveChat(String),
    SendMessage(SendMessagePayload),
    Typing(String),
    StopTyping(String),
    MarkRead(MarkReadPayload),
    ResetUnread(String),
    JoinPaseo(String),
    UpdateLocation(LocationPayload),
    PaseoEstadoChange(StatusChangePayload),
    GetOnlineUsers(Vec<String>),
    SubscribePresence(Vec<String>),
    UnsubscribePresence(Vec<String>),
    Ping,
}

impl ClientCommand {
    pub fn parse(frame: Frame) -> Result<Self, ProtocolError> {
        let Frame { event, data } = frame;
        let command = match event.as_str() {
            "join_chat" => ClientCommand::JoinChat(room_id(&event, &data, "chatId")?),
            "leave_chat" => ClientCommand::LeaveChat(room_id(&event, &data, "chatId")?),
            "typing" => ClientCommand::Typing(room_id(&event, &data, "chatId")?),
            "stop_typing" => ClientCommand::StopTyping(room_id(&event, &data, "chatId")?),
            "reset_unread" => ClientCommand::ResetUnread(room_id(&event, &data, "chatId")?),
            "join_paseo" => ClientCommand::JoinPaseo(room_id(&event, &data, "paseoId")?),
            "send_message" => ClientCommand::SendMessage(payload(&event, data)?),
            "mark_read" => ClientCommand::MarkRead(payload(&event, data)?),
            "update_location" => ClientCommand::UpdateLocation(payload(&event, data)?),
            "paseo_estado_change" => ClientCommand::PaseoEstadoChange(payload(&event, data)?),
            "get_online_users" => ClientCommand::GetOnlineUsers(id_list(&event, data)?),
            "subscribe_presence" => ClientCommand::SubscribePresence(id_list(&event, data)?),
            "unsubscribe_presence" => ClientCommand::UnsubscribePresence(id_list(&event, data)?),
            "ping" => ClientCommand::Ping,
            _ => return Err(ProtocolError::UnknownEvent(event)),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::JoinChat(_) => "join_chat",
            ClientCommand::LeaveChat(_) => "leave_chat",
            ClientCommand::SendMessage(_) => "send_message",
            ClientCommand::Typing(_) => "typing",
            ClientCommand::StopTyping(_) => "stop_typing",
            ClientCommand::MarkRead(_) => "mark_read",
            ClientCommand::ResetUnread(_) => "reset_unread",
            ClientCommand::JoinPaseo(_) => "join_paseo",
            ClientCommand::UpdateLocation(_) => "update_location",
            ClientCommand::PaseoEstadoChange(_) => "paseo_estado_change",
            ClientCommand::GetOnlineUsers(_) => "get_online_users",
            ClientCommand::SubscribePresence(_) => "subscribe_presence",
            ClientCommand::UnsubscribePresence(_) => "unsubscribe_presence",
            ClientCommand::Ping => "ping",
        }
    }
}

fn invalid(event: &str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidPayload {
        event: event.to_string(),
        reason: reason.into(),
    }
}

fn payload<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|err| invalid(event, err.to_string()))
}

/// Room ids arrive either bare (`"chat-1"`) or wrapped (`{"chatId": "chat-1"}`).
fn room_id(event: &str, data: &Value, key: &str) -> Result<String, ProtocolError> {
    let id = match data {
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) => map
            .get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
        _ => String::new(),
    };
    if id.is_empty() {
        return Err(invalid(event, format!("missing {key}")));
    }
    Ok(id)
}

fn id_list(event: &str, data: Value) -> Result<Vec<String>, ProtocolError> {
    let ids: Vec<String> = payload(event, data)?;
    if ids.len() > MAX_PRESENCE_IDS {
        return Err(invalid(event, "too many ids"));
    }
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim().to_string();
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageEvent {
    pub id: String,
    #[serde(rename = "chatId")]
    pub chat_id: String,
    pub id_remitente: String,
    pub id_destinatario: String,
    pub texto: String,
    pub tipo: MessageKind,
    pub imagen_url: Option<String>,
    pub latitud: Option<f64>,
    pub longitud: Option<f64>,
    pub timestamp: String,
    pub leido: bool,
    pub entregado: bool,
    pub sender_name: String,
}

impl MessageEvent {
    pub fn from_message(message: &ChatMessage, sender_name: &str) -> Self {
        Self {
            id: message.id.clone(),
            chat_id: message.chat_id.clone(),
            id_remitente: message.sender_id.clone(),
            id_destinatario: message.recipient_id.clone(),
            texto: message.text.clone(),
            tipo: message.kind,
            imagen_url: message.image_url.clone(),
            latitud: message.location.map(|p| p.latitude),
            longitud: message.location.map(|p| p.longitude),
            timestamp: iso_timestamp(message.sent_at),
            leido: message.read,
            entregado: message.delivered,
            sender_name: sender_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LocationEvent {
    #[serde(rename = "paseoId")]
    pub walk_id: String,
    pub lat: f64,
    pub lng: f64,
    pub acc: f64,
    pub speed: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PresenceEvent {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userName", skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub status: String,
    pub timestamp: i64,
}

/// Outbound events. Serialized as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    JoinedChat {
        #[serde(rename = "chatId")]
        chat_id: String,
    },
    NewMessage(MessageEvent),
    UserTyping {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "userName")]
        user_name: String,
        #[serde(rename = "chatId")]
        chat_id: String,
    },
    UserStopTyping {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "chatId")]
        chat_id: String,
    },
    MessageRead {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "readBy")]
        read_by: String,
    },
    JoinedPaseo {
        #[serde(rename = "paseoId")]
        walk_id: String,
        estado: String,
    },
    UpdateLocation(LocationEvent),
    PaseoUpdated {
        #[serde(rename = "paseoId")]
        walk_id: String,
        estado: String,
        #[serde(rename = "changedBy")]
        changed_by: String,
    },
    OnlineUsers(Vec<String>),
    UserConnected(PresenceEvent),
    UserDisconnected(PresenceEvent),
    UserStatusChanged(PresenceEvent),
    Pong {
        timestamp: i64,
    },
    Error {
        message: String,
        code: String,
    },
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
            code: code.to_string(),
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(event: &str, data: Value) -> Frame {
        Frame::new(event, data)
    }

    #[test]
    fn room_ids_accept_bare_and_wrapped_forms() {
        let bare = ClientCommand::parse(frame("join_chat", json!("chat-1"))).expect("bare");
        let wrapped =
            ClientCommand::parse(frame("join_chat", json!({"chatId": "chat-1"}))).expect("wrapped");
        assert_eq!(bare, ClientCommand::JoinChat("chat-1".to_string()));
        assert_eq!(bare, wrapped);

        let walk = ClientCommand::parse(frame("join_paseo", json!({"paseoId": "S123"})))
            .expect("walk");
        assert_eq!(walk, ClientCommand::JoinPaseo("S123".to_string()));
    }

    #[test]
    fn empty_room_id_is_invalid() {
        let err = ClientCommand::parse(frame("typing", json!(""))).expect_err("empty");
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
        let err = ClientCommand::parse(frame("leave_chat", Value::Null)).expect_err("null");
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
    }

    #[test]
    fn unknown_events_are_reported_by_name() {
        let err = ClientCommand::parse(frame("teleport", json!({}))).expect_err("unknown");
        assert_eq!(err, ProtocolError::UnknownEvent("teleport".to_string()));
    }

    #[test]
    fn ping_needs_no_payload() {
        let raw = r#"{"event":"ping"}"#;
        let parsed: Frame = serde_json::from_str(raw).expect("frame");
        assert_eq!(ClientCommand::parse(parsed).expect("ping"), ClientCommand::Ping);
    }

    #[test]
    fn send_message_payload_uses_wire_names() {
        let cmd = ClientCommand::parse(frame(
            "send_message",
            json!({"chatId": "c1", "destinatarioId": "u2", "texto": "hola", "tipo": "texto"}),
        ))
        .expect("send");
        let ClientCommand::SendMessage(payload) = cmd else {
            panic!("expected send_message");
        };
        assert_eq!(payload.chat_id, "c1");
        assert_eq!(payload.recipient_id.as_deref(), Some("u2"));
        assert_eq!(payload.kind, Some(MessageKind::Text));
    }

    #[test]
    fn presence_id_lists_are_deduplicated() {
        let cmd = ClientCommand::parse(frame("get_online_users", json!(["a", "b", "a", " "])))
            .expect("ids");
        assert_eq!(
            cmd,
            ClientCommand::GetOnlineUsers(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn server_events_serialize_as_event_and_data() {
        let event = ServerEvent::PaseoUpdated {
            walk_id: "S123".to_string(),
            estado: "EN_CURSO".to_string(),
            changed_by: "walker".to_string(),
        };
        let value: Value = serde_json::from_str(&event.to_text().expect("text")).expect("json");
        assert_eq!(
            value,
            json!({"event": "paseo_updated", "data": {"paseoId": "S123", "estado": "EN_CURSO", "changedBy": "walker"}})
        );

        let pong: Value =
            serde_json::from_str(&ServerEvent::Pong { timestamp: 7 }.to_text().expect("text"))
                .expect("json");
        assert_eq!(pong, json!({"event": "pong", "data": {"timestamp": 7}}));
    }
}
