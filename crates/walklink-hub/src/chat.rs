use crate::hub::Hub;
use crate::rooms::RoomKey;
use crate::session::Client;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walklink_core::notify::truncate_chars;
use walklink_core::protocol::{MarkReadPayload, MessageEvent, SendMessagePayload, ServerEvent};
use walklink_core::{
    ChatNotification, ChatRoomRecord, GeoPoint, HubError, MemberPatch, MemberState, MessageKind,
    NewChatMessage, Notifier, RecordStore,
};

pub const CHAT_NOT_FOUND: &str = "Chat no encontrado";
pub const NOT_AUTHORIZED: &str = "No autorizado";
pub const EMPTY_MESSAGE: &str = "Mensaje vacío";
pub const MESSAGE_NOT_FOUND: &str = "Mensaje no encontrado";
pub const INVALID_RECIPIENT: &str = "Destinatario inválido";
const PREVIEW_CHARS: usize = 100;
const MEDIA_PREVIEW: &str = "[Media]";

/// Message content after trimming, before any store access.
#[derive(Debug, Clone, PartialEq)]
struct MessageContent {
    text: String,
    image_url: Option<String>,
    location: Option<GeoPoint>,
    kind: MessageKind,
}

impl MessageContent {
    fn from_payload(payload: &SendMessagePayload) -> Result<Self, HubError> {
        let text = payload.text.clone().unwrap_or_default();
        let image_url = payload
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        let location = match (payload.latitude, payload.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint::new(latitude, longitude)),
            _ => None,
        };
        if text.trim().is_empty() && image_url.is_none() && location.is_none() {
            return Err(HubError::validation(EMPTY_MESSAGE));
        }
        if location.is_some_and(|point| !point.is_valid()) {
            return Err(HubError::validation(
                walklink_core::location::INVALID_COORDINATES,
            ));
        }
        let kind = payload.kind.unwrap_or(if location.is_some() {
            MessageKind::Location
        } else if image_url.is_some() {
            MessageKind::Image
        } else {
            MessageKind::Text
        });
        Ok(Self {
            text,
            image_url,
            location,
            kind,
        })
    }

    fn preview(&self) -> String {
        if self.text.trim().is_empty() {
            MEDIA_PREVIEW.to_string()
        } else {
            truncate_chars(&self.text, PREVIEW_CHARS)
        }
    }
}

impl Hub {
    async fn participant_chat(&self, chat_id: &str, uid: &str) -> Result<ChatRoomRecord, HubError> {
        let chat = self
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| HubError::not_found(CHAT_NOT_FOUND))?;
        if !chat.is_participant(uid) {
            return Err(HubError::authorization(NOT_AUTHORIZED));
        }
        Ok(chat)
    }

    pub(crate) async fn join_chat(
        self: &Arc<Self>,
        client: &Arc<Client>,
        chat_id: &str,
    ) -> Result<(), HubError> {
        let chat_id = chat_id.trim();
        self.rooms
            .join_with(RoomKey::Chat(chat_id.to_string()), client, || async {
                self.participant_chat(chat_id, client.uid()).await?;
                self.store
                    .update_chat_member(chat_id, client.uid(), &MemberPatch::joined(chat_id))
                    .await?;
                Ok::<_, HubError>(ServerEvent::JoinedChat {
                    chat_id: chat_id.to_string(),
                })
            })
            .await?;
        info!(event = "chat_join", chat_id = chat_id, uid = %client.uid());
        Ok(())
    }

    pub(crate) async fn leave_chat(
        self: &Arc<Self>,
        client: &Arc<Client>,
        chat_id: &str,
    ) -> Result<(), HubError> {
        let chat_id = chat_id.trim();
        self.rooms
            .leave(&RoomKey::Chat(chat_id.to_string()), &client.conn_id)
            .await;
        self.participant_chat(chat_id, client.uid()).await?;
        self.store
            .update_chat_member(chat_id, client.uid(), &MemberPatch::left())
            .await?;
        info!(event = "chat_leave", chat_id = chat_id, uid = %client.uid());
        Ok(())
    }

    pub(crate) async fn send_message(
        self: &Arc<Self>,
        client: &Arc<Client>,
        payload: SendMessagePayload,
    ) -> Result<(), HubError> {
        let content = MessageContent::from_payload(&payload)?;
        let chat_id = payload.chat_id.trim().to_string();
        let chat = self.participant_chat(&chat_id, client.uid()).await?;

        let recipient_id = payload
            .recipient_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| chat.other_participant(client.uid()).map(str::to_string))
            .ok_or_else(|| HubError::validation(INVALID_RECIPIENT))?;
        if !chat.is_participant(&recipient_id) {
            return Err(HubError::authorization(NOT_AUTHORIZED));
        }

        let sent_at = Utc::now();
        let preview = content.preview();
        let new_message = NewChatMessage {
            chat_id: chat_id.clone(),
            sender_id: client.uid().to_string(),
            recipient_id: recipient_id.clone(),
            kind: content.kind,
            text: content.text,
            image_url: content.image_url,
            location: content.location,
            sent_at,
            expires_at: NewChatMessage::expiry_for(sent_at),
        };
        let message_id = self.store.insert_message(&new_message).await?;
        let message = new_message.into_message(message_id);

        let delivered = self
            .rooms
            .broadcast(
                &RoomKey::Chat(chat_id.clone()),
                &ServerEvent::NewMessage(MessageEvent::from_message(
                    &message,
                    &client.identity.display_name,
                )),
                None,
            )
            .await;
        info!(
            event = "chat_message",
            chat_id = %chat_id,
            message_id = %message.id,
            uid = %client.uid(),
            delivered = delivered
        );

        if let Err(err) = self
            .store
            .record_message_sent(&chat_id, &recipient_id, &preview, sent_at)
            .await
        {
            warn!(event = "chat_counters_failed", chat_id = %chat_id, error = %err);
        }

        let notification = ChatNotification::new(
            &recipient_id,
            &chat_id,
            client.uid(),
            &client.identity.display_name,
            &preview,
        );
        let store = self.store.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            notify_if_away(store.as_ref(), notifier.as_ref(), &notification).await;
        });
        Ok(())
    }

    pub(crate) async fn typing(
        self: &Arc<Self>,
        client: &Arc<Client>,
        chat_id: &str,
        typing: bool,
    ) -> Result<(), HubError> {
        let chat_id = chat_id.trim();
        let key = RoomKey::Chat(chat_id.to_string());
        if !self.rooms.is_member(&key, &client.conn_id).await {
            return Err(HubError::authorization(NOT_AUTHORIZED));
        }
        let (event, state) = if typing {
            (
                ServerEvent::UserTyping {
                    user_id: client.uid().to_string(),
                    user_name: client.identity.display_name.clone(),
                    chat_id: chat_id.to_string(),
                },
                MemberState::Typing,
            )
        } else {
            (
                ServerEvent::UserStopTyping {
                    user_id: client.uid().to_string(),
                    chat_id: chat_id.to_string(),
                },
                MemberState::Online,
            )
        };
        self.rooms
            .broadcast(&key, &event, Some(client.conn_id.as_str()))
            .await;
        if let Err(err) = self
            .store
            .update_chat_member(chat_id, client.uid(), &MemberPatch::state(state))
            .await
        {
            warn!(event = "typing_state_failed", chat_id = chat_id, error = %err);
        }
        Ok(())
    }

    pub(crate) async fn mark_read(
        self: &Arc<Self>,
        client: &Arc<Client>,
        payload: MarkReadPayload,
    ) -> Result<(), HubError> {
        let chat_id = payload.chat_id.trim();
        let message_id = payload.message_id.trim();
        self.participant_chat(chat_id, client.uid()).await?;
        if self
            .store
            .get_message(chat_id, message_id)
            .await?
            .is_none()
        {
            return Err(HubError::not_found(MESSAGE_NOT_FOUND));
        }
        self.store.mark_message_read(chat_id, message_id).await?;
        self.rooms
            .broadcast(
                &RoomKey::Chat(chat_id.to_string()),
                &ServerEvent::MessageRead {
                    message_id: message_id.to_string(),
                    read_by: client.uid().to_string(),
                },
                Some(client.conn_id.as_str()),
            )
            .await;
        debug!(event = "message_read", chat_id = chat_id, message_id = message_id);
        Ok(())
    }

    pub(crate) async fn reset_unread(
        self: &Arc<Self>,
        client: &Arc<Client>,
        chat_id: &str,
    ) -> Result<(), HubError> {
        let chat_id = chat_id.trim();
        self.participant_chat(chat_id, client.uid()).await?;
        self.store.reset_unread(chat_id, client.uid()).await?;
        debug!(event = "unread_reset", chat_id = chat_id, uid = %client.uid());
        Ok(())
    }
}

/// Hands the message to the notifier unless the recipient is looking at
/// this very chat. Failures stay in the logs.
pub(crate) async fn notify_if_away(
    store: &dyn RecordStore,
    notifier: &dyn Notifier,
    notification: &ChatNotification,
) -> bool {
    let chat = match store.get_chat(&notification.chat_id).await {
        Ok(Some(value)) => value,
        Ok(None) => {
            warn!(event = "notify_skipped", chat_id = %notification.chat_id, reason = "chat_missing");
            return false;
        }
        Err(err) => {
            warn!(event = "notify_lookup_failed", chat_id = %notification.chat_id, error = %err);
            return false;
        }
    };
    if recipient_is_viewing(&chat, &notification.recipient_id) {
        debug!(
            event = "notify_suppressed",
            chat_id = %notification.chat_id,
            recipient = %notification.recipient_id
        );
        return false;
    }
    match notifier.notify_chat_message(notification).await {
        Ok(()) => true,
        Err(err) => {
            warn!(
                event = "notify_failed",
                chat_id = %notification.chat_id,
                recipient = %notification.recipient_id,
                error = %err
            );
            false
        }
    }
}

fn recipient_is_viewing(chat: &ChatRoomRecord, recipient_id: &str) -> bool {
    let present = chat
        .member_state(recipient_id)
        .map(|state| state.is_present())
        .unwrap_or(false);
    present && chat.open_chat_for(recipient_id) == Some(chat.chat_id.as_str())
}
