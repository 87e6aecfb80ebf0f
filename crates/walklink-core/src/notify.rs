use crate::error::NotifyError;
use async_trait::async_trait;
use serde::Serialize;

pub const NOTIFICATION_PREVIEW_CHARS: usize = 80;

/// Out-of-band chat notification handed to the push service.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatNotification {
    #[serde(rename = "recipientId")]
    pub recipient_id: String,
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(rename = "senderId")]
    pub sender_id: String,
    #[serde(rename = "senderName")]
    pub sender_name: String,
    pub preview: String,
}

impl ChatNotification {
    pub fn new(
        recipient_id: &str,
        chat_id: &str,
        sender_id: &str,
        sender_name: &str,
        body: &str,
    ) -> Self {
        Self {
            recipient_id: recipient_id.to_string(),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            preview: truncate_chars(body, NOTIFICATION_PREVIEW_CHARS),
        }
    }
}

/// Truncates on character boundaries.
pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_chat_message(&self, notification: &ChatNotification)
        -> Result<(), NotifyError>;
}
