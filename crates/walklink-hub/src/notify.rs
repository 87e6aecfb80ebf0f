use async_trait::async_trait;
use std::time::Duration;
use tracing::info;
use walklink_core::{ChatNotification, NotifyError, Notifier};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_chat_message(&self, notification: &ChatNotification) -> Result<(), NotifyError> {
        info!(
            event = "chat_notification",
            recipient = %notification.recipient_id,
            chat_id = %notification.chat_id,
            sender = %notification.sender_id,
            preview = %notification.preview
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to a push relay.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_chat_message(&self, notification: &ChatNotification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}
