use crate::hub::Hub;
use crate::rooms::RoomKey;
use crate::session::{Client, Identity};
use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walklink_core::geo::now_ms;
use walklink_core::protocol::{PresenceEvent, ServerEvent};
use walklink_core::{HubError, MemberPatch, PresenceStatus};

fn presence_event(identity: &Identity, status: PresenceStatus, with_name: bool) -> PresenceEvent {
    PresenceEvent {
        user_id: identity.uid.clone(),
        user_name: with_name.then(|| identity.display_name.clone()),
        status: status.as_str().to_string(),
        timestamp: now_ms(),
    }
}

impl Hub {
    pub(crate) async fn on_connect(self: &Arc<Self>, client: &Arc<Client>, first: bool) {
        if !first {
            let sessions = self.registry.connections_for(client.uid()).await.len();
            debug!(event = "presence_extra_connection", uid = %client.uid(), sessions = sessions);
            return;
        }
        let identity = &client.identity;
        if let Err(err) = self
            .store
            .set_user_presence(&identity.uid, PresenceStatus::Online, Utc::now())
            .await
        {
            warn!(event = "presence_write_failed", uid = %identity.uid, error = %err);
        }
        self.broadcast_all(
            &ServerEvent::UserConnected(presence_event(identity, PresenceStatus::Online, true)),
            Some(client.conn_id.as_str()),
        )
        .await;
        self.rooms
            .broadcast(
                &RoomKey::Presence(identity.uid.clone()),
                &ServerEvent::UserStatusChanged(presence_event(
                    identity,
                    PresenceStatus::Online,
                    false,
                )),
                Some(client.conn_id.as_str()),
            )
            .await;
    }

    /// Schedules the offline sweep when the user's last connection is gone.
    pub(crate) async fn on_disconnect(
        self: &Arc<Self>,
        client: &Arc<Client>,
        last: bool,
    ) -> Option<JoinHandle<()>> {
        if !last {
            return None;
        }
        let hub = self.clone();
        let identity = client.identity.clone();
        Some(tokio::spawn(async move {
            hub.sweep_disconnected(&identity).await;
        }))
    }

    pub(crate) async fn sweep_disconnected(&self, identity: &Identity) {
        // A reconnect may land between unregister and this task running.
        if self.registry.is_online(&identity.uid).await {
            debug!(event = "disconnect_sweep_skipped", uid = %identity.uid);
            return;
        }
        if let Err(err) = self
            .store
            .set_user_presence(&identity.uid, PresenceStatus::Offline, Utc::now())
            .await
        {
            warn!(event = "presence_write_failed", uid = %identity.uid, error = %err);
        }
        self.broadcast_all(
            &ServerEvent::UserDisconnected(presence_event(
                identity,
                PresenceStatus::Offline,
                true,
            )),
            None,
        )
        .await;
        self.rooms
            .broadcast(
                &RoomKey::Presence(identity.uid.clone()),
                &ServerEvent::UserStatusChanged(presence_event(
                    identity,
                    PresenceStatus::Offline,
                    false,
                )),
                None,
            )
            .await;

        let chat_ids = match self.store.chats_for_participant(&identity.uid).await {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "disconnect_sweep_failed", uid = %identity.uid, error = %err);
                return;
            }
        };
        let patch = MemberPatch::disconnected();
        let results = join_all(chat_ids.iter().map(|chat_id| {
            let patch = &patch;
            async move {
                let outcome = self
                    .store
                    .update_chat_member(chat_id, &identity.uid, patch)
                    .await;
                if let Err(err) = &outcome {
                    warn!(
                        event = "disconnect_chat_update_failed",
                        uid = %identity.uid,
                        chat_id = %chat_id,
                        error = %err
                    );
                }
                outcome.is_ok()
            }
        }))
        .await;
        let cleared = results.iter().filter(|ok| **ok).count();
        info!(
            event = "disconnect_sweep",
            uid = %identity.uid,
            chats = chat_ids.len(),
            cleared = cleared
        );
    }

    pub(crate) async fn online_users(
        &self,
        client: &Arc<Client>,
        uids: &[String],
    ) -> Result<(), HubError> {
        let online = self.registry.online_subset(uids).await;
        debug!(
            event = "presence_query",
            conn_id = %client.conn_id,
            asked = uids.len(),
            online = online.len()
        );
        client.send_event(&ServerEvent::OnlineUsers(online)).await;
        Ok(())
    }

    pub(crate) async fn subscribe_presence(&self, client: &Arc<Client>, uids: &[String]) {
        for uid in uids {
            self.rooms.join(RoomKey::Presence(uid.clone()), client).await;
        }
        debug!(event = "presence_subscribe", conn_id = %client.conn_id, count = uids.len());
    }

    pub(crate) async fn unsubscribe_presence(&self, client: &Arc<Client>, uids: &[String]) {
        for uid in uids {
            self.rooms
                .leave(&RoomKey::Presence(uid.clone()), &client.conn_id)
                .await;
        }
        debug!(event = "presence_unsubscribe", conn_id = %client.conn_id, count = uids.len());
    }

    async fn broadcast_all(&self, event: &ServerEvent, exclude: Option<&str>) {
        let text = match event.to_text() {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "encode_error", error = %err);
                return;
            }
        };
        for client in self.registry.snapshot().await {
            if exclude == Some(client.conn_id.as_str()) {
                continue;
            }
            if !client.send_text(&text).await {
                warn!(event = "send_error", conn_id = %client.conn_id);
            }
        }
    }
}
