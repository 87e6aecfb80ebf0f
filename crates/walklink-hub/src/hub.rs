use crate::config::Config;
use crate::rooms::{RoomKey, RoomTable};
use crate::session::{authenticate, Client, Identity, SessionRegistry};
use crate::status_cache::StatusCache;
use crate::throttle::LocationThrottle;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walklink_core::geo::now_ms;
use walklink_core::protocol::{ClientCommand, Frame, ProtocolError, ServerEvent, MAX_FRAME_BYTES};
use walklink_core::{HubError, IdentityVerifier, Notifier, RecordStore};

const OUTBOUND_QUEUE: usize = 256;
const UNKNOWN_EVENT_CODE: &str = "unknown_event";

pub struct Hub {
    pub config: Config,
    pub store: Arc<dyn RecordStore>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub notifier: Arc<dyn Notifier>,
    pub registry: SessionRegistry,
    pub rooms: RoomTable,
    pub status_cache: StatusCache,
    pub throttle: LocationThrottle,
}

impl Hub {
    pub fn new(
        config: Config,
        store: Arc<dyn RecordStore>,
        verifier: Arc<dyn IdentityVerifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            status_cache: StatusCache::new(config.status_ttl),
            throttle: LocationThrottle::new(config.throttle_window),
            registry: SessionRegistry::new(),
            rooms: RoomTable::new(),
            config,
            store,
            verifier,
            notifier,
        }
    }

    /// Registers an authenticated connection and runs the connect lifecycle.
    pub async fn attach(
        self: &Arc<Self>,
        identity: Identity,
        sender: mpsc::Sender<Message>,
    ) -> Arc<Client> {
        let client = Arc::new(Client::new(
            self.registry.next_conn_id(),
            identity,
            sender,
        ));
        let first = self.registry.register(client.clone()).await;
        self.rooms
            .join(RoomKey::User(client.uid().to_string()), &client)
            .await;
        self.on_connect(&client, first).await;
        client
    }

    /// Idempotent; the disconnect lifecycle runs once per connection.
    pub async fn detach(self: &Arc<Self>, client: &Arc<Client>, reason: &str) {
        let Some(last) = self.registry.unregister(client).await else {
            return;
        };
        self.rooms.leave_all(&client.conn_id).await;
        info!(
            event = "client_disconnected",
            conn_id = %client.conn_id,
            uid = %client.uid(),
            reason = reason
        );
        let _ = self.on_disconnect(client, last).await;
    }

    pub async fn handle_socket(
        self: Arc<Self>,
        socket: WebSocket,
        token: Option<String>,
        remote: SocketAddr,
    ) {
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
        let write_timeout = self.config.write_timeout;
        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                let send = ws_sender.send(msg);
                if tokio::time::timeout(write_timeout, send).await.is_err() || closing {
                    return;
                }
            }
        });

        let identity = match authenticate(
            self.verifier.as_ref(),
            self.store.as_ref(),
            token.as_deref(),
        )
        .await
        {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "auth_failed", remote = %remote, reason = %err);
                let _ = tx
                    .send(Message::Close(Some(CloseFrame {
                        code: crate::session::CLOSE_POLICY_VIOLATION,
                        reason: err.to_string().into(),
                    })))
                    .await;
                drop(tx);
                let _ = write_task.await;
                return;
            }
        };

        debug!(
            event = "auth_ok",
            remote = %remote,
            uid = %identity.uid,
            email = identity.email.as_deref().unwrap_or("")
        );
        let client = self.attach(identity, tx.clone()).await;
        self.clone().start_ping(client.clone());

        while let Some(result) = ws_receiver.next().await {
            let msg = match result {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "read_error", conn_id = %client.conn_id, error = %err);
                    break;
                }
            };
            let text = match msg {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!(event = "message_invalid", conn_id = %client.conn_id);
                        continue;
                    }
                },
                Message::Close(_) => {
                    info!(event = "client_close", conn_id = %client.conn_id);
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    client.touch().await;
                    continue;
                }
            };
            client.touch().await;
            if text.len() > MAX_FRAME_BYTES {
                warn!(event = "message_too_large", conn_id = %client.conn_id, size = text.len());
                continue;
            }
            if self.config.debug {
                debug!(event = "message_received", conn_id = %client.conn_id, raw = %text);
            }
            self.accept_frame(&client, &text).await;
        }

        self.detach(&client, "disconnect").await;
        drop(tx);
        let _ = write_task.await;
    }

    /// Decodes one inbound frame and runs its command on its own task.
    pub async fn accept_frame(self: &Arc<Self>, client: &Arc<Client>, raw: &str) {
        let frame: Frame = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "message_invalid", conn_id = %client.conn_id, error = %err);
                client
                    .send_event(&ServerEvent::error("validation_failed", "Mensaje inválido"))
                    .await;
                return;
            }
        };
        let command = match ClientCommand::parse(frame) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "command_invalid", conn_id = %client.conn_id, error = %err);
                let event = match &err {
                    ProtocolError::UnknownEvent(name) => {
                        ServerEvent::error(UNKNOWN_EVENT_CODE, format!("Evento desconocido: {name}"))
                    }
                    ProtocolError::InvalidPayload { .. } => {
                        ServerEvent::error("validation_failed", "Datos inválidos")
                    }
                };
                client.send_event(&event).await;
                return;
            }
        };
        let hub = self.clone();
        let client = client.clone();
        tokio::spawn(async move {
            hub.run_command(&client, command).await;
        });
    }

    pub async fn run_command(self: &Arc<Self>, client: &Arc<Client>, command: ClientCommand) {
        let name = command.name();
        if let Err(err) = self.dispatch(client, command).await {
            let message = err.public_message(upstream_message(name));
            match &err {
                HubError::Upstream(_) => warn!(
                    event = "command_failed",
                    command = name,
                    conn_id = %client.conn_id,
                    uid = %client.uid(),
                    error = %err
                ),
                _ => debug!(
                    event = "command_rejected",
                    command = name,
                    conn_id = %client.conn_id,
                    uid = %client.uid(),
                    code = err.code(),
                    reason = %message
                ),
            }
            client
                .send_event(&ServerEvent::error(err.code(), message))
                .await;
        }
    }

    pub async fn dispatch(
        self: &Arc<Self>,
        client: &Arc<Client>,
        command: ClientCommand,
    ) -> Result<(), HubError> {
        match command {
            ClientCommand::JoinChat(chat_id) => self.join_chat(client, &chat_id).await,
            ClientCommand::LeaveChat(chat_id) => self.leave_chat(client, &chat_id).await,
            ClientCommand::SendMessage(payload) => self.send_message(client, payload).await,
            ClientCommand::Typing(chat_id) => self.typing(client, &chat_id, true).await,
            ClientCommand::StopTyping(chat_id) => self.typing(client, &chat_id, false).await,
            ClientCommand::MarkRead(payload) => self.mark_read(client, payload).await,
            ClientCommand::ResetUnread(chat_id) => self.reset_unread(client, &chat_id).await,
            ClientCommand::JoinPaseo(walk_id) => self.join_walk(client, &walk_id).await,
            ClientCommand::UpdateLocation(payload) => self.update_location(client, payload).await,
            ClientCommand::PaseoEstadoChange(payload) => {
                self.change_walk_status(client, payload).await
            }
            ClientCommand::GetOnlineUsers(uids) => self.online_users(client, &uids).await,
            ClientCommand::SubscribePresence(uids) => {
                self.subscribe_presence(client, &uids).await;
                Ok(())
            }
            ClientCommand::UnsubscribePresence(uids) => {
                self.unsubscribe_presence(client, &uids).await;
                Ok(())
            }
            ClientCommand::Ping => {
                client
                    .send_event(&ServerEvent::Pong {
                        timestamp: now_ms(),
                    })
                    .await;
                Ok(())
            }
        }
    }

    fn start_ping(self: Arc<Self>, client: Arc<Client>) {
        if self.config.ping_interval.is_zero() {
            return;
        }
        let interval = self.config.ping_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !self.registry.is_connected(&client.conn_id).await {
                    return;
                }
                if client.sender.send(Message::Ping(Vec::new())).await.is_err() {
                    warn!(event = "ping_failed", conn_id = %client.conn_id);
                    self.detach(&client, "ping_failed").await;
                    return;
                }
            }
        });
    }

    pub fn start_stale_reaper(self: Arc<Self>) {
        if self.config.stale_after.is_zero() {
            return;
        }
        let stale_after = self.config.stale_after;
        let interval = stale_after / 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for client in self.registry.snapshot().await {
                    let last_seen = client.last_seen().await;
                    if Instant::now().duration_since(last_seen) > stale_after {
                        warn!(event = "stale_close", conn_id = %client.conn_id);
                        client.close("stale").await;
                        self.detach(&client, "stale").await;
                    }
                }
            }
        });
    }
}

/// Caller-facing reason for upstream failures, per command.
fn upstream_message(command: &str) -> &'static str {
    match command {
        "join_chat" => "Error al unirse al chat",
        "send_message" => "Error al enviar mensaje",
        "mark_read" => "Error al marcar mensaje como leído",
        "join_paseo" => "Error al unirse al paseo",
        "update_location" => "Error al actualizar ubicación",
        "paseo_estado_change" => "Error al actualizar estado del paseo",
        _ => "Error interno del servidor",
    }
}
