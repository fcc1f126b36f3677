use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::{select, sync::mpsc::UnboundedSender};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    app::AppState,
    auth::AuthUser,
    player::{PlayerUsername, normalize_username},
    protocol::PushFrame,
};

pub type SessionId = Uuid;

/// Per-user addressable push delivery. Sends are fire-and-forget: a player
/// without a live session simply misses the frame and resyncs over REST.
pub trait ChannelService {
    fn push_to(&self, player: &PlayerUsername, frame: &PushFrame);
}

pub type ArcChannelService = Arc<Box<dyn ChannelService + Send + Sync>>;

struct SessionEntry {
    sender: UnboundedSender<String>,
    cancellation_token: CancellationToken,
}

pub struct WsChannelService {
    sessions: DashMap<SessionId, SessionEntry>,
    session_to_player: DashMap<SessionId, String>,
    player_to_session: DashMap<String, SessionId>,
}

impl WsChannelService {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            session_to_player: DashMap::new(),
            player_to_session: DashMap::new(),
        }
    }

    /// Binds a session to the player resolved at handshake. A newer session
    /// replaces an older one for the same player.
    pub fn register_session(
        &self,
        session: SessionId,
        player: &PlayerUsername,
        sender: UnboundedSender<String>,
        cancellation_token: CancellationToken,
    ) {
        let key = normalize_username(player);
        if let Some((_, old_session)) = self.player_to_session.remove(&key) {
            self.remove_session(&old_session);
        }
        self.sessions.insert(
            session,
            SessionEntry {
                sender,
                cancellation_token,
            },
        );
        self.session_to_player.insert(session, key.clone());
        self.player_to_session.insert(key, session);
        log::info!("Session {} bound to player {}", session, player);
    }

    pub fn remove_session(&self, session: &SessionId) {
        if let Some((_, entry)) = self.sessions.remove(session) {
            entry.cancellation_token.cancel();
        }
        if let Some((_, player)) = self.session_to_player.remove(session) {
            // Only unmap the player if they still point at this session;
            // a replacement session may already have taken the slot.
            if self
                .player_to_session
                .get(&player)
                .is_some_and(|entry| entry.value() == session)
            {
                self.player_to_session.remove(&player);
            }
        }
    }
}

impl Default for WsChannelService {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelService for WsChannelService {
    fn push_to(&self, player: &PlayerUsername, frame: &PushFrame) {
        let key = normalize_username(player);
        let Some(session) = self.player_to_session.get(&key).map(|entry| *entry.value()) else {
            log::debug!("No live session for {}, dropping push", player);
            return;
        };
        let Some(entry) = self.sessions.get(&session) else {
            return;
        };
        let json = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(e) => {
                log::error!("Failed to serialize push frame: {}", e);
                return;
            }
        };
        if entry.sender.send(json).is_err() {
            log::debug!("Session {} for {} is gone", session, player);
        }
    }
}

impl ChannelService for Arc<WsChannelService> {
    fn push_to(&self, player: &PlayerUsername, frame: &PushFrame) {
        self.as_ref().push_to(player, frame)
    }
}

/// `GET /ws` — the bearer token is validated during the upgrade and its
/// subject becomes the session's routing identity.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    auth: AuthUser,
    State(app): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, auth.username, app))
}

async fn handle_socket(socket: WebSocket, player: PlayerUsername, app: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let session = Uuid::new_v4();
    let cancellation_token = CancellationToken::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    app.ws
        .register_session(session, &player, tx, cancellation_token.clone());

    let send_token = cancellation_token.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = select! {
            msg = rx.recv() => msg,
            _ = send_token.cancelled() => None,
        } {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
        send_token.cancel();
    });

    let receive_token = cancellation_token.clone();
    let receive_task = tokio::spawn(async move {
        while let Some(msg) = select! {
            msg = ws_receiver.next() => msg,
            _ = receive_token.cancelled() => None,
        } {
            match msg {
                // The push channel is one-way; clients act over REST.
                Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {}
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
        receive_token.cancel();
    });

    let _ = tokio::join!(send_task, receive_task);
    app.ws.remove_session(&session);
    log::info!("Session {} for {} closed", session, player);
}

#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockChannelService {
    sent: Arc<std::sync::Mutex<Vec<(PlayerUsername, PushFrame)>>>,
}

#[cfg(test)]
impl MockChannelService {
    pub fn sent_frames(&self) -> Vec<(PlayerUsername, PushFrame)> {
        self.sent.lock().expect("Failed to lock mock channel").clone()
    }

    pub fn frames_for(&self, player: &str) -> Vec<PushFrame> {
        self.sent_frames()
            .into_iter()
            .filter(|(to, _)| normalize_username(to) == normalize_username(player))
            .map(|(_, frame)| frame)
            .collect()
    }
}

#[cfg(test)]
impl ChannelService for MockChannelService {
    fn push_to(&self, player: &PlayerUsername, frame: &PushFrame) {
        self.sent
            .lock()
            .expect("Failed to lock mock channel")
            .push((player.clone(), frame.clone()));
    }
}
