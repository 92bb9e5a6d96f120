use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration};

use super::color;
use super::emotes;
use super::error::{ChatError, Result};
use super::events::{self, ChatEvent, EmoteMap, FollowerMode, MessageEvent, RoomState};
use super::helix::HelixClient;
use super::transport::{IrcTransport, Login, OutboundLine, TransportEvent};

const SHIELD_POLL_INTERVAL: Duration = Duration::from_secs(30);
const SHIELD_POLL_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_TIMEOUT_SECONDS: u32 = 600;

/// A moderation action against a user or a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModAction {
    Ban,
    Timeout(u32),
    Untimeout,
    Delete,
}

impl ModAction {
    /// Parse an action string: `ban`, `untimeout`, `delete`, or
    /// `timeout-<seconds>`. A timeout whose seconds fail to parse falls
    /// back to ten minutes rather than failing the whole action.
    pub fn parse(action: &str) -> Option<ModAction> {
        match action {
            "ban" => Some(ModAction::Ban),
            "untimeout" => Some(ModAction::Untimeout),
            "delete" => Some(ModAction::Delete),
            _ => action
                .strip_prefix("timeout-")
                .map(|s| ModAction::Timeout(s.parse().unwrap_or(DEFAULT_TIMEOUT_SECONDS))),
        }
    }
}

/// Room-level chat restriction toggles driven through the REST surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    Shield,
    SubsOnly,
    EmotesOnly,
    FollowersOnly,
    SlowMode,
}

/// Identity of the signed-in account behind a live connection.
struct AuthContext {
    token: String,
    login: String,
    display_name: String,
    user_id: String,
}

/// Everything owned by one live connection. Dropped wholesale on
/// disconnect.
struct Connection {
    channel: String,
    auth: Option<AuthContext>,
    outbound: mpsc::Sender<OutboundLine>,
    transport_task: JoinHandle<()>,
    pump_task: JoinHandle<()>,
    poll_task: Option<JoinHandle<()>>,
    channel_id: Arc<RwLock<Option<String>>>,
    emotes: Arc<RwLock<EmoteMap>>,
    room_state: Arc<Mutex<RoomState>>,
    auth_color: Arc<RwLock<Option<String>>>,
}

/// Stateful chat session for one channel at a time.
///
/// Owns the transport, the normalization pump, the emote catalog, the
/// room state, and the shield-mode poller. Consumers receive the merged
/// event stream over the channel given at construction and drive the
/// session through `connect`/`disconnect`/`send_message`/`moderate`/
/// `toggle_chat_mode`.
pub struct ChatSession {
    event_tx: mpsc::Sender<ChatEvent>,
    http: reqwest::Client,
    /// Bumped on every disconnect so stragglers from a previous
    /// connection (shield polls in flight, queued frames) can detect
    /// they are stale and drop their results.
    generation: Arc<AtomicU64>,
    connection: Option<Connection>,
}

impl ChatSession {
    pub fn new(event_tx: mpsc::Sender<ChatEvent>) -> Self {
        Self {
            event_tx,
            http: reqwest::Client::new(),
            generation: Arc::new(AtomicU64::new(0)),
            connection: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn channel(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.channel.as_str())
    }

    /// Login of the signed-in account, if the connection is authenticated.
    pub fn authenticated_login(&self) -> Option<&str> {
        self.connection
            .as_ref()
            .and_then(|c| c.auth.as_ref())
            .map(|a| a.login.as_str())
    }

    async fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event).await;
    }

    /// Connect to a channel, replacing any existing connection.
    ///
    /// An empty channel name is a no-op that reports "no channel" exactly
    /// once and returns `Ok`. With a token the session resolves the
    /// signed-in account first and degrades to an anonymous (read-only)
    /// connection if that fails; only a failure of the first transport
    /// connect is an error.
    pub async fn connect(&mut self, channel: &str, token: Option<&str>) -> Result<()> {
        let channel = normalize_channel(channel);
        if channel.is_empty() {
            self.emit(ChatEvent::SystemNotice {
                text: "No channel configured".to_string(),
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            })
            .await;
            return Ok(());
        }

        self.disconnect().await;
        let generation = self.generation.load(Ordering::SeqCst);

        let auth = match token {
            Some(token) => {
                let api = HelixClient::new(self.http.clone(), token.to_string());
                match api.get_current_user().await {
                    Ok(user) => Some(AuthContext {
                        token: token.to_string(),
                        login: user.login,
                        display_name: user.display_name,
                        user_id: user.id,
                    }),
                    Err(e) => {
                        log::warn!("Could not verify sign-in, connecting anonymously: {}", e);
                        self.emit(ChatEvent::SystemNotice {
                            text: "Sign-in could not be verified; connected as read-only"
                                .to_string(),
                            timestamp_ms: chrono::Utc::now().timestamp_millis(),
                        })
                        .await;
                        None
                    }
                }
            }
            None => None,
        };

        let login = match &auth {
            Some(a) => Login::Authenticated {
                login: a.login.clone(),
                token: a.token.clone(),
            },
            None => Login::Anonymous,
        };

        let (transport_tx, mut transport_rx) = mpsc::channel::<TransportEvent>(256);
        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundLine>(64);
        let transport = IrcTransport::new(channel.clone(), login);
        let transport_task = tokio::spawn(transport.run(transport_tx, outbound_rx));

        // The transport reports exactly one of Connected or Error for the
        // first attempt; frames arriving before that are login chatter.
        loop {
            match transport_rx.recv().await {
                Some(TransportEvent::Connected) => break,
                Some(TransportEvent::Frame(_)) | Some(TransportEvent::Disconnected) => continue,
                Some(TransportEvent::Error(e)) => {
                    transport_task.abort();
                    return Err(ChatError::ConnectError(e));
                }
                None => {
                    transport_task.abort();
                    return Err(ChatError::ConnectError(
                        "Transport closed before connecting".to_string(),
                    ));
                }
            }
        }
        log::info!("Connected to #{}", channel);

        let channel_id: Arc<RwLock<Option<String>>> = Arc::new(RwLock::new(None));
        let emote_map: Arc<RwLock<EmoteMap>> = Arc::new(RwLock::new(Arc::new(HashMap::new())));
        let room_state = Arc::new(Mutex::new(RoomState::default()));
        let auth_color: Arc<RwLock<Option<String>>> = Arc::new(RwLock::new(None));

        let pump_task = tokio::spawn(pump(
            transport_rx,
            self.event_tx.clone(),
            Arc::clone(&emote_map),
            Arc::clone(&room_state),
            Arc::clone(&auth_color),
        ));

        // Emote catalogs are best-effort. Helix can resolve the channel id
        // when signed in; otherwise the FFZ room payload may supply it.
        let resolved_id = match &auth {
            Some(a) => {
                let api = HelixClient::new(self.http.clone(), a.token.clone());
                match api.get_user_by_login(&channel).await {
                    Ok(user) => Some(user.id),
                    Err(e) => {
                        log::warn!("Channel id lookup failed for {}: {}", channel, e);
                        None
                    }
                }
            }
            None => None,
        };
        let catalog = emotes::fetch_all(&self.http, &channel, resolved_id.as_deref()).await;
        log::info!(
            "Loaded {} third-party emotes for #{}",
            catalog.emotes.len(),
            channel
        );
        *channel_id.write().await = catalog.channel_id;
        *emote_map.write().await = Arc::new(catalog.emotes);

        let poll_task = auth.as_ref().map(|a| {
            self.spawn_shield_poll(
                generation,
                channel.clone(),
                a.token.clone(),
                a.user_id.clone(),
                Arc::clone(&channel_id),
                Arc::clone(&room_state),
            )
        });

        self.connection = Some(Connection {
            channel,
            auth,
            outbound: outbound_tx,
            transport_task,
            pump_task,
            poll_task,
            channel_id,
            emotes: emote_map,
            room_state,
            auth_color,
        });
        Ok(())
    }

    /// Tear down the current connection. Safe to call when not connected.
    pub async fn disconnect(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let Some(connection) = self.connection.take() else {
            return;
        };
        if let Some(poll) = connection.poll_task {
            poll.abort();
        }
        connection.pump_task.abort();
        connection.transport_task.abort();
        log::info!("Disconnected from #{}", connection.channel);
    }

    /// Send a chat message. The server does not echo our own messages
    /// back, so a delivered send synthesizes the corresponding event
    /// locally; a rejected send produces no event at all. Delivery means
    /// the transport confirmed the socket write, not just that the line
    /// was queued.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let connection = self.connection.as_ref().ok_or(ChatError::NotConnected)?;
        if connection.channel.is_empty() {
            return Err(ChatError::NoChannel);
        }
        let auth = connection.auth.as_ref().ok_or(ChatError::NotAuthenticated)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        connection
            .outbound
            .send(OutboundLine {
                line: format!("PRIVMSG #{} :{}", connection.channel, text),
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| ChatError::TransportError("Connection closed".to_string()))?;
        match timeout(SEND_TIMEOUT, ack_rx).await {
            Ok(Ok(written)) => written?,
            Ok(Err(_)) => {
                return Err(ChatError::TransportError(
                    "Connection closed before the message was sent".to_string(),
                ))
            }
            Err(_) => {
                return Err(ChatError::TransportError(
                    "Timed out waiting for the message to be sent".to_string(),
                ))
            }
        }

        let color = connection
            .auth_color
            .read()
            .await
            .clone()
            .unwrap_or_else(|| color::BRAND_COLOR.to_string());
        let badges = if auth.login == connection.channel {
            vec!["broadcaster/1".to_string()]
        } else {
            Vec::new()
        };
        let third_party_emotes = connection.emotes.read().await.clone();
        self.emit(ChatEvent::Message(MessageEvent {
            username: auth.login.clone(),
            display_name: auth.display_name.clone(),
            text: text.to_string(),
            color,
            badges,
            native_emotes: HashMap::new(),
            third_party_emotes,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            message_id: None,
            first_message: false,
            bits: None,
        }))
        .await;
        Ok(())
    }

    /// Apply a moderation action to a user (or, for `delete`, a single
    /// message). Precondition failures return immediately without any
    /// network traffic or events; a failure of the actual gateway call is
    /// additionally surfaced to the consumer as a system notice.
    pub async fn moderate(
        &self,
        action: &str,
        target: &str,
        message_id: Option<&str>,
    ) -> Result<()> {
        let connection = self.connection.as_ref().ok_or(ChatError::NotConnected)?;
        let auth = connection.auth.as_ref().ok_or(ChatError::NotAuthenticated)?;
        let parsed = ModAction::parse(action)
            .ok_or_else(|| ChatError::ModerationError(format!("Unknown action '{}'", action)))?;
        if parsed == ModAction::Delete && message_id.is_none() {
            return Err(ChatError::MissingMessageId);
        }

        let api = HelixClient::new(self.http.clone(), auth.token.clone());
        let result = async {
            let broadcaster_id = resolve_channel_id(&api, connection).await?;
            match parsed {
                ModAction::Ban => {
                    let target_id = api.get_user_by_login(target).await?.id;
                    api.ban_user(&broadcaster_id, &auth.user_id, &target_id, None)
                        .await
                }
                ModAction::Timeout(seconds) => {
                    let target_id = api.get_user_by_login(target).await?.id;
                    api.ban_user(&broadcaster_id, &auth.user_id, &target_id, Some(seconds))
                        .await
                }
                ModAction::Untimeout => {
                    let target_id = api.get_user_by_login(target).await?.id;
                    api.unban_user(&broadcaster_id, &auth.user_id, &target_id)
                        .await
                }
                ModAction::Delete => {
                    let id = message_id.ok_or(ChatError::MissingMessageId)?;
                    api.delete_message(&broadcaster_id, &auth.user_id, id).await
                }
            }
        }
        .await;

        if let Err(e) = &result {
            log::warn!("Moderation action {} on {} failed: {}", action, target, e);
            self.emit(ChatEvent::SystemNotice {
                text: format!("Failed to apply {} to {}: {}", action, target, e),
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            })
            .await;
        }
        result
    }

    /// Flip or set one room-level chat restriction. `enabled` of `None`
    /// toggles relative to the last known room state; `value` carries the
    /// mode's numeric knob (follow age in minutes, slow-mode seconds).
    /// The optimistic new state is emitted as a room-state update once the
    /// gateway accepts the change; the next ROOMSTATE frame or shield poll
    /// remains authoritative.
    pub async fn toggle_chat_mode(
        &self,
        mode: ChatMode,
        enabled: Option<bool>,
        value: Option<u32>,
    ) -> Result<()> {
        let connection = self.connection.as_ref().ok_or(ChatError::NotConnected)?;
        let auth = connection.auth.as_ref().ok_or(ChatError::NotAuthenticated)?;

        let api = HelixClient::new(self.http.clone(), auth.token.clone());
        let broadcaster_id = resolve_channel_id(&api, connection).await?;
        let current = *connection.room_state.lock().await;

        // Each arm performs the REST call, then describes the single field
        // it changed. The shared state is only touched after the gateway
        // accepted the change, and only that field is written, so ROOMSTATE
        // frames merged while the call was in flight survive.
        let change: Box<dyn FnOnce(&mut RoomState) + Send> = match mode {
            ChatMode::Shield => {
                let active = enabled.unwrap_or(!current.shield_mode_active);
                api.set_shield_mode(&broadcaster_id, &auth.user_id, active)
                    .await?;
                Box::new(move |state| state.shield_mode_active = active)
            }
            ChatMode::SubsOnly => {
                let on = enabled.unwrap_or(!current.subscribers_only);
                api.update_chat_settings(
                    &broadcaster_id,
                    &auth.user_id,
                    json!({ "subscriber_mode": on }),
                )
                .await?;
                Box::new(move |state| state.subscribers_only = on)
            }
            ChatMode::EmotesOnly => {
                let on = enabled.unwrap_or(!current.emotes_only);
                api.update_chat_settings(
                    &broadcaster_id,
                    &auth.user_id,
                    json!({ "emote_mode": on }),
                )
                .await?;
                Box::new(move |state| state.emotes_only = on)
            }
            ChatMode::FollowersOnly => {
                let on =
                    enabled.unwrap_or(matches!(current.followers_only, FollowerMode::Disabled));
                if on {
                    // 0 minutes means any follower may chat; it is still
                    // an enabled state, distinct from disabled.
                    let minutes = value.unwrap_or(0);
                    api.update_chat_settings(
                        &broadcaster_id,
                        &auth.user_id,
                        json!({ "follower_mode": true, "follower_mode_duration": minutes }),
                    )
                    .await?;
                    Box::new(move |state| state.followers_only = FollowerMode::Minutes(minutes))
                } else {
                    api.update_chat_settings(
                        &broadcaster_id,
                        &auth.user_id,
                        json!({ "follower_mode": false }),
                    )
                    .await?;
                    Box::new(move |state| state.followers_only = FollowerMode::Disabled)
                }
            }
            ChatMode::SlowMode => {
                // Slow mode is seconds-to-wait with 0 meaning off; enabling
                // with no value is the same as leaving it off.
                let seconds = if enabled == Some(false) {
                    0
                } else {
                    value.unwrap_or(0)
                };
                if seconds == 0 {
                    api.update_chat_settings(
                        &broadcaster_id,
                        &auth.user_id,
                        json!({ "slow_mode": false }),
                    )
                    .await?;
                } else {
                    api.update_chat_settings(
                        &broadcaster_id,
                        &auth.user_id,
                        json!({ "slow_mode": true, "slow_mode_wait_time": seconds }),
                    )
                    .await?;
                }
                Box::new(move |state| state.slow_mode_seconds = seconds)
            }
        };

        let snapshot = commit_room_change(&connection.room_state, change).await;
        self.emit(ChatEvent::RoomStateUpdate(snapshot)).await;
        Ok(())
    }

    /// Poll shield-mode status every thirty seconds for as long as this
    /// generation is current. Results landing after a disconnect are
    /// discarded by the generation check.
    fn spawn_shield_poll(
        &self,
        generation: u64,
        channel: String,
        token: String,
        moderator_id: String,
        channel_id: Arc<RwLock<Option<String>>>,
        room_state: Arc<Mutex<RoomState>>,
    ) -> JoinHandle<()> {
        let api = HelixClient::new(self.http.clone(), token);
        let current = Arc::clone(&self.generation);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut ticker = interval(SHIELD_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                if current.load(Ordering::SeqCst) != generation {
                    return;
                }

                let broadcaster_id = { channel_id.read().await.clone() };
                let broadcaster_id = match broadcaster_id {
                    Some(id) => id,
                    None => match api.get_user_by_login(&channel).await {
                        Ok(user) => {
                            *channel_id.write().await = Some(user.id.clone());
                            user.id
                        }
                        Err(e) => {
                            log::debug!("Shield poll: channel id unresolved: {}", e);
                            continue;
                        }
                    },
                };

                match timeout(
                    SHIELD_POLL_TIMEOUT,
                    api.get_shield_mode(&broadcaster_id, &moderator_id),
                )
                .await
                {
                    Ok(Ok(active)) => {
                        if !publish_poll_result(
                            generation, &current, active, &room_state, &event_tx,
                        )
                        .await
                        {
                            return;
                        }
                    }
                    Ok(Err(e)) => log::debug!("Shield mode poll failed: {}", e),
                    Err(_) => log::debug!("Shield mode poll timed out"),
                }
            }
        })
    }
}

/// Drain the transport and forward normalized events to the consumer.
/// ROOMSTATE merges into the shared state and re-emits a full snapshot;
/// GLOBALUSERSTATE captures our own display color for echoed sends.
async fn pump(
    mut transport_rx: mpsc::Receiver<TransportEvent>,
    event_tx: mpsc::Sender<ChatEvent>,
    emote_map: Arc<RwLock<EmoteMap>>,
    room_state: Arc<Mutex<RoomState>>,
    auth_color: Arc<RwLock<Option<String>>>,
) {
    while let Some(event) = transport_rx.recv().await {
        match event {
            TransportEvent::Frame(frame) => match frame.command.as_str() {
                "ROOMSTATE" => {
                    let snapshot = {
                        let mut state = room_state.lock().await;
                        state.apply_roomstate(&frame);
                        *state
                    };
                    let _ = event_tx.send(ChatEvent::RoomStateUpdate(snapshot)).await;
                }
                "GLOBALUSERSTATE" => {
                    if let Some(c) = frame.tag("color") {
                        *auth_color.write().await = Some(c.to_string());
                    }
                }
                _ => {
                    let snapshot = emote_map.read().await.clone();
                    if let Some(event) = events::normalize(&frame, &snapshot) {
                        let _ = event_tx.send(event).await;
                    }
                }
            },
            TransportEvent::Connected => {
                log::info!("Chat connection re-established");
            }
            TransportEvent::Disconnected => {
                log::warn!("Chat connection dropped, reconnecting");
            }
            TransportEvent::Error(e) => {
                let _ = event_tx
                    .send(ChatEvent::SystemNotice {
                        text: format!("Chat connection error: {}", e),
                        timestamp_ms: chrono::Utc::now().timestamp_millis(),
                    })
                    .await;
            }
        }
    }
}

/// Fold one accepted settings change into the shared room state and
/// return the snapshot to emit. Writing only the changed field keeps
/// concurrent ROOMSTATE merges from being reverted.
async fn commit_room_change<F: FnOnce(&mut RoomState)>(
    room_state: &Mutex<RoomState>,
    change: F,
) -> RoomState {
    let mut state = room_state.lock().await;
    change(&mut state);
    *state
}

/// Fold a shield poll result into the room state and emit the update,
/// unless the session has moved to a newer generation since the poll
/// began, in which case the stale result is discarded untouched. Returns
/// whether this generation is still current.
async fn publish_poll_result(
    generation: u64,
    current: &AtomicU64,
    active: bool,
    room_state: &Mutex<RoomState>,
    event_tx: &mpsc::Sender<ChatEvent>,
) -> bool {
    if current.load(Ordering::SeqCst) != generation {
        return false;
    }
    let snapshot = {
        let mut state = room_state.lock().await;
        state.shield_mode_active = active;
        *state
    };
    let _ = event_tx.send(ChatEvent::RoomStateUpdate(snapshot)).await;
    true
}

/// Broadcaster id for the connected channel, resolved once through Helix
/// and cached on the connection for its lifetime.
async fn resolve_channel_id(api: &HelixClient, connection: &Connection) -> Result<String> {
    if let Some(id) = connection.channel_id.read().await.clone() {
        return Ok(id);
    }
    let user = api.get_user_by_login(&connection.channel).await?;
    *connection.channel_id.write().await = Some(user.id.clone());
    Ok(user.id)
}

/// Canonical channel name: trimmed, without a leading `#`, lowercased.
fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> (ChatSession, mpsc::Receiver<ChatEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (ChatSession::new(tx), rx)
    }

    fn test_connection(authenticated: bool) -> (Connection, mpsc::Receiver<OutboundLine>) {
        let (outbound, outbound_rx) = mpsc::channel(16);
        let connection = Connection {
            channel: "somechannel".to_string(),
            auth: authenticated.then(|| AuthContext {
                token: "testtoken".to_string(),
                login: "moduser".to_string(),
                display_name: "ModUser".to_string(),
                user_id: "42".to_string(),
            }),
            outbound,
            transport_task: tokio::spawn(async {}),
            pump_task: tokio::spawn(async {}),
            poll_task: None,
            channel_id: Arc::new(RwLock::new(None)),
            emotes: Arc::new(RwLock::new(Arc::new(HashMap::new()))),
            room_state: Arc::new(Mutex::new(RoomState::default())),
            auth_color: Arc::new(RwLock::new(None)),
        };
        (connection, outbound_rx)
    }

    #[test]
    fn test_mod_action_parsing() {
        assert_eq!(ModAction::parse("ban"), Some(ModAction::Ban));
        assert_eq!(ModAction::parse("untimeout"), Some(ModAction::Untimeout));
        assert_eq!(ModAction::parse("delete"), Some(ModAction::Delete));
        assert_eq!(ModAction::parse("timeout-30"), Some(ModAction::Timeout(30)));
        assert_eq!(ModAction::parse("nonsense"), None);
    }

    #[test]
    fn test_malformed_timeout_defaults_to_ten_minutes() {
        assert_eq!(
            ModAction::parse("timeout-abc"),
            Some(ModAction::Timeout(600))
        );
        assert_eq!(ModAction::parse("timeout-"), Some(ModAction::Timeout(600)));
    }

    #[test]
    fn test_channel_name_normalization() {
        assert_eq!(normalize_channel("  #SomeChannel "), "somechannel");
        assert_eq!(normalize_channel("plain"), "plain");
        assert_eq!(normalize_channel("  "), "");
        assert_eq!(normalize_channel("#"), "");
    }

    #[tokio::test]
    async fn test_connect_with_empty_channel_is_a_noop() {
        let (mut session, mut rx) = test_session();
        assert!(session.connect("   ", None).await.is_ok());
        assert!(!session.is_connected());

        // Exactly one notice, nothing else.
        assert!(matches!(
            rx.try_recv(),
            Ok(ChatEvent::SystemNotice { .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_when_never_connected_is_ok() {
        let (mut session, mut rx) = test_session();
        session.disconnect().await;
        session.disconnect().await;
        assert!(!session.is_connected());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_before_connect_is_rejected_without_event() {
        let (session, mut rx) = test_session();
        assert!(matches!(
            session.send_message("hello").await,
            Err(ChatError::NotConnected)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_on_anonymous_connection_is_rejected_without_event() {
        let (mut session, mut rx) = test_session();
        let (connection, _outbound_rx) = test_connection(false);
        session.connection = Some(connection);
        assert!(matches!(
            session.send_message("hello").await,
            Err(ChatError::NotAuthenticated)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_emits_echo_only_after_write_confirmation() {
        let (mut session, mut rx) = test_session();
        let (connection, mut outbound_rx) = test_connection(true);
        session.connection = Some(connection);

        tokio::spawn(async move {
            let item = outbound_rx.recv().await.unwrap();
            assert_eq!(item.line, "PRIVMSG #somechannel :hello");
            if let Some(ack) = item.ack {
                let _ = ack.send(Ok(()));
            }
        });

        session.send_message("hello").await.unwrap();
        let Ok(ChatEvent::Message(msg)) = rx.try_recv() else {
            panic!("expected the synthetic echo event");
        };
        assert_eq!(msg.username, "moduser");
        assert_eq!(msg.display_name, "ModUser");
        assert_eq!(msg.text, "hello");
        assert!(!msg.color.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_write_emits_no_synthetic_event() {
        let (mut session, mut rx) = test_session();
        let (connection, mut outbound_rx) = test_connection(true);
        session.connection = Some(connection);

        // The socket write fails mid-reconnect; queuing alone is not a send.
        tokio::spawn(async move {
            let item = outbound_rx.recv().await.unwrap();
            if let Some(ack) = item.ack {
                let _ = ack.send(Err(ChatError::TransportError("write failed".to_string())));
            }
        });

        assert!(matches!(
            session.send_message("hello").await,
            Err(ChatError::TransportError(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_transport_shutdown_emits_no_synthetic_event() {
        let (mut session, mut rx) = test_session();
        let (connection, outbound_rx) = test_connection(true);
        drop(outbound_rx);
        session.connection = Some(connection);

        assert!(matches!(
            session.send_message("hello").await,
            Err(ChatError::TransportError(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_without_message_id_fails_before_any_network() {
        let (mut session, mut rx) = test_session();
        let (connection, _outbound_rx) = test_connection(true);
        session.connection = Some(connection);
        assert!(matches!(
            session.moderate("delete", "someuser", None).await,
            Err(ChatError::MissingMessageId)
        ));
        // Precondition failures produce no system notice.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_moderation_action_is_rejected() {
        let (mut session, _rx) = test_session();
        let (connection, _outbound_rx) = test_connection(true);
        session.connection = Some(connection);
        assert!(matches!(
            session.moderate("shout", "someuser", None).await,
            Err(ChatError::ModerationError(_))
        ));
    }

    #[tokio::test]
    async fn test_moderate_without_auth_is_rejected() {
        let (mut session, _rx) = test_session();
        let (connection, _outbound_rx) = test_connection(false);
        session.connection = Some(connection);
        assert!(matches!(
            session.moderate("ban", "someuser", None).await,
            Err(ChatError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_invalidates_generation_and_stops_poll() {
        let (mut session, _rx) = test_session();
        let (mut connection, _outbound_rx) = test_connection(true);
        connection.poll_task = Some(tokio::spawn(async {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        }));
        let before = session.generation.load(Ordering::SeqCst);
        session.connection = Some(connection);

        session.disconnect().await;
        assert!(!session.is_connected());
        assert_eq!(session.generation.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_stale_poll_result_is_discarded_after_disconnect() {
        let (tx, mut rx) = mpsc::channel(16);
        let current = AtomicU64::new(0);
        let room_state = Mutex::new(RoomState::default());

        // A result from the live generation lands normally.
        assert!(publish_poll_result(0, &current, true, &room_state, &tx).await);
        assert!(matches!(
            rx.try_recv(),
            Ok(ChatEvent::RoomStateUpdate(state)) if state.shield_mode_active
        ));

        // Disconnect bumps the generation while a poll is in flight; the
        // late result must neither emit nor touch the shared state.
        current.fetch_add(1, Ordering::SeqCst);
        assert!(!publish_poll_result(0, &current, false, &room_state, &tx).await);
        assert!(rx.try_recv().is_err());
        assert!(room_state.lock().await.shield_mode_active);
    }

    #[tokio::test]
    async fn test_settings_change_keeps_concurrent_roomstate_merge() {
        let room_state = Mutex::new(RoomState::default());
        // Snapshot read before the REST call went out.
        let stale = *room_state.lock().await;
        assert!(!stale.subscribers_only);

        // A ROOMSTATE frame lands while the call is in flight.
        room_state.lock().await.slow_mode_seconds = 30;

        let snapshot =
            commit_room_change(&room_state, |state| state.subscribers_only = true).await;
        assert!(snapshot.subscribers_only);
        assert_eq!(snapshot.slow_mode_seconds, 30);
        assert_eq!(room_state.lock().await.slow_mode_seconds, 30);
    }
}
