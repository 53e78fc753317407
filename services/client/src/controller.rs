//! Drives one chat session from login to logout.
//!
//! The controller owns the transport, the router, the roster and the session
//! store. Every operation takes `&mut self`, so at most one login, resume or
//! reconnect attempt is ever in flight and a stale response cannot land on a
//! newer session. Presentation updates are queued and handed out one at a
//! time by [`ChatSessionController::next_update`].

use crate::api::{ApiError, ChatApi, ServerConfig};
use crate::ws::{CloseInfo, CloseKind, ConnectionState, TransportClient, TransportError, TransportEvent};
use chatroom_core::command::{FeatureCommand, Outbound, classify};
use chatroom_core::identity::{
    ValidationError, validate_nickname, validate_password, validate_registration, validate_server,
};
use chatroom_core::markup::format_chat_body;
use chatroom_core::protocol::{ClientFrame, InboundEvent, MusicAction};
use chatroom_core::roster::Roster;
use chatroom_core::router::{ContentPolicy, MessageRouter, RenderAction, Viewport};
use chatroom_core::session::{SessionIdPolicy, SessionStore};
use chatroom_core::weather::{EFFECT_DURATION, WeatherCategory};
use chrono::{SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Sender name used for locally generated weather messages.
pub const WEATHER_SENDER: &str = "天气";
const WEATHER_USAGE: &str = "使用格式为@天气 城市\n如：@天气 雅安市";
const DISCONNECTED_ALERT: &str = "与服务器断开连接";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    LoggedOut,
    Connecting,
    LoggedIn,
    Reconnecting { attempt: u32 },
}

/// Everything the presentation layer needs to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerUpdate {
    Render(RenderAction),
    /// Inline message for the login view.
    Status(String),
    /// Interrupting notice, shown even inside the chat view.
    Alert(String),
    EnteredChat { identity: String },
    LeftChat,
    Reconnecting { attempt: u32, delay: Duration },
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Rejected(String),
    #[error("网络请求失败: {0}")]
    Api(#[from] ApiError),
    #[error("无法连接到服务器: {0}")]
    Connection(TransportError),
    #[error("正在连接中，请稍候")]
    Busy,
    #[error("未连接到服务器")]
    NotLoggedIn,
}

impl From<TransportError> for ControllerError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Busy => Self::Busy,
            other => Self::Connection(other),
        }
    }
}

/// Automatic reconnection after an abnormal close. Zero attempts disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8000),
        }
    }
}

impl ReconnectPolicy {
    pub fn enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// `min(base * 2^(attempt - 1), max)`, with attempts counted from 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

pub struct LoginRequest {
    pub identity: String,
    /// `None` joins with the nickname alone.
    pub password: Option<SecretString>,
    pub server_address: String,
}

pub struct RegisterRequest {
    pub username: String,
    pub password: SecretString,
    pub confirm: SecretString,
}

pub struct ChatSessionController {
    api: Arc<dyn ChatApi>,
    transport: TransportClient,
    router: MessageRouter,
    sessions: SessionStore,
    roster: Roster,
    reconnect: ReconnectPolicy,
    state: ControllerState,
    identity: Option<String>,
    server: Option<String>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    pending: VecDeque<ControllerUpdate>,
}

impl ChatSessionController {
    pub fn new(api: Arc<dyn ChatApi>, sessions: SessionStore) -> Self {
        Self {
            api,
            transport: TransportClient::new(),
            router: MessageRouter::default(),
            sessions,
            roster: Roster::new(),
            reconnect: ReconnectPolicy::default(),
            state: ControllerState::LoggedOut,
            identity: None,
            server: None,
            events: None,
            pending: VecDeque::new(),
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_content_policy(mut self, policy: ContentPolicy) -> Self {
        self.router = MessageRouter::new(policy);
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.router.set_viewport(viewport);
    }

    /// Fetches the server list and drops a stored session whose server is
    /// no longer offered.
    #[instrument(skip(self))]
    pub async fn load_servers(&mut self) -> Result<ServerConfig, ControllerError> {
        let config = self.api.server_config().await?;
        if let Some(session) = self.sessions.load() {
            if !config.contains(&session.server_address) {
                info!(server = %session.server_address, "Stored server no longer listed, clearing session");
                self.sessions.clear();
            }
        }
        Ok(config)
    }

    /// Rejoins the stored session, if there is a usable one.
    ///
    /// Returns `Ok(false)` when there is nothing to resume.
    #[instrument(skip(self))]
    pub async fn resume(&mut self) -> Result<bool, ControllerError> {
        let Some(session) = self.sessions.load() else {
            return Ok(false);
        };
        if !self.sessions.validate(&session, SessionIdPolicy::Optional) {
            self.sessions.clear();
            return Ok(false);
        }

        let config = self.api.server_config().await?;
        if !config.contains(&session.server_address) {
            info!(server = %session.server_address, "Stored server no longer listed, clearing session");
            self.sessions.clear();
            return Ok(false);
        }

        info!(identity = %session.identity, "Resuming session");
        self.establish(session.identity, session.server_address).await?;
        Ok(true)
    }

    /// Checks credentials, when given, then joins the chat.
    #[instrument(skip(self, request), fields(identity = %request.identity, server = %request.server_address))]
    pub async fn login(&mut self, request: LoginRequest) -> Result<(), ControllerError> {
        if matches!(
            self.state,
            ControllerState::LoggedIn | ControllerState::Reconnecting { .. }
        ) {
            return Err(ControllerError::Busy);
        }

        let identity = validate_nickname(&request.identity)?.to_string();
        let server = validate_server(&request.server_address)?.to_string();

        let identity = match &request.password {
            Some(password) => {
                validate_password(password.expose_secret())?;
                self.state = ControllerState::Connecting;
                info!("Checking credentials");
                let response = match self.api.login(&identity, password).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(error = %e, "Login request failed");
                        self.state = ControllerState::LoggedOut;
                        return Err(e.into());
                    }
                };
                if !response.success {
                    info!(message = %response.message, "Login rejected");
                    self.state = ControllerState::LoggedOut;
                    return Err(ControllerError::Rejected(non_empty_or(
                        response.message,
                        "登录失败",
                    )));
                }
                response
                    .username
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or(identity)
            }
            None => identity,
        };

        self.establish(identity, server).await
    }

    /// Creates an account. Does not log in.
    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn register(&mut self, request: RegisterRequest) -> Result<String, ControllerError> {
        let username = validate_registration(
            &request.username,
            request.password.expose_secret(),
            request.confirm.expose_secret(),
        )?;

        let availability = self.api.check_nickname(username).await?;
        if !availability.available {
            return Err(ControllerError::Rejected(non_empty_or(
                availability.message,
                "该昵称已被使用",
            )));
        }

        let response = self
            .api
            .register(username, &request.password, &request.confirm)
            .await?;
        if !response.success {
            return Err(ControllerError::Rejected(non_empty_or(
                response.message,
                "注册失败",
            )));
        }
        info!("Registered");
        Ok(non_empty_or(response.message, "注册成功"))
    }

    async fn establish(&mut self, identity: String, server: String) -> Result<(), ControllerError> {
        self.state = ControllerState::Connecting;
        match self.transport.connect(&server, &identity).await {
            Ok(events) => {
                self.on_connected(identity, server, events);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Connection failed");
                self.state = ControllerState::LoggedOut;
                Err(e.into())
            }
        }
    }

    fn on_connected(
        &mut self,
        identity: String,
        server: String,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        self.sessions.save(&identity, &server);
        self.router.reset();
        self.roster.clear();
        self.events = Some(events);
        self.state = ControllerState::LoggedIn;
        info!(%identity, "Entered chat");
        self.pending
            .push_back(ControllerUpdate::EnteredChat { identity: identity.clone() });
        self.identity = Some(identity);
        self.server = Some(server);
    }

    /// Classifies and sends one line of user input.
    ///
    /// Returns `Ok(false)` when nothing was sent: empty input or a failed
    /// weather lookup.
    pub async fn submit(&mut self, input: &str) -> Result<bool, ControllerError> {
        let outbound = classify(input);
        if matches!(outbound, Outbound::Empty) {
            return Ok(false);
        }
        if self.state != ControllerState::LoggedIn {
            return Err(ControllerError::NotLoggedIn);
        }

        match outbound {
            Outbound::Empty => Ok(false),
            Outbound::Feature(FeatureCommand::Weather { city }) => {
                self.weather_lookup(city).await
            }
            Outbound::Frame { kind, content } => {
                if self.transport.send(&ClientFrame::message(kind, content)) {
                    Ok(true)
                } else {
                    Err(ControllerError::NotLoggedIn)
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn weather_lookup(&mut self, city: Option<&str>) -> Result<bool, ControllerError> {
        let Some(city) = city else {
            self.push_weather_failure(None);
            return Ok(false);
        };

        let report = match self.api.weather(city).await {
            Ok(response) => response.into_report(),
            Err(e) => {
                warn!(error = %e, "Weather request failed");
                None
            }
        };
        let card = report.as_ref().and_then(|report| {
            let summary = report.summary()?;
            let today = report.today()?;
            Some((summary, today.weather.clone()))
        });

        let Some((summary, description)) = card else {
            let unknown_city = match self.api.lookup_city(city).await {
                Ok(response) => !response.success || response.data.is_empty(),
                Err(e) => {
                    debug!(error = %e, "City lookup failed");
                    false
                }
            };
            self.push_weather_failure(unknown_city.then_some(city));
            return Ok(false);
        };

        let category = WeatherCategory::from_description(&description);
        if !self
            .transport
            .send(&ClientFrame::weather_report(summary, description))
        {
            return Err(ControllerError::NotLoggedIn);
        }
        self.pending
            .push_back(ControllerUpdate::Render(RenderAction::WeatherEffect {
                category,
                duration: EFFECT_DURATION,
            }));
        Ok(true)
    }

    fn push_weather_failure(&mut self, unknown_city: Option<&str>) {
        let text = match unknown_city {
            Some(city) => format!("未找到匹配的城市：{city}\n{WEATHER_USAGE}"),
            None => format!("查询失败！\n{WEATHER_USAGE}"),
        };
        self.pending
            .push_back(ControllerUpdate::Render(RenderAction::ChatMessage {
                sender: WEATHER_SENDER.to_string(),
                body_html: format_chat_body(&text),
                is_self: false,
                timestamp: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            }));
    }

    /// Tells other viewers that a shared song was played or paused.
    pub fn send_music_control(
        &mut self,
        song_id: &str,
        action: MusicAction,
    ) -> Result<(), ControllerError> {
        if self.state != ControllerState::LoggedIn
            || !self
                .transport
                .send(&ClientFrame::music_control(action, song_id))
        {
            return Err(ControllerError::NotLoggedIn);
        }
        Ok(())
    }

    /// Waits for the next presentation update.
    ///
    /// Returns `None` when nothing is queued and there is no live connection
    /// to wait on. Cancel safe.
    pub async fn next_update(&mut self) -> Option<ControllerUpdate> {
        loop {
            if let Some(update) = self.pending.pop_front() {
                return Some(update);
            }
            let events = self.events.as_mut()?;
            match events.recv().await {
                Some(event) => self.handle_transport_event(event),
                None => self.events = None,
            }
        }
    }

    /// Feeds one transport event through the router and the close policy.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(event) => self.handle_frame(&event),
            TransportEvent::Closed(info) => self.handle_close(info),
        }
    }

    fn handle_frame(&mut self, event: &InboundEvent) {
        let identity = self.identity.as_deref().unwrap_or_default();
        for action in self.router.dispatch(event, identity) {
            let action = match action {
                RenderAction::UpdateRoster(users) => {
                    self.roster.replace(users);
                    RenderAction::UpdateRoster(self.roster.users().to_vec())
                }
                other => other,
            };
            self.pending.push_back(ControllerUpdate::Render(action));
        }
    }

    fn handle_close(&mut self, info: CloseInfo) {
        self.events = None;
        let in_chat = self.state == ControllerState::LoggedIn;

        match info.kind {
            CloseKind::Local => {}
            CloseKind::PolicyViolation => {
                warn!(reason = %info.reason, "Rejected by server");
                self.sessions.clear();
                self.reset();
                self.pending
                    .push_back(ControllerUpdate::Status(format!("连接断开: {}", info.reason)));
                if in_chat {
                    self.pending.push_back(ControllerUpdate::LeftChat);
                }
            }
            _ if in_chat => {
                if info.kind != CloseKind::Protocol && self.reconnect.enabled() {
                    let attempt = 1;
                    warn!(code = ?info.code, "Connection lost, reconnecting");
                    self.router.reset();
                    self.state = ControllerState::Reconnecting { attempt };
                    self.pending.push_back(ControllerUpdate::Reconnecting {
                        attempt,
                        delay: self.reconnect.delay_for(attempt),
                    });
                } else {
                    warn!(code = ?info.code, reason = %info.reason, "Connection lost");
                    self.reset();
                    self.pending
                        .push_back(ControllerUpdate::Alert(DISCONNECTED_ALERT.to_string()));
                    self.pending.push_back(ControllerUpdate::LeftChat);
                }
            }
            _ => {
                debug!(code = ?info.code, "Closed before entering chat");
                self.reset();
            }
        }
    }

    /// Makes one reconnection attempt.
    ///
    /// The caller waits out the delay announced by the last
    /// [`ControllerUpdate::Reconnecting`] first, so it can keep serving input
    /// meanwhile. Returns `Ok(true)` once back in the chat. Does nothing
    /// unless the controller is `Reconnecting`.
    #[instrument(skip(self))]
    pub async fn reconnect(&mut self) -> Result<bool, ControllerError> {
        let ControllerState::Reconnecting { attempt } = self.state else {
            return Ok(false);
        };
        let (Some(identity), Some(server)) = (self.identity.clone(), self.server.clone()) else {
            self.reset();
            return Ok(false);
        };

        match self.transport.connect(&server, &identity).await {
            Ok(events) => {
                info!(attempt, "Reconnected");
                self.on_connected(identity, server, events);
                Ok(true)
            }
            Err(e) if attempt >= self.reconnect.max_attempts => {
                warn!(attempt, error = %e, "Giving up reconnecting");
                self.reset();
                self.pending
                    .push_back(ControllerUpdate::Alert(DISCONNECTED_ALERT.to_string()));
                self.pending.push_back(ControllerUpdate::LeftChat);
                Ok(false)
            }
            Err(e) => {
                let attempt = attempt + 1;
                warn!(attempt, error = %e, "Reconnect failed");
                self.state = ControllerState::Reconnecting { attempt };
                self.pending.push_back(ControllerUpdate::Reconnecting {
                    attempt,
                    delay: self.reconnect.delay_for(attempt),
                });
                Ok(false)
            }
        }
    }

    /// Leaves the chat and forgets the stored session.
    pub fn logout(&mut self) {
        let in_chat = matches!(
            self.state,
            ControllerState::LoggedIn | ControllerState::Reconnecting { .. }
        );
        self.transport.disconnect();
        self.sessions.clear();
        self.events = None;
        self.reset();
        if in_chat {
            info!("Logged out");
            self.pending.push_back(ControllerUpdate::LeftChat);
        }
    }

    fn reset(&mut self) {
        self.router.reset();
        self.roster.clear();
        self.identity = None;
        self.server = None;
        self.state = ControllerState::LoggedOut;
    }
}

fn non_empty_or(message: String, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}
