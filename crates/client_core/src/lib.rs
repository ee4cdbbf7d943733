use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{
    domain::{Channel, Message, ServerStatus, Session, UserInfo, VoiceId},
    protocol::{
        decode_list, Ack, AuthResponse, CreateChannelRequest, Credentials,
        DisableTwoFactorRequest, EnableTwoFactorRequest, FileUploadResponse, JoinChannelRequest,
        OutgoingMessage, PushSubscriptionRequest, PushTokenRequest, RealtimeEvent,
        SearchChannelsRequest, TwoFactorSetup, TwoFactorStatus, UploadedFile, UserResponse,
        VerifyLoginRequest, VoiceOnlyMessageRequest, VoiceUploadRequest, VoiceUploadTicket,
    },
};
use storage::{MemorySessionStore, SessionStore};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

pub mod cache;
pub mod config;
pub mod error;
pub mod realtime;
pub mod timeline;
pub mod transport;

pub use cache::{CacheKey, ResponseCache};
pub use config::{load_settings, load_settings_from, ClientSettings, WsAuthMode};
pub use error::{ClientError, Result};
pub use realtime::{
    ConnectionState, HandlerRegistration, RealtimeChannel, RealtimeHandler, RealtimeSettings,
    SocketConnector, SocketFrame, SocketLink, TungsteniteConnector,
};
pub use timeline::{send_through, ChannelTimeline, SendFailure, TimelineEntry};
pub use transport::{FileUpload, HttpTransport, RequestOptions};

/// Result of a login, registration or second-factor verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated(Session),
    /// The server wants a second factor. Finish with `verify_2fa_login`
    /// when a session id was issued, or repeat `login` with the code.
    SecondFactorRequired { session_id: Option<String> },
    Rejected { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_native_socket: bool,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    SessionStarted { username: String },
    SessionEnded,
    Realtime(RealtimeEvent),
}

#[derive(Debug, Clone)]
pub enum CachedResource {
    Channels(Vec<Channel>),
    Messages(Vec<Message>),
    User(UserInfo),
}

type SharedCache = Arc<Mutex<ResponseCache<CachedResource>>>;

#[async_trait]
pub trait ClientHandle: Send + Sync {
    async fn ping(&self) -> Result<Value>;
    async fn register(&self, username: &str, password: &str) -> Result<LoginOutcome>;
    async fn login(
        &self,
        username: &str,
        password: &str,
        second_factor: Option<&str>,
    ) -> Result<LoginOutcome>;
    async fn verify_2fa_login(
        &self,
        username: &str,
        session_id: &str,
        code: &str,
    ) -> Result<LoginOutcome>;
    async fn setup_2fa(&self) -> Result<TwoFactorSetup>;
    async fn enable_2fa(&self, code: &str) -> Result<Ack>;
    async fn disable_2fa(&self, password: &str) -> Result<Ack>;
    async fn get_2fa_status(&self) -> Result<bool>;
    async fn get_channels(&self, force_refresh: bool) -> Result<Vec<Channel>>;
    async fn create_channel(&self, name: &str) -> Result<Ack>;
    async fn search_channels(&self, query: &str) -> Result<Vec<Channel>>;
    async fn join_channel(&self, channel: &str) -> Result<Ack>;
    async fn get_messages(
        &self,
        channel: &str,
        limit: u32,
        force_refresh: bool,
    ) -> Result<Vec<Message>>;
    async fn send_message(&self, message: OutgoingMessage) -> Result<Ack>;
    async fn send_voice_message(&self, channel: &str, voice_filename: &str) -> Result<Ack>;
    async fn request_voice_upload(&self, channel: &str, duration_secs: u32) -> Result<VoiceId>;
    async fn send_recorded_voice(
        &self,
        channel: &str,
        audio: FileUpload,
        duration_secs: u32,
    ) -> Result<Ack>;
    async fn upload_file(&self, file: FileUpload) -> Result<UploadedFile>;
    async fn upload_avatar(&self, file: FileUpload) -> Result<Ack>;
    async fn upload_voice_message(&self, filename: &str, file: FileUpload) -> Result<Ack>;
    async fn get_user_info(&self, username: &str, force_refresh: bool) -> Result<UserInfo>;
    async fn fetch_avatar(&self, username: &str) -> Result<Option<Vec<u8>>>;
    async fn enable_notifications(&self, subscription: Value) -> Result<Ack>;
    async fn register_push_token(&self, push_token: &str, platform: &str) -> Result<Ack>;
    async fn validate_session(&self) -> Result<bool>;
    async fn logout(&self) -> Result<()>;
    async fn session(&self) -> Option<Session>;
    fn capabilities(&self) -> Capabilities;
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

/// Chat backend client: HTTP calls, a read-through response cache, the
/// current session, and factories for realtime connections.
pub struct ChatClient {
    transport: HttpTransport,
    settings: ClientSettings,
    session: RwLock<Option<Session>>,
    cache: SharedCache,
    store: Arc<dyn SessionStore>,
    connector: Arc<dyn SocketConnector>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(server_url: &str) -> Result<Self> {
        Self::new_with_dependencies(
            server_url,
            ClientSettings::default(),
            Arc::new(MemorySessionStore::new()),
            Arc::new(TungsteniteConnector),
        )
    }

    pub fn new_with_dependencies(
        server_url: &str,
        settings: ClientSettings,
        store: Arc<dyn SessionStore>,
        connector: Arc<dyn SocketConnector>,
    ) -> Result<Self> {
        Self::build(server_url, None, settings, store, connector)
    }

    /// Client bound to an existing session's server, already authenticated.
    pub fn from_session(
        session: Session,
        settings: ClientSettings,
        store: Arc<dyn SessionStore>,
        connector: Arc<dyn SocketConnector>,
    ) -> Result<Self> {
        let server_url = session.server_url.clone();
        Self::build(&server_url, Some(session), settings, store, connector)
    }

    fn build(
        server_url: &str,
        session: Option<Session>,
        settings: ClientSettings,
        store: Arc<dyn SessionStore>,
        connector: Arc<dyn SocketConnector>,
    ) -> Result<Self> {
        let transport =
            HttpTransport::new(server_url, settings.request_timeout, settings.upload_timeout)?;
        let (events, _) = broadcast::channel(256);
        Ok(Self {
            transport,
            cache: Arc::new(Mutex::new(ResponseCache::new(settings.cache_ttl))),
            settings,
            session: RwLock::new(session),
            store,
            connector,
            events,
        })
    }

    /// Rebuilds a client from the persisted session, if one exists.
    pub async fn restore(
        settings: ClientSettings,
        store: Arc<dyn SessionStore>,
        connector: Arc<dyn SocketConnector>,
    ) -> Result<Option<Self>> {
        let Some(session) = store.load_session().await.map_err(ClientError::Store)? else {
            return Ok(None);
        };
        info!(server = %session.server_url, username = %session.username, "restoring session");
        Self::from_session(session, settings, store, connector).map(Some)
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub async fn token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.token.clone())
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        self.cache.lock().await.invalidate(key)
    }

    /// Pings this client's server and reports latency.
    pub async fn check_server_status(&self) -> ServerStatus {
        ping_status(&self.transport).await
    }

    /// Single connect: opens `/ws`, sends the auth frame when logged in, no reconnect.
    pub async fn create_websocket_channel(&self) -> Result<SocketLink> {
        let url = realtime::websocket_url(self.base_url(), None)?;
        let token = self.token().await;
        let link = realtime::open_socket(
            self.connector.as_ref(),
            &url,
            token.as_deref(),
            self.settings.ws_connect_timeout,
        )
        .await?;
        info!(url = %url, "websocket connected");
        Ok(link)
    }

    /// Self-managing realtime channel, not yet started. Server pushes
    /// invalidate the matching cache entries and are re-broadcast as
    /// [`ClientEvent::Realtime`]. Register handlers, then call `start`.
    pub async fn realtime_channel(&self) -> Result<RealtimeChannel> {
        let token = self.token().await;
        let channel = RealtimeChannel::new(
            Arc::clone(&self.connector),
            self.base_url(),
            token,
            RealtimeSettings::from(&self.settings),
        )?;
        channel
            .add_handler(CacheInvalidator {
                cache: Arc::clone(&self.cache),
                events: self.events.clone(),
            })
            .await;
        Ok(channel)
    }

    pub async fn connect_realtime(&self) -> Result<RealtimeChannel> {
        let channel = self.realtime_channel().await?;
        channel.start().await?;
        Ok(channel)
    }

    async fn require_session(&self) -> Result<Session> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(ClientError::NotAuthenticated)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let token = self.token().await;
        self.transport
            .request_json(path, RequestOptions::get(), token.as_deref())
            .await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T> {
        let token = self.token().await;
        self.transport
            .request_json(path, RequestOptions::post().json(body)?, token.as_deref())
            .await
    }

    async fn post_ack(&self, path: &str, body: &impl Serialize) -> Result<Ack> {
        let ack: Ack = self.post_json(path, body).await?;
        ensure_ack(ack)
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str, resource: &'static str) -> Result<Vec<T>> {
        let token = self.token().await;
        let body = self
            .transport
            .request_value(path, RequestOptions::get(), token.as_deref())
            .await?;
        decode_list(resource, body).map_err(|err| ClientError::shape(path, err))
    }

    async fn cached(&self, key: &CacheKey) -> Option<CachedResource> {
        let hit = self.cache.lock().await.get(key);
        if hit.is_some() {
            debug!(%key, "cache hit");
        }
        hit
    }

    async fn cache_generation(&self) -> u64 {
        self.cache.lock().await.generation()
    }

    /// Drops the response when an invalidation ran while it was in flight.
    async fn store_cached(&self, key: CacheKey, value: CachedResource, generation: u64) {
        if !self.cache.lock().await.set_if_current(key.clone(), value, generation) {
            debug!(%key, "not caching response fetched across an invalidation");
        }
    }

    async fn invalidate_messages_of(&self, channel: &str) {
        let removed = self
            .cache
            .lock()
            .await
            .invalidate_where(|key| key.is_messages_of(channel));
        debug!(channel, removed, "invalidated cached message pages");
    }

    async fn settle_auth(&self, username: &str, response: AuthResponse) -> Result<LoginOutcome> {
        if response.requires_two_factor {
            info!(username, "second factor required");
            return Ok(LoginOutcome::SecondFactorRequired {
                session_id: response.session_id,
            });
        }

        match (response.success, response.token.clone()) {
            (true, Some(token)) => {
                let session = self.start_session(username, token).await?;
                Ok(LoginOutcome::Authenticated(session))
            }
            _ => {
                let message = response.failure_message();
                warn!(username, %message, "authentication rejected");
                Ok(LoginOutcome::Rejected { message })
            }
        }
    }

    async fn start_session(&self, username: &str, token: String) -> Result<Session> {
        let session = Session::new(self.base_url(), token, username);
        self.store
            .save_session(&session)
            .await
            .map_err(ClientError::Store)?;
        *self.session.write().await = Some(session.clone());
        self.cache.lock().await.clear();
        info!(username, server = %session.server_url, "session started");
        let _ = self.events.send(ClientEvent::SessionStarted {
            username: username.to_string(),
        });
        Ok(session)
    }
}

#[async_trait]
impl ClientHandle for ChatClient {
    async fn ping(&self) -> Result<Value> {
        self.get_json("/api/ping").await
    }

    async fn register(&self, username: &str, password: &str) -> Result<LoginOutcome> {
        let response: AuthResponse = self
            .post_json(
                "/api/register",
                &Credentials {
                    username: username.to_string(),
                    password: password.to_string(),
                    two_factor_token: None,
                },
            )
            .await?;
        self.settle_auth(username, response).await
    }

    async fn login(
        &self,
        username: &str,
        password: &str,
        second_factor: Option<&str>,
    ) -> Result<LoginOutcome> {
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
            two_factor_token: second_factor
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_string),
        };
        let response: AuthResponse = self.post_json("/api/login", &credentials).await?;
        self.settle_auth(username, response).await
    }

    async fn verify_2fa_login(
        &self,
        username: &str,
        session_id: &str,
        code: &str,
    ) -> Result<LoginOutcome> {
        let response: AuthResponse = self
            .post_json(
                "/api/2fa/verify-login",
                &VerifyLoginRequest {
                    username: username.to_string(),
                    session_id: session_id.to_string(),
                    two_factor_token: code.trim().to_string(),
                },
            )
            .await?;
        self.settle_auth(username, response).await
    }

    async fn setup_2fa(&self) -> Result<TwoFactorSetup> {
        let session = self.require_session().await?;
        self.transport
            .request_json("/api/2fa/setup", RequestOptions::post(), Some(&session.token))
            .await
    }

    async fn enable_2fa(&self, code: &str) -> Result<Ack> {
        self.require_session().await?;
        self.post_ack(
            "/api/2fa/enable",
            &EnableTwoFactorRequest {
                token: code.trim().to_string(),
            },
        )
        .await
    }

    async fn disable_2fa(&self, password: &str) -> Result<Ack> {
        self.require_session().await?;
        self.post_ack(
            "/api/2fa/disable",
            &DisableTwoFactorRequest {
                password: password.to_string(),
            },
        )
        .await
    }

    async fn get_2fa_status(&self) -> Result<bool> {
        self.require_session().await?;
        let status: TwoFactorStatus = self.get_json("/api/2fa/status").await?;
        Ok(status.enabled)
    }

    async fn get_channels(&self, force_refresh: bool) -> Result<Vec<Channel>> {
        let key = CacheKey::Channels;
        if !force_refresh {
            if let Some(CachedResource::Channels(channels)) = self.cached(&key).await {
                return Ok(channels);
            }
        }

        let generation = self.cache_generation().await;
        let channels: Vec<Channel> = self.get_list("/api/channels", "channels").await?;
        self.store_cached(key, CachedResource::Channels(channels.clone()), generation)
            .await;
        Ok(channels)
    }

    async fn create_channel(&self, name: &str) -> Result<Ack> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::InvalidInput(
                "channel name must not be empty".into(),
            ));
        }

        self.invalidate(&CacheKey::Channels).await;
        let result = self
            .post_ack(
                "/api/channels/create",
                &CreateChannelRequest {
                    name: name.to_string(),
                },
            )
            .await;
        self.invalidate(&CacheKey::Channels).await;
        let ack = result?;
        info!(channel = name, "channel created");
        Ok(ack)
    }

    async fn search_channels(&self, query: &str) -> Result<Vec<Channel>> {
        let token = self.token().await;
        let options = RequestOptions::post().json(&SearchChannelsRequest {
            query: query.trim().to_string(),
        })?;
        let body = self
            .transport
            .request_value("/api/channels/search", options, token.as_deref())
            .await?;
        decode_list("channels", body).map_err(|err| ClientError::shape("/api/channels/search", err))
    }

    async fn join_channel(&self, channel: &str) -> Result<Ack> {
        self.invalidate(&CacheKey::Channels).await;
        let result = self
            .post_ack(
                "/api/channels/join",
                &JoinChannelRequest {
                    channel: channel.to_string(),
                },
            )
            .await;
        self.invalidate(&CacheKey::Channels).await;
        result
    }

    async fn get_messages(
        &self,
        channel: &str,
        limit: u32,
        force_refresh: bool,
    ) -> Result<Vec<Message>> {
        let key = CacheKey::messages(channel, limit);
        if !force_refresh {
            if let Some(CachedResource::Messages(messages)) = self.cached(&key).await {
                return Ok(messages);
            }
        }

        let path = {
            let mut query = url::form_urlencoded::Serializer::new(String::from("/api/messages?"));
            query
                .append_pair("channel", channel)
                .append_pair("limit", &limit.to_string());
            query.finish()
        };
        let generation = self.cache_generation().await;
        let messages: Vec<Message> = self.get_list(&path, "messages").await?;
        self.store_cached(key, CachedResource::Messages(messages.clone()), generation)
            .await;
        Ok(messages)
    }

    async fn send_message(&self, message: OutgoingMessage) -> Result<Ack> {
        let has_content = !message.text.trim().is_empty()
            || message.file_id.is_some()
            || message.voice_message.is_some();
        if !has_content {
            return Err(ClientError::InvalidInput("message is empty".into()));
        }

        self.invalidate_messages_of(&message.channel).await;
        let result = self.post_ack("/api/message", &message).await;
        self.invalidate_messages_of(&message.channel).await;
        result
    }

    async fn send_voice_message(&self, channel: &str, voice_filename: &str) -> Result<Ack> {
        self.invalidate_messages_of(channel).await;
        let result = self
            .post_ack(
                "/api/message/voice-only",
                &VoiceOnlyMessageRequest {
                    channel: channel.to_string(),
                    voice_message: voice_filename.to_string(),
                },
            )
            .await;
        self.invalidate_messages_of(channel).await;
        result
    }

    async fn request_voice_upload(&self, channel: &str, duration_secs: u32) -> Result<VoiceId> {
        let ticket: VoiceUploadTicket = self
            .post_json(
                "/api/voice/upload",
                &VoiceUploadRequest {
                    channel: channel.to_string(),
                    duration: duration_secs,
                },
            )
            .await?;
        if !ticket.success || ticket.voice_id.0.is_empty() {
            return Err(ClientError::Rejected(
                "voice upload endpoint returned no voice id".into(),
            ));
        }
        Ok(ticket.voice_id)
    }

    async fn send_recorded_voice(
        &self,
        channel: &str,
        audio: FileUpload,
        duration_secs: u32,
    ) -> Result<Ack> {
        let voice_id = self.request_voice_upload(channel, duration_secs).await?;
        self.upload_voice_message(&voice_id.0, audio).await?;
        info!(channel, %voice_id, "voice recording uploaded");
        self.send_voice_message(channel, &voice_id.0).await
    }

    async fn upload_file(&self, file: FileUpload) -> Result<UploadedFile> {
        let token = self.token().await;
        let response: FileUploadResponse = self
            .transport
            .upload("/api/upload/file", file.into_form("file")?, token.as_deref())
            .await?;
        Ok(response.file)
    }

    async fn upload_avatar(&self, file: FileUpload) -> Result<Ack> {
        let session = self.require_session().await?;
        let key = CacheKey::User(session.username.clone());
        self.invalidate(&key).await;
        let result = self
            .transport
            .upload::<Ack>(
                "/api/upload/avatar",
                file.into_form("avatar")?,
                Some(&session.token),
            )
            .await;
        self.invalidate(&key).await;
        ensure_ack(result?)
    }

    async fn upload_voice_message(&self, filename: &str, file: FileUpload) -> Result<Ack> {
        let token = self.token().await;
        let path = format!("/api/upload/voice/{}", path_segment(filename));
        let ack: Ack = self
            .transport
            .upload(&path, file.into_form("voice")?, token.as_deref())
            .await?;
        ensure_ack(ack)
    }

    async fn get_user_info(&self, username: &str, force_refresh: bool) -> Result<UserInfo> {
        let key = CacheKey::User(username.to_string());
        if !force_refresh {
            if let Some(CachedResource::User(user)) = self.cached(&key).await {
                return Ok(user);
            }
        }

        let path = format!("/api/user/{}", path_segment(username));
        let generation = self.cache_generation().await;
        let response: UserResponse = self.get_json(&path).await?;
        self.store_cached(key, CachedResource::User(response.user.clone()), generation)
            .await;
        Ok(response.user)
    }

    async fn fetch_avatar(&self, username: &str) -> Result<Option<Vec<u8>>> {
        let token = self.token().await;
        let path = format!("/api/user/{}/avatar", path_segment(username));
        self.transport.fetch_bytes(&path, token.as_deref()).await
    }

    async fn enable_notifications(&self, subscription: Value) -> Result<Ack> {
        self.require_session().await?;
        self.post_ack(
            "/api/notifications/subscribe",
            &PushSubscriptionRequest { subscription },
        )
        .await
    }

    async fn register_push_token(&self, push_token: &str, platform: &str) -> Result<Ack> {
        self.require_session().await?;
        self.post_ack(
            "/api/register-push-token",
            &PushTokenRequest {
                push_token: push_token.to_string(),
                platform: platform.to_string(),
            },
        )
        .await
    }

    async fn validate_session(&self) -> Result<bool> {
        if self.session.read().await.is_none() {
            return Ok(false);
        }

        match self.get_channels(true).await {
            Ok(_) => Ok(true),
            Err(err) => {
                warn!("stored session failed validation: {err}");
                self.logout().await?;
                Ok(false)
            }
        }
    }

    async fn logout(&self) -> Result<()> {
        let previous = self.session.write().await.take();
        self.cache.lock().await.clear();
        self.store
            .clear_session()
            .await
            .map_err(ClientError::Store)?;
        if let Some(session) = previous {
            info!(username = %session.username, "session ended");
            let _ = self.events.send(ClientEvent::SessionEnded);
        }
        Ok(())
    }

    async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_native_socket: self.connector.supports_native_socket(),
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

/// Realtime handler installed by [`ChatClient::realtime_channel`].
struct CacheInvalidator {
    cache: SharedCache,
    events: broadcast::Sender<ClientEvent>,
}

#[async_trait]
impl RealtimeHandler for CacheInvalidator {
    async fn handle(&self, event: &RealtimeEvent) -> anyhow::Result<()> {
        match event {
            RealtimeEvent::ChannelsUpdated => {
                self.cache.lock().await.invalidate(&CacheKey::Channels);
            }
            RealtimeEvent::NewMessage { channel, .. } => {
                self.cache
                    .lock()
                    .await
                    .invalidate_where(|key| key.is_messages_of(channel));
            }
            RealtimeEvent::Other(_) => {}
        }
        let _ = self.events.send(ClientEvent::Realtime(event.clone()));
        Ok(())
    }
}

/// Liveness check against an arbitrary server, as used by the server picker.
pub async fn check_server_status(server_url: &str, settings: &ClientSettings) -> ServerStatus {
    match HttpTransport::new(server_url, settings.request_timeout, settings.upload_timeout) {
        Ok(transport) => ping_status(&transport).await,
        Err(err) => {
            warn!(server_url, "cannot ping server: {err}");
            ServerStatus::Offline
        }
    }
}

async fn ping_status(transport: &HttpTransport) -> ServerStatus {
    let started = Instant::now();
    match transport.check_status("/api/ping").await {
        Ok(status) if status.is_success() => ServerStatus::Online {
            ping_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        },
        Ok(status) => ServerStatus::Error {
            http_status: status.as_u16(),
        },
        Err(err) => {
            debug!(server = transport.base_url(), "server unreachable: {err}");
            ServerStatus::Offline
        }
    }
}

/// Decodes an unpadded or padded URL-safe base64 VAPID public key.
pub fn decode_vapid_key(key: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(key.trim().trim_end_matches('='))
        .map_err(|err| ClientError::InvalidInput(format!("invalid VAPID key: {err}")))
}

/// A 2xx body with `success: false` is a rejection; bodies without the flag pass.
fn ensure_ack(ack: Ack) -> Result<Ack> {
    if ack.is_rejected() {
        return Err(ClientError::Rejected(ack.failure_message()));
    }
    Ok(ack)
}

fn path_segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
