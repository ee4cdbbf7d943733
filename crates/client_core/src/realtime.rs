use std::{
    collections::{BTreeMap, VecDeque},
    pin::Pin,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{future, stream::BoxStream, FutureExt, Sink, SinkExt, StreamExt};
use serde::Serialize;
use shared::{
    domain::normalize_server_url,
    protocol::{AuthFrame, RealtimeEvent, RealtimeFrame},
};
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_stream::wrappers::WatchStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::{ClientSettings, WsAuthMode},
    error::{ClientError, Result},
};

/// Frame surfaced by a connected socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFrame {
    Text(String),
    Closed { code: Option<u16>, reason: String },
}

/// An open socket split into an outbound text sink and an inbound frame stream.
pub struct SocketLink {
    pub sink: Pin<Box<dyn Sink<String, Error = ClientError> + Send>>,
    pub stream: BoxStream<'static, Result<SocketFrame>>,
}

#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<SocketLink>;

    /// True when the socket is provided by a platform-native plugin.
    fn supports_native_socket(&self) -> bool {
        false
    }
}

pub struct TungsteniteConnector;

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<SocketLink> {
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (ws_writer, ws_reader) = ws_stream.split();

        let sink = ws_writer
            .sink_map_err(ClientError::from)
            .with(|text: String| future::ready(Ok::<_, ClientError>(Message::Text(text))));
        let stream = ws_reader.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(SocketFrame::Text(text))),
                Ok(Message::Close(frame)) => Some(Ok(match frame {
                    Some(frame) => SocketFrame::Closed {
                        code: Some(u16::from(frame.code)),
                        reason: frame.reason.to_string(),
                    },
                    None => SocketFrame::Closed {
                        code: None,
                        reason: String::new(),
                    },
                })),
                Ok(_) => None,
                Err(err) => Some(Err(ClientError::from(err))),
            })
        });

        Ok(SocketLink {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}

/// `http(s)://host[/prefix]` to `ws(s)://host[/prefix]/ws`, optionally with `?token=`.
pub fn websocket_url(base_url: &str, token: Option<&str>) -> Result<Url> {
    let base_url = normalize_server_url(base_url);
    let invalid = |reason: &str| ClientError::InvalidUrl {
        url: base_url.clone(),
        reason: reason.to_string(),
    };

    let mut url = Url::parse(&base_url).map_err(|err| invalid(&err.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid("server url must start with http:// or https://")),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid("cannot derive websocket scheme"))?;

    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

/// Connects with a deadline and, when a token is given, sends the auth frame.
pub async fn open_socket(
    connector: &dyn SocketConnector,
    url: &Url,
    auth_token: Option<&str>,
    connect_timeout: Duration,
) -> Result<SocketLink> {
    let mut link = tokio::time::timeout(connect_timeout, connector.connect(url))
        .await
        .map_err(|_| ClientError::SocketTimeout(connect_timeout))??;

    if let Some(token) = auth_token {
        let frame = serde_json::to_string(&AuthFrame::new(token))
            .map_err(|err| ClientError::InvalidInput(format!("auth frame: {err}")))?;
        link.sink.send(frame).await?;
    }
    Ok(link)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeSettings {
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub auth: WsAuthMode,
}

impl From<&ClientSettings> for RealtimeSettings {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            connect_timeout: settings.ws_connect_timeout,
            reconnect_delay: settings.reconnect_delay,
            auth: settings.ws_auth,
        }
    }
}

#[async_trait]
pub trait RealtimeHandler: Send + Sync {
    async fn handle(&self, event: &RealtimeEvent) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> RealtimeHandler for F
where
    F: Fn(&RealtimeEvent) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, event: &RealtimeEvent) -> anyhow::Result<()> {
        self(event)
    }
}

type HandlerMap = Mutex<BTreeMap<u64, Arc<dyn RealtimeHandler>>>;

/// Returned by [`RealtimeChannel::add_handler`]. Dropping it keeps the handler.
pub struct HandlerRegistration {
    id: u64,
    handlers: Weak<HandlerMap>,
}

impl HandlerRegistration {
    /// Removes the handler. Returns false when it was already gone.
    pub async fn unregister(self) -> bool {
        match self.handlers.upgrade() {
            Some(handlers) => handlers.lock().await.remove(&self.id).is_some(),
            None => false,
        }
    }
}

enum Command {
    Send(String),
    Close,
}

enum PumpExit {
    Dropped,
    CloseRequested,
}

/// Self-managing realtime connection. Built idle; [`RealtimeChannel::start`]
/// spawns one socket task that reconnects after any close it did not
/// request, and stops for good on [`RealtimeChannel::close`] or when the
/// channel is dropped.
pub struct RealtimeChannel {
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<watch::Sender<ConnectionState>>,
    handlers: Arc<HandlerMap>,
    next_handler_id: AtomicU64,
    worker: Mutex<Option<SocketWorker>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeChannel {
    pub fn new(
        connector: Arc<dyn SocketConnector>,
        base_url: &str,
        token: Option<String>,
        settings: RealtimeSettings,
    ) -> Result<Self> {
        let query_token = match settings.auth {
            WsAuthMode::QueryToken => token.as_deref(),
            WsAuthMode::AuthFrame => None,
        };
        let url = websocket_url(base_url, query_token)?;
        let auth_token = match settings.auth {
            WsAuthMode::AuthFrame => token,
            WsAuthMode::QueryToken => None,
        };

        let (state, _) = watch::channel(ConnectionState::Idle);
        let state = Arc::new(state);
        let handlers: Arc<HandlerMap> = Arc::new(Mutex::new(BTreeMap::new()));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let worker = SocketWorker {
            connector,
            url,
            auth_token,
            settings,
            state: Arc::clone(&state),
            handlers: Arc::clone(&handlers),
            commands: command_rx,
            outbox: VecDeque::new(),
        };

        Ok(Self {
            commands,
            state,
            handlers,
            next_handler_id: AtomicU64::new(1),
            worker: Mutex::new(Some(worker)),
            task: Mutex::new(None),
        })
    }

    /// `new` followed by `start`.
    pub async fn spawn(
        connector: Arc<dyn SocketConnector>,
        base_url: &str,
        token: Option<String>,
        settings: RealtimeSettings,
    ) -> Result<Self> {
        let channel = Self::new(connector, base_url, token, settings)?;
        channel.start().await?;
        Ok(channel)
    }

    /// Spawns the socket task. Starting twice is a no-op; starting after
    /// `close` fails.
    pub async fn start(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().await.take() else {
            return match self.state() {
                ConnectionState::Closing | ConnectionState::Closed => Err(ClientError::ChannelClosed),
                _ => Ok(()),
            };
        };
        *self.task.lock().await = Some(tokio::spawn(worker.run()));
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state_changes(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.state.subscribe())
    }

    pub async fn add_handler(&self, handler: impl RealtimeHandler + 'static) -> HandlerRegistration {
        self.add_shared_handler(Arc::new(handler)).await
    }

    pub async fn add_shared_handler(&self, handler: Arc<dyn RealtimeHandler>) -> HandlerRegistration {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().await.insert(id, handler);
        HandlerRegistration {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.lock().await.len()
    }

    /// Queues a JSON frame; frames sent while disconnected go out after the next open.
    pub fn send_json(&self, value: &impl Serialize) -> Result<()> {
        if matches!(self.state(), ConnectionState::Closing | ConnectionState::Closed) {
            return Err(ClientError::ChannelClosed);
        }
        let text = serde_json::to_string(value)
            .map_err(|err| ClientError::InvalidInput(format!("unserializable frame: {err}")))?;
        self.commands
            .send(Command::Send(text))
            .map_err(|_| ClientError::ChannelClosed)
    }

    /// Tears the socket down and clears handlers. No reconnect follows.
    pub async fn close(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }

        self.state.send_replace(ConnectionState::Closing);
        self.worker.lock().await.take();
        let _ = self.commands.send(Command::Close);
        self.handlers.lock().await.clear();

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!("realtime task ended abnormally: {err}");
            }
        }
        self.state.send_replace(ConnectionState::Closed);
        info!("realtime channel closed");
    }
}

struct SocketWorker {
    connector: Arc<dyn SocketConnector>,
    url: Url,
    auth_token: Option<String>,
    settings: RealtimeSettings,
    state: Arc<watch::Sender<ConnectionState>>,
    handlers: Arc<HandlerMap>,
    commands: mpsc::UnboundedReceiver<Command>,
    outbox: VecDeque<String>,
}

impl SocketWorker {
    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);
            let Some(connected) = self.connect().await else {
                break;
            };

            match connected {
                Ok(link) => {
                    self.set_state(ConnectionState::Open);
                    info!(url = %redacted(&self.url), "realtime socket open");
                    if let PumpExit::CloseRequested = self.pump(link).await {
                        break;
                    }
                }
                Err(err) => warn!("realtime connect failed: {err}"),
            }

            self.set_state(ConnectionState::Reconnecting);
            info!(delay = ?self.settings.reconnect_delay, "realtime reconnect scheduled");
            if !self.wait_before_retry().await {
                break;
            }
        }

        self.set_state(ConnectionState::Closed);
    }

    /// Once `close` has started, only `Closed` may follow `Closing`.
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            let closing = matches!(*current, ConnectionState::Closing | ConnectionState::Closed);
            if *current == next || (closing && next != ConnectionState::Closed) {
                return false;
            }
            *current = next;
            true
        });
    }

    /// `None` when a close arrived before the connect finished.
    async fn connect(&mut self) -> Option<Result<SocketLink>> {
        let connecting = open_socket(
            self.connector.as_ref(),
            &self.url,
            self.auth_token.as_deref(),
            self.settings.connect_timeout,
        );
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => return Some(result),
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => self.outbox.push_back(text),
                    Some(Command::Close) | None => return None,
                },
            }
        }
    }

    /// False when a close arrived during the delay.
    async fn wait_before_retry(&mut self) -> bool {
        let delay = tokio::time::sleep(self.settings.reconnect_delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => self.outbox.push_back(text),
                    Some(Command::Close) | None => return false,
                },
            }
        }
    }

    async fn pump(&mut self, link: SocketLink) -> PumpExit {
        let SocketLink {
            mut sink,
            mut stream,
        } = link;

        while let Some(text) = self.outbox.pop_front() {
            if let Err(err) = sink.send(text).await {
                warn!("realtime send failed: {err}");
                return PumpExit::Dropped;
            }
        }

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(SocketFrame::Text(text))) => dispatch(&self.handlers, &text).await,
                    Some(Ok(SocketFrame::Closed { code, reason })) => {
                        info!(?code, %reason, "realtime socket closed by server");
                        return PumpExit::Dropped;
                    }
                    Some(Err(err)) => {
                        warn!("realtime socket failed: {err}");
                        return PumpExit::Dropped;
                    }
                    None => {
                        info!("realtime socket ended");
                        return PumpExit::Dropped;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        if let Err(err) = sink.send(text).await {
                            warn!("realtime send failed: {err}");
                            return PumpExit::Dropped;
                        }
                    }
                    Some(Command::Close) | None => {
                        if let Err(err) = sink.close().await {
                            debug!("realtime close handshake failed: {err}");
                        }
                        return PumpExit::CloseRequested;
                    }
                },
            }
        }
    }
}

async fn dispatch(handlers: &HandlerMap, text: &str) {
    let frame = match serde_json::from_str::<RealtimeFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!("skipping malformed realtime frame: {err}");
            return;
        }
    };
    let event = frame.classify();
    debug!(?event, "realtime event");

    let snapshot: Vec<Arc<dyn RealtimeHandler>> =
        handlers.lock().await.values().cloned().collect();
    for handler in snapshot {
        match AssertUnwindSafe(handler.handle(&event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("realtime handler failed: {err:#}"),
            Err(panic) => error!("realtime handler panicked: {}", panic_message(panic.as_ref())),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[cfg(test)]
#[path = "tests/realtime_tests.rs"]
mod tests;
