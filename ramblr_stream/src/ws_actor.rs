//! The session runtime: one task owning every piece of session state.
//!
//! All work happens on this task's `select!` loop, so each field has exactly
//! one writer and no locking is needed. Token requests, catalog fetches and
//! encodes run as futures owned by the loop itself. Leaving the loop drops
//! them, so no completion is ever applied after teardown.

use crate::catalog::{InstructionCatalog, StepWidgets};
use crate::config::{ConfigError, StreamConfig};
use crate::connection::{
    CloseReason, ConnectionManager, ConnectionState, Directive, ReconnectPolicy,
};
use crate::handshake::{build_handshake, session_url, HandshakeError};
use crate::http::HttpBackend;
use crate::process::{fetch_process_instructions, CatalogFetchError, CatalogFetchGuard};
use crate::router::{self, RouteEffect};
use crate::send_queue::{DrainStep, SendQueue};
use crate::throttle::{EncodeError, EncodeSettings, FrameEncoder, FrameSource, FrameThrottle};
use crate::token::{AuthError, Token, TokenGrant, TokenProvider};
use base64::Engine as _;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, SinkExt, StreamExt};
use ramblr_protocol::{ClientMessage, DetectionPayload, InstructionPayload};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Host frame cadence at which the capture gates are evaluated.
const HOST_TICK: Duration = Duration::from_millis(16);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("initial token acquisition failed: {0}")]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Url(#[from] HandshakeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// The host asked for shutdown or dropped its handle.
    Shutdown,
    /// The server closed an established session cleanly.
    ClosedByServer,
    /// Every handshake method failed before reaching an open transport.
    HandshakesExhausted,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub status: &'static str,
    pub retry_in: Option<u64>,
}

/// Receives everything the session surfaces to the host. All methods default
/// to no-ops.
pub trait SessionObserver: Send {
    fn on_status(&mut self, _event: &StatusEvent) {}
    fn on_detections(&mut self, _detections: &[DetectionPayload]) {}
    fn on_instruction(&mut self, _instruction: &InstructionPayload) {}
    fn on_text(&mut self, _text: &str) {}
}

pub struct Collaborators {
    pub http: Arc<dyn HttpBackend>,
    pub frames: Box<dyn FrameSource>,
    pub encoder: Arc<dyn FrameEncoder>,
    pub widgets: Option<Box<dyn StepWidgets>>,
    pub observers: Vec<Box<dyn SessionObserver>>,
}

pub enum SessionCommand {
    Shutdown,
}

/// Point-in-time view of the session for the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub ready: bool,
    pub handshake_method: Option<usize>,
    pub process_id: Option<String>,
    pub latest_detections: Vec<DetectionPayload>,
    pub latest_instruction: Option<InstructionPayload>,
    pub catalog: Vec<InstructionPayload>,
    pub current_index: Option<i64>,
    pub page_start: usize,
    pub frames_sent: u64,
}

pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub async fn shutdown(&self) {
        let _ = self.tx.send(SessionCommand::Shutdown).await;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }
}

pub struct SessionChannels {
    rx: mpsc::Receiver<SessionCommand>,
    snapshot: watch::Sender<SessionSnapshot>,
}

pub fn channel() -> (SessionHandle, SessionChannels) {
    let (tx, rx) = mpsc::channel(8);
    let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
    (
        SessionHandle {
            tx,
            snapshot: snapshot_rx,
        },
        SessionChannels {
            rx,
            snapshot: snapshot_tx,
        },
    )
}

struct EncodeOutcome {
    width: u32,
    height: u32,
    result: Result<Vec<u8>, EncodeError>,
}

enum Background {
    TokenRefreshed(Result<TokenGrant, AuthError>),
    Catalog {
        process_id: String,
        /// Set when the fetch had to acquire a new token first.
        grant: Option<TokenGrant>,
        result: Result<Vec<InstructionPayload>, CatalogFetchError>,
    },
}

enum CatalogToken {
    Cached(Token),
    Fetch(BoxFuture<'static, Result<TokenGrant, AuthError>>),
}

enum OpenOutcome {
    Opened,
    Next(Directive),
    Shutdown,
}

/// Validates `config`, acquires the first token and runs the session until
/// shutdown, a clean server close, or exhausted handshakes.
pub async fn run(
    config: StreamConfig,
    collaborators: Collaborators,
    channels: SessionChannels,
) -> Result<SessionExit, StartError> {
    let config = config.validate().inspect_err(|e| error!(error = %e, "invalid configuration"))?;
    let mut actor = SessionActor::new(config, collaborators, channels.snapshot)?;

    if let Err(e) = actor.token.ensure_token().await {
        error!(error = %e, "initialization failed");
        return Err(StartError::Auth(e));
    }

    let mut rx = channels.rx;
    let exit = actor.event_loop(&mut rx).await;
    actor.teardown().await;
    info!(?exit, "session ended");
    Ok(exit)
}

struct SessionActor {
    config: StreamConfig,
    session_url: Url,
    encode_settings: EncodeSettings,

    token: TokenProvider,
    connection: ConnectionManager,
    queue: SendQueue,
    throttle: FrameThrottle,
    catalog: InstructionCatalog,
    fetches: CatalogFetchGuard,

    socket: Option<WsStream>,
    frame_counter: u64,
    latest_detections: Vec<DetectionPayload>,
    latest_instruction: Option<InstructionPayload>,

    http: Arc<dyn HttpBackend>,
    frames: Box<dyn FrameSource>,
    encoder: Arc<dyn FrameEncoder>,
    widgets: Option<Box<dyn StepWidgets>>,
    observers: Vec<Box<dyn SessionObserver>>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl SessionActor {
    fn new(
        config: StreamConfig,
        collaborators: Collaborators,
        snapshot: watch::Sender<SessionSnapshot>,
    ) -> Result<Self, StartError> {
        let session_url = session_url(
            &config.websocket_url,
            &config.workspace_id,
            config.skill_id.as_deref(),
        )?;
        info!(url = %session_url, "websocket url");

        let policy = ReconnectPolicy {
            max_attempts: config.max_auth_attempts,
            auth_retry_delay: config.timings.auth_retry,
            reconnect_delay: config.timings.reconnect,
        };
        let throttle = FrameThrottle::new(config.frame_interval(), config.max_concurrent_encodes);
        info!(
            fps = config.target_frame_rate,
            interval_ms = throttle.interval().as_millis() as u64,
            "frame capture configured"
        );

        Ok(Self {
            encode_settings: EncodeSettings::select(config.jpeg_quality, config.use_png),
            token: TokenProvider::new(Arc::clone(&collaborators.http), &config),
            connection: ConnectionManager::new(policy),
            queue: SendQueue::new(),
            throttle,
            catalog: InstructionCatalog::new(),
            fetches: CatalogFetchGuard::default(),
            socket: None,
            frame_counter: 0,
            latest_detections: Vec::new(),
            latest_instruction: None,
            http: collaborators.http,
            frames: collaborators.frames,
            encoder: collaborators.encoder,
            widgets: collaborators.widgets,
            observers: collaborators.observers,
            snapshot,
            session_url,
            config,
        })
    }

    async fn event_loop(&mut self, rx: &mut mpsc::Receiver<SessionCommand>) -> SessionExit {
        let mut next_open: Option<Instant>;
        let mut pacing_deadline: Option<Instant> = None;

        let refresh_timer = tokio::time::sleep(FAR_FUTURE);
        tokio::pin!(refresh_timer);
        let mut refresh_armed_for: Option<Instant> = None;

        let mut host_tick = tokio::time::interval(HOST_TICK);
        host_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut encodes: FuturesUnordered<BoxFuture<'static, EncodeOutcome>> =
            FuturesUnordered::new();
        let mut background: FuturesUnordered<BoxFuture<'static, Background>> =
            FuturesUnordered::new();

        let camera = self.frames.dimensions();
        info!(width = camera.width, height = camera.height, "frame source resolution");

        let directive = self.connection.initialize();
        match self.next_open_at(directive) {
            Ok(at) => next_open = Some(at),
            Err(exit) => return exit,
        }

        loop {
            if refresh_armed_for != self.token.refresh_at() {
                refresh_armed_for = self.token.refresh_at();
                if let Some(at) = refresh_armed_for {
                    refresh_timer.as_mut().reset(at);
                }
            }

            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Shutdown) | None => return SessionExit::Shutdown,
                    }
                }
                _ = wait_until(next_open), if next_open.is_some() => {
                    next_open = None;
                    match self.open_connection(rx).await {
                        OpenOutcome::Opened => {}
                        OpenOutcome::Shutdown => return SessionExit::Shutdown,
                        OpenOutcome::Next(directive) => match self.next_open_at(directive) {
                            Ok(at) => next_open = Some(at),
                            Err(exit) => return exit,
                        },
                    }
                    self.publish();
                }
                incoming = next_message(&mut self.socket), if self.socket.is_some() => {
                    let close = match incoming {
                        Some(Ok(Message::Text(text))) => {
                            debug!(chars = text.len(), "websocket message received");
                            self.handle_text(text.as_str(), &mut background);
                            None
                        }
                        Some(Ok(Message::Close(frame))) => Some(match frame {
                            Some(frame) => CloseReason::new(u16::from(frame.code), frame.reason.as_str()),
                            None => CloseReason::new(1005, "no status"),
                        }),
                        Some(Ok(_)) => None,
                        Some(Err(e)) => {
                            self.connection.on_error(&e.to_string());
                            Some(CloseReason::abnormal(e.to_string()))
                        }
                        None => Some(CloseReason::abnormal("stream ended")),
                    };
                    if let Some(close) = close {
                        pacing_deadline = None;
                        match self.handle_close(close) {
                            Ok(at) => next_open = Some(at),
                            Err(exit) => return exit,
                        }
                        self.publish();
                    }
                }
                _ = wait_until(pacing_deadline), if pacing_deadline.is_some() => {
                    pacing_deadline = self.drain_once().await;
                }
                () = &mut refresh_timer, if refresh_armed_for.is_some() => {
                    refresh_armed_for = None;
                    refresh_timer.as_mut().reset(Instant::now() + FAR_FUTURE);
                    background.push(self.token.begin_refresh().map(Background::TokenRefreshed).boxed());
                }
                _ = host_tick.tick() => {
                    self.poll_frame(&mut encodes);
                }
                Some(done) = encodes.next(), if !encodes.is_empty() => {
                    if let Some(deadline) = self.handle_encoded(done).await {
                        pacing_deadline = pacing_deadline.or(Some(deadline));
                    }
                }
                Some(done) = background.next(), if !background.is_empty() => {
                    self.handle_background(done);
                }
            }
        }
    }

    fn next_open_at(&mut self, directive: Directive) -> Result<Instant, SessionExit> {
        match directive {
            Directive::Open(_) => Ok(Instant::now()),
            Directive::OpenAfter(delay, _) => {
                self.emit_status("disconnected", Some(delay.as_secs()));
                Ok(Instant::now() + delay)
            }
            Directive::Fatal => {
                self.emit_status("failed", None);
                Err(SessionExit::HandshakesExhausted)
            }
            Directive::Idle => {
                self.emit_status("disconnected", None);
                Err(SessionExit::ClosedByServer)
            }
        }
    }

    async fn open_connection(&mut self, rx: &mut mpsc::Receiver<SessionCommand>) -> OpenOutcome {
        if let Some(mut old) = self.socket.take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, old.close(None)).await;
        }

        let Some(method) = self.connection.begin_attempt() else {
            return OpenOutcome::Next(Directive::Fatal);
        };
        self.emit_status("connecting", None);

        let token = if method.needs_token() {
            let acquired = tokio::select! {
                result = self.token.ensure_token() => result,
                cmd = rx.recv() => match cmd {
                    Some(SessionCommand::Shutdown) | None => return OpenOutcome::Shutdown,
                },
            };
            match acquired {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!(error = %e, %method, "no access token for handshake");
                    let close = CloseReason::abnormal(format!("token unavailable: {e}"));
                    return OpenOutcome::Next(self.connection.on_close(&close));
                }
            }
        } else {
            None
        };

        let request = match build_handshake(method, token.as_ref().map(|t| t.value()), &self.session_url)
            .and_then(|params| params.into_request())
        {
            Ok(request) => request,
            Err(e) => return OpenOutcome::Next(self.connection.on_construct_failed(&e.to_string())),
        };

        let connect = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request));
        tokio::select! {
            result = connect => match result {
                Ok(Ok((socket, _response))) => {
                    self.socket = Some(socket);
                    self.connection.on_open();
                    self.emit_status("connected", None);
                    OpenOutcome::Opened
                }
                Ok(Err(e)) => {
                    let e = HandshakeError::from(e);
                    self.connection.on_error(&e.to_string());
                    OpenOutcome::Next(self.connection.on_close(&CloseReason::abnormal(e.to_string())))
                }
                Err(_) => {
                    self.connection.on_error("connect timed out");
                    OpenOutcome::Next(self.connection.on_close(&CloseReason::abnormal("connect timed out")))
                }
            },
            cmd = rx.recv() => match cmd {
                Some(SessionCommand::Shutdown) | None => OpenOutcome::Shutdown,
            },
        }
    }

    /// Returns the time of the next open attempt, or the exit reason when the
    /// session is over.
    fn handle_close(&mut self, close: CloseReason) -> Result<Instant, SessionExit> {
        self.socket = None;
        self.queue.clear();
        let directive = self.connection.on_close(&close);
        self.next_open_at(directive)
    }

    fn transport_open(&self) -> bool {
        self.socket.is_some() && matches!(self.connection.state(), ConnectionState::Open(_))
    }

    /// One drain step. Returns the deadline of the next one while the queue
    /// is still being drained.
    async fn drain_once(&mut self) -> Option<Instant> {
        match self.queue.drain_step(self.transport_open()) {
            DrainStep::Transmit(message) => {
                let chars = message.len();
                if let Some(socket) = self.socket.as_mut() {
                    match socket.send(Message::Text(message.into())).await {
                        Ok(()) => debug!(chars, "message sent"),
                        Err(e) => warn!(error = %e, "websocket send error"),
                    }
                }
                Some(Instant::now() + self.config.timings.send_pacing)
            }
            DrainStep::Dropped(_) | DrainStep::Idle => None,
        }
    }

    async fn enqueue(&mut self, message: &ClientMessage) -> Option<Instant> {
        if !self.connection.is_ready() || self.socket.is_none() {
            return None;
        }
        match serde_json::to_string(message) {
            Ok(serialized) => {
                if self.queue.enqueue(serialized) {
                    return self.drain_once().await;
                }
                None
            }
            Err(e) => {
                warn!(error = %e, kind = message.kind(), "failed to serialize message");
                None
            }
        }
    }

    fn poll_frame(&mut self, encodes: &mut FuturesUnordered<BoxFuture<'static, EncodeOutcome>>) {
        let ready = self.connection.is_ready();
        if !self
            .throttle
            .should_capture(ready, self.token.has_token(), Instant::now())
        {
            if !ready && self.frame_counter == 0 {
                debug!("not sending frames: socket not ready or no token");
            }
            return;
        }
        let Some(frame) = self.frames.capture() else {
            return;
        };

        self.throttle.begin_encode();
        let (width, height) = (frame.width, frame.height);
        let encode = self.encoder.encode(frame, self.encode_settings);
        encodes.push(
            async move {
                EncodeOutcome {
                    width,
                    height,
                    result: encode.await,
                }
            }
            .boxed(),
        );
    }

    async fn handle_encoded(&mut self, done: EncodeOutcome) -> Option<Instant> {
        let now = Instant::now();
        match done.result {
            Ok(bytes) => {
                self.throttle.finish_encode(true, now);
                self.dispatch_frame(&bytes, done.width, done.height).await
            }
            Err(e) => {
                self.throttle.finish_encode(false, now);
                warn!(error = %e, "failed to encode frame");
                None
            }
        }
    }

    async fn dispatch_frame(&mut self, encoded: &[u8], width: u32, height: u32) -> Option<Instant> {
        if !self.connection.is_ready() {
            return None;
        }
        self.frame_counter += 1;
        let frame_id = self.frame_counter;
        let base64_image = base64::engine::general_purpose::STANDARD.encode(encoded);
        debug!(
            frame_id,
            size_kb = (base64_image.len() * 3 / 4) / 1024,
            width,
            height,
            "sending frame"
        );
        if frame_id % 10 == 0 {
            info!(frames = frame_id, "frames sent so far");
        }
        let message = ClientMessage::image_data(
            frame_id,
            self.encode_settings.format.content_type(),
            width,
            height,
            base64_image,
        );
        let deadline = self.enqueue(&message).await;
        self.publish();
        deadline
    }

    fn handle_text(
        &mut self,
        text: &str,
        background: &mut FuturesUnordered<BoxFuture<'static, Background>>,
    ) {
        let known = self.connection.session().process_id.clone();
        let effects = router::route(text, known.as_deref());
        let mut render = false;

        for effect in effects {
            match effect {
                RouteEffect::Detections(detections) => {
                    debug!(count = detections.len(), "dispatching detections");
                    for observer in self.observers.iter_mut() {
                        observer.on_detections(&detections);
                    }
                    self.latest_detections = detections;
                }
                RouteEffect::Instruction(instruction) => {
                    debug!(index = instruction.index, description = %instruction.description, "dispatching instruction");
                    for observer in self.observers.iter_mut() {
                        observer.on_instruction(&instruction);
                    }
                    self.catalog.select(&instruction);
                    self.latest_instruction = Some(instruction);
                    render = true;
                }
                RouteEffect::StatusText(text) => {
                    for observer in self.observers.iter_mut() {
                        observer.on_text(&text);
                    }
                }
                RouteEffect::ProcessId(process_id) => {
                    info!(%process_id, "captured process id");
                    self.connection.session_mut().process_id = Some(process_id);
                }
                RouteEffect::FetchCatalog(process_id) => {
                    self.request_catalog(process_id, background);
                }
                RouteEffect::ReplaceCatalog(instructions) => {
                    self.catalog.set_catalog(instructions);
                    render = true;
                }
            }
        }

        if render {
            self.render_steps();
        }
        self.publish();
    }

    /// Queues the catalog fetch on the background set. A stale token is
    /// replaced inside the same future, off the event loop.
    fn request_catalog(
        &mut self,
        process_id: String,
        background: &mut FuturesUnordered<BoxFuture<'static, Background>>,
    ) {
        if !self.fetches.try_begin(&process_id) {
            return;
        }
        let source = match self.token.fresh_token() {
            Some(token) => CatalogToken::Cached(token),
            None => CatalogToken::Fetch(self.token.fetch().boxed()),
        };

        let http = Arc::clone(&self.http);
        let api_base = self.config.api_base_url().to_string();
        background.push(
            async move {
                let (token, grant) = match source {
                    CatalogToken::Cached(token) => (token.value().to_string(), None),
                    CatalogToken::Fetch(fetch) => match fetch.await {
                        Ok(grant) => (grant.access_token.clone(), Some(grant)),
                        Err(e) => {
                            return Background::Catalog {
                                process_id,
                                grant: None,
                                result: Err(CatalogFetchError::Auth(e)),
                            }
                        }
                    },
                };
                let result =
                    fetch_process_instructions(http.as_ref(), &api_base, &process_id, &token).await;
                Background::Catalog {
                    process_id,
                    grant,
                    result,
                }
            }
            .boxed(),
        );
    }

    fn handle_background(&mut self, done: Background) {
        match done {
            Background::TokenRefreshed(result) => self.token.finish_refresh(result),
            Background::Catalog {
                process_id,
                grant,
                result,
            } => {
                if let Some(grant) = grant {
                    self.token.install(grant);
                }
                match result {
                    Ok(instructions) => {
                        self.fetches.finish(&process_id, true);
                        if instructions.is_empty() {
                            debug!(%process_id, "process has no instructions");
                            return;
                        }
                        info!(%process_id, steps = instructions.len(), "loaded process instructions");
                        self.catalog.set_catalog(instructions);
                        self.render_steps();
                        self.publish();
                    }
                    Err(e) => {
                        self.fetches.finish(&process_id, false);
                        warn!(error = %e, %process_id, "failed to fetch process instructions");
                    }
                }
            }
        }
    }

    fn render_steps(&mut self) {
        if let Some(widgets) = self.widgets.as_mut() {
            self.catalog.apply(widgets.as_mut());
        }
    }

    fn emit_status(&mut self, status: &'static str, retry_in: Option<u64>) {
        let event = StatusEvent { status, retry_in };
        for observer in self.observers.iter_mut() {
            observer.on_status(&event);
        }
    }

    fn publish(&self) {
        let session = self.connection.session();
        self.snapshot.send_replace(SessionSnapshot {
            ready: session.ready,
            handshake_method: match self.connection.state() {
                ConnectionState::Connecting(method) | ConnectionState::Open(method) => {
                    Some(method.index())
                }
                _ => None,
            },
            process_id: session.process_id.clone(),
            latest_detections: self.latest_detections.clone(),
            latest_instruction: self.latest_instruction.clone(),
            catalog: self.catalog.entries().to_vec(),
            current_index: self.catalog.current_index(),
            page_start: self.catalog.page_start(),
            frames_sent: self.frame_counter,
        });
    }

    async fn teardown(&mut self) {
        self.queue.clear();
        self.throttle.reset();
        self.token.clear();
        self.connection.shutdown();
        if let Some(mut socket) = self.socket.take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, socket.close(None)).await;
        }
        self.publish();
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn next_message(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket.as_mut() {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}
