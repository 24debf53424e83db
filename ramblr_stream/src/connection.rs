use crate::handshake::HandshakeMethod;
use std::time::Duration;
use tracing::{error, info, warn};

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting(HandshakeMethod),
    Open(HandshakeMethod),
    /// Every handshake method failed; no further attempts are made.
    Failed,
}

/// What the runtime does after a transport event. The machine itself never
/// touches the socket or the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Open(HandshakeMethod),
    OpenAfter(Duration, HandshakeMethod),
    Idle,
    Fatal,
}

/// Why a transport closed, as seen by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }

    pub fn is_clean(&self) -> bool {
        self.code == CLOSE_NORMAL || self.code == CLOSE_GOING_AWAY
    }
}

/// The live session. Replaced wholesale on reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub ready: bool,
    pub auth_attempt_index: usize,
    pub process_id: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: usize,
    pub auth_retry_delay: Duration,
    pub reconnect_delay: Duration,
}

#[derive(Debug)]
pub struct ConnectionManager {
    policy: ReconnectPolicy,
    state: ConnectionState,
    session: Session,
    attempts: usize,
}

impl ConnectionManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Closed,
            session: Session::default(),
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn is_ready(&self) -> bool {
        self.session.ready
    }

    /// Number of `begin_attempt` calls since `initialize`.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn initialize(&mut self) -> Directive {
        self.session = Session::default();
        self.attempts = 0;
        self.state = ConnectionState::Closed;
        self.directive_for_current_method(Duration::ZERO)
    }

    /// Marks the start of one attempt with the current method. Any previous
    /// transport must already be closed; the session is replaced.
    pub fn begin_attempt(&mut self) -> Option<HandshakeMethod> {
        let method = HandshakeMethod::from_index(self.session.auth_attempt_index)?;
        if self.session.auth_attempt_index >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        self.session = Session {
            ready: false,
            auth_attempt_index: method.index(),
            process_id: None,
        };
        self.state = ConnectionState::Connecting(method);
        info!(
            attempt = method.index() + 1,
            of = self.policy.max_attempts.min(HandshakeMethod::ALL.len()),
            %method,
            "opening websocket"
        );
        Some(method)
    }

    pub fn on_open(&mut self) {
        if let ConnectionState::Connecting(method) = self.state {
            info!(%method, "websocket connection established, waiting for session_init");
            self.state = ConnectionState::Open(method);
            self.session.ready = true;
        }
    }

    /// The upgrade request could not even be built. Advances immediately.
    pub fn on_construct_failed(&mut self, detail: &str) -> Directive {
        warn!(method = self.session.auth_attempt_index + 1, detail, "failed to create websocket");
        self.advance_method(Duration::ZERO)
    }

    /// Errors are informational; the close that follows drives the machine.
    pub fn on_error(&self, detail: &str) {
        warn!(method = self.session.auth_attempt_index + 1, detail, "websocket error");
    }

    pub fn on_close(&mut self, close: &CloseReason) -> Directive {
        match self.state {
            ConnectionState::Connecting(method) => {
                info!(%method, code = close.code, reason = %close.reason, "closed before open");
                self.session.ready = false;
                self.advance_method(self.policy.auth_retry_delay)
            }
            ConnectionState::Open(method) => {
                self.session.ready = false;
                self.state = ConnectionState::Closed;
                if close.is_clean() {
                    info!(code = close.code, reason = %close.reason, "websocket closed cleanly");
                    Directive::Idle
                } else {
                    warn!(
                        code = close.code,
                        reason = %close.reason,
                        retry_in = self.policy.reconnect_delay.as_secs_f32(),
                        "established session dropped, reconnecting"
                    );
                    Directive::OpenAfter(self.policy.reconnect_delay, method)
                }
            }
            ConnectionState::Closed | ConnectionState::Failed => Directive::Idle,
        }
    }

    pub fn shutdown(&mut self) {
        self.session.ready = false;
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Closed;
        }
    }

    fn advance_method(&mut self, delay: Duration) -> Directive {
        self.session.auth_attempt_index += 1;
        let limit = self.policy.max_attempts.min(HandshakeMethod::ALL.len());
        if self.session.auth_attempt_index >= limit {
            self.state = ConnectionState::Failed;
            error!(
                attempts = self.attempts,
                "all authentication methods failed; check credentials and skill configuration"
            );
            return Directive::Fatal;
        }
        self.state = ConnectionState::Closed;
        self.directive_for_current_method(delay)
    }

    fn directive_for_current_method(&self, delay: Duration) -> Directive {
        match HandshakeMethod::from_index(self.session.auth_attempt_index) {
            Some(method) if delay.is_zero() => Directive::Open(method),
            Some(method) => {
                info!(%method, retry_in = delay.as_secs_f32(), "trying next authentication method");
                Directive::OpenAfter(delay, method)
            }
            None => Directive::Fatal,
        }
    }
}
