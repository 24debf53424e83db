//! OAuth2 client-credentials token acquisition and proactive refresh.
//!
//! The provider is the only writer of the bearer token. A refresh first
//! drops the current token, so a failed refresh leaves nothing usable and the
//! next [`TokenProvider::ensure_token`] fetches a fresh one.

use crate::config::StreamConfig;
use crate::http::{HttpBackend, HttpError, HttpReply};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Remaining lifetime below which a cached token is no longer handed out.
pub const FRESHNESS_MARGIN: Duration = Duration::from_secs(30);
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;
const REFRESH_LEAD_SECS: u64 = 120;
const MIN_REFRESH_DELAY_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: 401 Unauthorized - invalid client credentials")]
    InvalidCredentials,
    #[error("token request failed with status {status} body={body}")]
    BadStatus { status: u16, body: String },
    #[error("token request returned an empty body")]
    EmptyBody,
    #[error("token response parse error: {0}")]
    Parse(String),
    #[error("no access_token in token response")]
    MissingAccessToken,
    #[error(transparent)]
    Http(#[from] HttpError),
}

#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    expires_at: Instant,
}

impl Token {
    pub fn new(value: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now + FRESHNESS_MARGIN < self.expires_at
    }

    pub fn preview(&self) -> String {
        preview(&self.value)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &self.preview())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Parsed body of a successful token response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: u64,
}

pub fn refresh_delay(expires_in_secs: u64) -> Duration {
    Duration::from_secs(
        expires_in_secs
            .saturating_sub(REFRESH_LEAD_SECS)
            .max(MIN_REFRESH_DELAY_SECS),
    )
}

pub fn preview(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() > 20 {
        let head: String = chars[..10].iter().collect();
        let tail: String = chars[chars.len() - 10..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "***".to_string()
    }
}

pub fn parse_token_reply(reply: &HttpReply) -> Result<TokenGrant, AuthError> {
    if reply.status == 401 {
        return Err(AuthError::InvalidCredentials);
    }
    if reply.status != 0 && !reply.is_success() {
        return Err(AuthError::BadStatus {
            status: reply.status,
            body: reply.body.clone(),
        });
    }
    if reply.body.trim().is_empty() {
        return Err(AuthError::EmptyBody);
    }

    let payload: Value =
        serde_json::from_str(&reply.body).map_err(|e| AuthError::Parse(e.to_string()))?;

    let access_token = payload
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingAccessToken)?
        .to_string();

    let expires_in = payload
        .get("expires_in")
        .and_then(|v| match v {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        })
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

    Ok(TokenGrant {
        access_token,
        expires_in,
    })
}

/// Everything needed to issue the client-credentials POST. Cheap to clone
/// into a background refresh.
#[derive(Clone)]
pub struct TokenRequest {
    url: String,
    client_id: String,
    client_secret: Zeroizing<String>,
    scope: String,
}

impl TokenRequest {
    pub fn from_config(cfg: &StreamConfig) -> Self {
        Self {
            url: token_url(&cfg.authority),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            scope: cfg.scope.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&self, http: &dyn HttpBackend) -> Result<TokenGrant, AuthError> {
        debug!(url = %self.url, client_id = %self.client_id, scope = %self.scope, "requesting access token");
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
            ("grant_type", "client_credentials"),
        ];
        let reply = http.post_form(&self.url, &form).await?;
        debug!(status = reply.status, "token response");
        parse_token_reply(&reply)
    }
}

pub fn token_url(authority: &str) -> String {
    format!("{}/oauth2/v2.0/token", authority.trim_end_matches('/'))
}

pub struct TokenProvider {
    http: Arc<dyn HttpBackend>,
    request: TokenRequest,
    token: Option<Token>,
    refresh_at: Option<Instant>,
}

impl TokenProvider {
    pub fn new(http: Arc<dyn HttpBackend>, cfg: &StreamConfig) -> Self {
        Self {
            http,
            request: TokenRequest::from_config(cfg),
            token: None,
            refresh_at: None,
        }
    }

    pub fn current(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Deadline of the next background refresh, if one is armed.
    pub fn refresh_at(&self) -> Option<Instant> {
        self.refresh_at
    }

    /// The cached token, if it has more than [`FRESHNESS_MARGIN`] left.
    pub fn fresh_token(&self) -> Option<Token> {
        self.token
            .as_ref()
            .filter(|token| token.is_fresh(Instant::now()))
            .cloned()
    }

    /// Returns the cached token while it is fresh, otherwise fetches a new one.
    pub async fn ensure_token(&mut self) -> Result<Token, AuthError> {
        if let Some(token) = self.fresh_token() {
            debug!("access token still valid, skipping refresh");
            return Ok(token);
        }
        let grant = self.fetch().await?;
        Ok(self.install(grant))
    }

    /// Drops the current token and returns the token request as a detached
    /// future. Hand a successful grant to [`TokenProvider::install`].
    pub fn fetch(
        &mut self,
    ) -> impl Future<Output = Result<TokenGrant, AuthError>> + Send + 'static {
        self.token = None;
        let http = Arc::clone(&self.http);
        let request = self.request.clone();
        async move { request.send(http.as_ref()).await }
    }

    /// Stores a fetched grant and re-arms the refresh deadline.
    pub fn install(&mut self, grant: TokenGrant) -> Token {
        let now = Instant::now();
        let token = Token::new(grant.access_token, now + Duration::from_secs(grant.expires_in));
        let delay = refresh_delay(grant.expires_in);
        self.refresh_at = Some(now + delay);
        info!(
            len = token.value().len(),
            token = %token.preview(),
            expires_in = grant.expires_in,
            refresh_in = delay.as_secs(),
            "received access token"
        );
        self.token = Some(token.clone());
        token
    }

    /// Like [`TokenProvider::fetch`], but also disarms the refresh deadline.
    /// Feed the outcome to [`TokenProvider::finish_refresh`].
    pub fn begin_refresh(
        &mut self,
    ) -> impl Future<Output = Result<TokenGrant, AuthError>> + Send + 'static {
        info!("refreshing access token");
        self.refresh_at = None;
        self.fetch()
    }

    pub fn finish_refresh(&mut self, outcome: Result<TokenGrant, AuthError>) {
        match outcome {
            Ok(grant) => {
                self.install(grant);
            }
            Err(e) => warn!(error = %e, "token refresh failed"),
        }
    }

    pub fn clear(&mut self) {
        self.token = None;
        self.refresh_at = None;
    }
}
