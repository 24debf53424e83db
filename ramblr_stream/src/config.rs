use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

pub const DEFAULT_TARGET_FRAME_RATE: u32 = 3;
pub const DEFAULT_JPEG_QUALITY: f32 = 0.82;
pub const DEFAULT_MAX_CONCURRENT_ENCODES: usize = 2;
pub const DEFAULT_MAX_AUTH_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration inputs: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Fixed delays of the session. The backend needs the send pacing; the
/// defaults are the production values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub send_pacing: Duration,
    pub auth_retry: Duration,
    pub reconnect: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            send_pacing: Duration::from_millis(50),
            auth_retry: Duration::from_secs(2),
            reconnect: Duration::from_secs(3),
        }
    }
}

#[derive(Clone)]
pub struct StreamConfig {
    pub client_id: String,
    pub client_secret: Zeroizing<String>,
    pub authority: String,
    pub scope: String,
    pub workspace_id: String,
    pub skill_id: Option<String>,
    pub websocket_url: String,
    pub api_base_url: Option<String>,

    pub target_frame_rate: u32,
    pub use_png: bool,
    pub jpeg_quality: f32,
    pub max_concurrent_encodes: usize,
    pub max_auth_attempts: usize,
    pub timings: Timings,
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("authority", &self.authority)
            .field("scope", &self.scope)
            .field("workspace_id", &self.workspace_id)
            .field("skill_id", &self.skill_id)
            .field("websocket_url", &self.websocket_url)
            .field("api_base_url", &self.api_base_url)
            .field("target_frame_rate", &self.target_frame_rate)
            .field("use_png", &self.use_png)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("max_concurrent_encodes", &self.max_concurrent_encodes)
            .finish_non_exhaustive()
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: Zeroizing::new(String::new()),
            authority: String::new(),
            scope: String::new(),
            workspace_id: String::new(),
            skill_id: None,
            websocket_url: String::new(),
            api_base_url: None,
            target_frame_rate: DEFAULT_TARGET_FRAME_RATE,
            use_png: false,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_concurrent_encodes: DEFAULT_MAX_CONCURRENT_ENCODES,
            max_auth_attempts: DEFAULT_MAX_AUTH_ATTEMPTS,
            timings: Timings::default(),
        }
    }
}

impl StreamConfig {
    /// Reads `RAMBLR_*` variables on top of the defaults. Missing values are
    /// left empty and reported by [`StreamConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = StreamConfig {
            client_id: env_string("RAMBLR_CLIENT_ID").unwrap_or_default(),
            client_secret: Zeroizing::new(env_string("RAMBLR_CLIENT_SECRET").unwrap_or_default()),
            authority: env_string("RAMBLR_AUTHORITY").unwrap_or_default(),
            scope: env_string("RAMBLR_SCOPE").unwrap_or_default(),
            workspace_id: env_string("RAMBLR_WORKSPACE_ID").unwrap_or_default(),
            skill_id: env_string("RAMBLR_SKILL_ID"),
            websocket_url: env_string("RAMBLR_WEBSOCKET_URL").unwrap_or_default(),
            api_base_url: env_string("RAMBLR_API_BASE_URL"),
            ..StreamConfig::default()
        };

        if let Some(v) = env_parsed::<u32>("RAMBLR_TARGET_FRAME_RATE")? {
            cfg.target_frame_rate = v;
        }
        if let Some(v) = env_parsed::<bool>("RAMBLR_USE_PNG")? {
            cfg.use_png = v;
        }
        if let Some(v) = env_parsed::<f32>("RAMBLR_JPEG_QUALITY")? {
            cfg.jpeg_quality = v;
        }
        if let Some(v) = env_parsed::<usize>("RAMBLR_MAX_CONCURRENT_ENCODES")? {
            cfg.max_concurrent_encodes = v;
        }
        Ok(cfg)
    }

    /// Checks required inputs and normalizes the optional ones. Must pass
    /// before any network activity.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        if self.client_id.trim().is_empty() {
            missing.push("client_id");
        }
        if self.client_secret.trim().is_empty() {
            missing.push("client_secret");
        }
        if self.authority.trim().is_empty() {
            missing.push("authority");
        }
        if self.scope.trim().is_empty() {
            missing.push("scope");
        }
        if self.workspace_id.trim().is_empty() {
            missing.push("workspace_id");
        }
        if self.websocket_url.trim().is_empty() {
            missing.push("websocket_url");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        if self.max_auth_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "max_auth_attempts",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.api_base_url.as_deref().map_or(true, |s| s.trim().is_empty()) {
            self.api_base_url = Some(self.authority.clone());
        }
        if self.skill_id.as_deref().is_some_and(|s| s.trim().is_empty()) {
            self.skill_id = None;
        }
        if !(self.jpeg_quality > 0.0 && self.jpeg_quality <= 1.0) {
            self.jpeg_quality = DEFAULT_JPEG_QUALITY;
        }
        if self.max_concurrent_encodes == 0 {
            self.max_concurrent_encodes = 1;
        }
        Ok(self)
    }

    pub fn frame_interval(&self) -> Duration {
        let ms = (1000 / self.target_frame_rate.max(1)).max(1);
        Duration::from_millis(u64::from(ms))
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(&self.authority)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parsed<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            field: key,
            reason: format!("{raw:?}: {e}"),
        }),
        None => Ok(None),
    }
}
