use futures_util::future::BoxFuture;
use ramblr_protocol::ContentType;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to encode frame: {0}")]
    Failed(String),
    #[error("frame source returned no frame")]
    NoFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    High,
    Intermediate,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn content_type(self) -> ContentType {
        match self {
            ImageFormat::Jpeg => ContentType::Jpeg,
            ImageFormat::Png => ContentType::Png,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSettings {
    pub quality: Quality,
    pub format: ImageFormat,
}

impl EncodeSettings {
    /// PNG is always encoded at high quality.
    pub fn select(jpeg_quality: f32, use_png: bool) -> Self {
        if use_png {
            return Self {
                quality: Quality::High,
                format: ImageFormat::Png,
            };
        }
        let quality = if jpeg_quality >= 0.85 {
            Quality::High
        } else if jpeg_quality >= 0.65 {
            Quality::Intermediate
        } else {
            Quality::Low
        };
        Self {
            quality,
            format: ImageFormat::Jpeg,
        }
    }
}

/// A raw frame handed out by the frame source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

pub trait FrameSource: Send {
    fn dimensions(&self) -> FrameSize;
    fn capture(&mut self) -> Option<Frame>;
}

/// Asynchronous frame-to-bytes conversion. The returned buffer is the encoded
/// image (JPEG/PNG bytes).
pub trait FrameEncoder: Send + Sync {
    fn encode(
        &self,
        frame: Frame,
        settings: EncodeSettings,
    ) -> BoxFuture<'static, Result<Vec<u8>, EncodeError>>;
}

#[derive(Debug)]
pub struct FrameThrottle {
    interval: Duration,
    max_in_flight: usize,
    in_flight: usize,
    last_dispatch: Option<Instant>,
}

impl FrameThrottle {
    pub fn new(interval: Duration, max_in_flight: usize) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            max_in_flight: max_in_flight.max(1),
            in_flight: 0,
            last_dispatch: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn last_dispatch(&self) -> Option<Instant> {
        self.last_dispatch
    }

    /// Gates, in order: ready session with a token, elapsed interval since
    /// the last dispatched frame, free encode slot.
    pub fn should_capture(&self, session_ready: bool, has_token: bool, now: Instant) -> bool {
        if !session_ready || !has_token {
            return false;
        }
        if let Some(last) = self.last_dispatch {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        if self.in_flight >= self.max_in_flight {
            debug!(in_flight = self.in_flight, "throttling: encodes in flight");
            return false;
        }
        true
    }

    pub fn begin_encode(&mut self) {
        self.in_flight += 1;
    }

    /// Releases the encode slot. Only a successful encode counts as a dispatch.
    pub fn finish_encode(&mut self, succeeded: bool, now: Instant) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if succeeded {
            self.last_dispatch = Some(now);
        }
    }

    pub fn reset(&mut self) {
        self.in_flight = 0;
        self.last_dispatch = None;
    }
}
