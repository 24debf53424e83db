#![allow(dead_code)]

use async_trait::async_trait;
use ramblr_stream::{HttpBackend, HttpError, HttpReply, StreamConfig};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zeroize::Zeroizing;

pub const AUTHORITY: &str = "https://login.example.com/tenant";

pub fn test_config(websocket_url: &str) -> StreamConfig {
    StreamConfig {
        client_id: "client-1".to_string(),
        client_secret: Zeroizing::new("s3cret".to_string()),
        authority: AUTHORITY.to_string(),
        scope: "api://ramblr/.default".to_string(),
        workspace_id: "ws-1".to_string(),
        skill_id: Some("skill-9".to_string()),
        websocket_url: websocket_url.to_string(),
        ..StreamConfig::default()
    }
}

pub fn token_body(access_token: &str, expires_in: u64) -> String {
    serde_json::json!({
        "access_token": access_token,
        "expires_in": expires_in,
        "token_type": "Bearer",
    })
    .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPost {
    pub url: String,
    pub form: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedGet {
    pub url: String,
    pub token: String,
}

/// Scripted HTTP backend. Token posts pop from `token_replies` and fall back
/// to `default_token`; GETs are answered from `get_replies` in order.
#[derive(Default)]
pub struct FakeHttp {
    token_replies: Mutex<VecDeque<Result<HttpReply, HttpError>>>,
    default_token: Mutex<Option<HttpReply>>,
    get_replies: Mutex<VecDeque<HttpReply>>,
    slow_posts: Mutex<Option<(usize, Duration)>>,
    get_delay: Mutex<Option<Duration>>,
    pub posts: Mutex<Vec<RecordedPost>>,
    pub gets: Mutex<Vec<RecordedGet>>,
}

impl FakeHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_token(access_token: &str, expires_in: u64) -> Arc<Self> {
        let fake = Self::default();
        *fake.default_token.lock().unwrap() =
            Some(HttpReply::new(200, token_body(access_token, expires_in)));
        Arc::new(fake)
    }

    pub fn push_token_reply(&self, reply: HttpReply) {
        self.token_replies.lock().unwrap().push_back(Ok(reply));
    }

    pub fn push_token_error(&self, message: &str) {
        self.token_replies
            .lock()
            .unwrap()
            .push_back(Err(HttpError::Other(message.to_string())));
    }

    pub fn push_get_reply(&self, reply: HttpReply) {
        self.get_replies.lock().unwrap().push_back(reply);
    }

    /// Token posts from the `from`-th one on (0-based) answer after `delay`.
    pub fn slow_token_posts_from(&self, from: usize, delay: Duration) {
        *self.slow_posts.lock().unwrap() = Some((from, delay));
    }

    pub fn delay_gets(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = Some(delay);
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn recorded_gets(&self) -> Vec<RecordedGet> {
        self.gets.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpBackend for FakeHttp {
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpReply, HttpError> {
        let index = {
            let mut posts = self.posts.lock().unwrap();
            posts.push(RecordedPost {
                url: url.to_string(),
                form: form
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
            posts.len() - 1
        };
        let slow = *self.slow_posts.lock().unwrap();
        if let Some((from, delay)) = slow {
            if index >= from {
                tokio::time::sleep(delay).await;
            }
        }
        if let Some(scripted) = self.token_replies.lock().unwrap().pop_front() {
            return scripted;
        }
        match self.default_token.lock().unwrap().clone() {
            Some(reply) => Ok(reply),
            None => Ok(HttpReply::new(500, "no scripted reply")),
        }
    }

    async fn get_with_bearer(&self, url: &str, token: &str) -> Result<HttpReply, HttpError> {
        self.gets.lock().unwrap().push(RecordedGet {
            url: url.to_string(),
            token: token.to_string(),
        });
        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .get_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| HttpReply::new(404, "")))
    }
}
