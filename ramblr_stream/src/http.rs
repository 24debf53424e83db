use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http error: {0}")]
    Other(String),
}

/// Status and body of a completed request. A status of 0 means the host
/// could not report one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpReply, HttpError>;
    async fn get_with_bearer(&self, url: &str, token: &str) -> Result<HttpReply, HttpError>;
}

pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new() -> Result<Self, HttpError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpReply, HttpError> {
        let resp = self.client.post(url).form(form).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(HttpReply { status, body })
    }

    async fn get_with_bearer(&self, url: &str, token: &str) -> Result<HttpReply, HttpError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(HttpReply { status, body })
    }
}
