use crate::http::{HttpBackend, HttpError};
use crate::router::{catalog_from_process_response, parse_payload, ProtocolError};
use crate::token::AuthError;
use ramblr_protocol::InstructionPayload;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum CatalogFetchError {
    #[error("invalid api base url {0:?}")]
    InvalidUrl(String),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("no access token for the process request: {0}")]
    Auth(#[from] AuthError),
    #[error("process request failed with status {0}")]
    BadStatus(u16),
    #[error("failed to parse process response: {0}")]
    Parse(#[from] ProtocolError),
}

/// `{api_base}/processes/{process_id}` with the id as one escaped segment.
pub fn process_url(api_base: &str, process_id: &str) -> Result<Url, CatalogFetchError> {
    let mut url =
        Url::parse(api_base).map_err(|_| CatalogFetchError::InvalidUrl(api_base.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| CatalogFetchError::InvalidUrl(api_base.to_string()))?
        .pop_if_empty()
        .push("processes")
        .push(process_id);
    Ok(url)
}

/// Fetches the step catalog of a process. An answer without instructions
/// yields an empty list.
pub async fn fetch_process_instructions(
    http: &dyn HttpBackend,
    api_base: &str,
    process_id: &str,
    token: &str,
) -> Result<Vec<InstructionPayload>, CatalogFetchError> {
    let url = process_url(api_base, process_id)?;
    debug!(%url, "fetching process instructions");
    let reply = http.get_with_bearer(url.as_str(), token).await?;
    if !reply.is_success() {
        return Err(CatalogFetchError::BadStatus(reply.status));
    }
    let payload = parse_payload(&reply.body)?;
    Ok(catalog_from_process_response(&payload).unwrap_or_default())
}

/// At most one outstanding fetch per process id, and no refetch once a
/// process catalog has been loaded.
#[derive(Debug, Default)]
pub struct CatalogFetchGuard {
    in_flight: HashSet<String>,
    loaded: HashSet<String>,
}

impl CatalogFetchGuard {
    pub fn try_begin(&mut self, process_id: &str) -> bool {
        if process_id.is_empty()
            || self.loaded.contains(process_id)
            || self.in_flight.contains(process_id)
        {
            return false;
        }
        self.in_flight.insert(process_id.to_string());
        true
    }

    pub fn finish(&mut self, process_id: &str, loaded: bool) {
        self.in_flight.remove(process_id);
        if loaded {
            self.loaded.insert(process_id.to_string());
        }
    }

    pub fn is_in_flight(&self, process_id: &str) -> bool {
        self.in_flight.contains(process_id)
    }
}
