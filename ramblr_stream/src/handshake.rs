use thiserror::Error;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use url::Url;

pub const AUTHORIZATION_PROTOCOL: &str = "Authorization";
pub const PROTOCOL_HEADER: &str = "sec-websocket-protocol";
pub const TOKEN_QUERY_PARAM: &str = "access_token";

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("invalid websocket url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{method} requires an access token")]
    MissingToken { method: HandshakeMethod },
    #[error("could not build upgrade request: {0}")]
    Request(String),
    #[error("transport failed before open: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeMethod {
    /// `"Authorization, Bearer-<token>"` as one subprotocol string.
    CombinedProtocol,
    /// `["Authorization", "Bearer-<token>"]` as a subprotocol list.
    ProtocolList,
    /// Explicit `sec-websocket-protocol` header with the combined string.
    ProtocolHeader,
    /// `access_token=<token>` query parameter.
    QueryToken,
    /// No auth material.
    Anonymous,
}

impl HandshakeMethod {
    pub const ALL: [HandshakeMethod; 5] = [
        HandshakeMethod::CombinedProtocol,
        HandshakeMethod::ProtocolList,
        HandshakeMethod::ProtocolHeader,
        HandshakeMethod::QueryToken,
        HandshakeMethod::Anonymous,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        match self {
            HandshakeMethod::CombinedProtocol => 0,
            HandshakeMethod::ProtocolList => 1,
            HandshakeMethod::ProtocolHeader => 2,
            HandshakeMethod::QueryToken => 3,
            HandshakeMethod::Anonymous => 4,
        }
    }

    pub fn needs_token(self) -> bool {
        !matches!(self, HandshakeMethod::Anonymous)
    }
}

impl std::fmt::Display for HandshakeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandshakeMethod::CombinedProtocol => "combined subprotocol string",
            HandshakeMethod::ProtocolList => "subprotocol list",
            HandshakeMethod::ProtocolHeader => "sec-websocket-protocol header",
            HandshakeMethod::QueryToken => "query parameter token",
            HandshakeMethod::Anonymous => "no auth",
        };
        write!(f, "method {} ({name})", self.index() + 1)
    }
}

/// Transport-independent description of one upgrade attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub url: Url,
    pub protocols: Vec<String>,
    pub headers: Vec<(String, String)>,
}

impl ConnectionParams {
    pub fn into_request(self) -> Result<Request, HandshakeError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| HandshakeError::Request(e.to_string()))?;

        if !self.protocols.is_empty() {
            let joined = self.protocols.join(", ");
            let value = HeaderValue::from_str(&joined)
                .map_err(|e| HandshakeError::Request(e.to_string()))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| HandshakeError::Request(e.to_string()))?;
            let value =
                HeaderValue::from_str(&value).map_err(|e| HandshakeError::Request(e.to_string()))?;
            request.headers_mut().insert(name, value);
        }
        Ok(request)
    }
}

/// `{base}/sessions/ws?workspace_id=..[&skill_id=..]`
pub fn session_url(
    websocket_url: &str,
    workspace_id: &str,
    skill_id: Option<&str>,
) -> Result<Url, HandshakeError> {
    let base = websocket_url.trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}/sessions/ws")).map_err(|e| {
        HandshakeError::InvalidUrl {
            url: websocket_url.to_string(),
            reason: e.to_string(),
        }
    })?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("workspace_id", workspace_id);
        if let Some(skill) = skill_id.filter(|s| !s.is_empty()) {
            query.append_pair("skill_id", skill);
        }
    }
    Ok(url)
}

fn bearer_protocol(token: &str) -> String {
    format!("Bearer-{token}")
}

fn combined_protocol(token: &str) -> String {
    format!("{AUTHORIZATION_PROTOCOL}, {}", bearer_protocol(token))
}

pub fn build_handshake(
    method: HandshakeMethod,
    token: Option<&str>,
    url: &Url,
) -> Result<ConnectionParams, HandshakeError> {
    let token = match (method.needs_token(), token) {
        (true, Some(t)) if !t.is_empty() => t,
        (true, _) => return Err(HandshakeError::MissingToken { method }),
        (false, _) => "",
    };

    let mut params = ConnectionParams {
        url: url.clone(),
        protocols: Vec::new(),
        headers: Vec::new(),
    };
    match method {
        HandshakeMethod::CombinedProtocol => {
            params.protocols.push(combined_protocol(token));
        }
        HandshakeMethod::ProtocolList => {
            params.protocols.push(AUTHORIZATION_PROTOCOL.to_string());
            params.protocols.push(bearer_protocol(token));
        }
        HandshakeMethod::ProtocolHeader => {
            params
                .headers
                .push((PROTOCOL_HEADER.to_string(), combined_protocol(token)));
        }
        HandshakeMethod::QueryToken => {
            params
                .url
                .query_pairs_mut()
                .append_pair(TOKEN_QUERY_PARAM, token);
        }
        HandshakeMethod::Anonymous => {}
    }
    Ok(params)
}
