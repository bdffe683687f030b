//! HTTP handshake against the service's start endpoint.

use async_trait::async_trait;
use rtm_core::{
    Channel, Handshake, HandshakeError, SelfIdentity, SessionSnapshot, User, WsSocket,
};
use serde::Deserialize;

/// Body returned by the start endpoint.
#[derive(Debug, Deserialize)]
struct StartResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(rename = "self", default)]
    self_identity: SelfIdentity,
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    url: String,
}

/// Exchanges a token for a session snapshot, then dials the websocket URL.
pub struct RtmHandshake {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl std::fmt::Debug for RtmHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtmHandshake")
            .field("api_url", &self.api_url)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl RtmHandshake {
    /// Create a handshake for `token` against `api_url`.
    #[must_use]
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            token: token.into(),
        }
    }

    /// Perform the credential exchange only.
    ///
    /// # Errors
    /// Returns error if the request fails or the service rejects the token.
    pub async fn start(&self) -> Result<SessionSnapshot, HandshakeError> {
        let body = self
            .http
            .post(&self.api_url)
            .form(&[("token", self.token.as_str())])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| HandshakeError::Http(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| HandshakeError::Http(e.to_string()))?;

        parse_start_response(&body)
    }
}

fn parse_start_response(body: &[u8]) -> Result<SessionSnapshot, HandshakeError> {
    let response: StartResponse = serde_json::from_slice(body).inspect_err(|e| {
        tracing::warn!("Invalid start response: {e}");
    })?;

    if !response.ok {
        return Err(HandshakeError::Rejected(
            response.error.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }
    if response.url.is_empty() {
        return Err(HandshakeError::Rejected("no websocket url in response".to_string()));
    }

    Ok(SessionSnapshot::new(
        response.self_identity,
        response.users,
        response.channels,
        response.url,
    ))
}

#[async_trait]
impl Handshake for RtmHandshake {
    async fn connect(&self) -> Result<(SessionSnapshot, WsSocket), HandshakeError> {
        let snapshot = self.start().await?;
        let (socket, _) = tokio_tungstenite::connect_async(snapshot.endpoint.as_str()).await?;
        tracing::info!(
            user = %snapshot.self_identity.name,
            users = snapshot.users.len(),
            channels = snapshot.channels.len(),
            "Handshake complete"
        );
        Ok((snapshot, socket))
    }
}
