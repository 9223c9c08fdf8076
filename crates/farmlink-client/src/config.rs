//! Client session configuration.

use std::time::Duration;

use farmlink_shared::constants::{
    DEFAULT_HTTP_PORT, DIRECTORY_REFRESH_SECS, DIRECTORY_STALE_SECS, PONG_TIMEOUT_SECS,
    PRESENCE_REFRESH_SECS, RECONNECT_ATTEMPTS, REMOTE_TYPING_TTL_MS, TYPING_WINDOW_MS,
    WS_IDENTITY_PARAM, WS_PATH,
};
use farmlink_shared::UserId;
use reqwest::Url;

use crate::error::SessionError;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the chat server, e.g. `http://localhost:5000`.
    pub server_url: String,

    /// Consecutive failed connection attempts before giving up.
    pub reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,

    /// How long to wait for the server's first frame after the upgrade.
    pub handshake_timeout: Duration,

    pub presence_refresh: Duration,
    pub directory_refresh: Duration,
    /// A directory fetched more recently than this is not re-fetched by the
    /// periodic refresh.
    pub directory_stale_after: Duration,

    pub typing_window: Duration,
    pub remote_typing_ttl: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            reconnect_attempts: RECONNECT_ATTEMPTS,
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(PONG_TIMEOUT_SECS),
            presence_refresh: Duration::from_secs(PRESENCE_REFRESH_SECS),
            directory_refresh: Duration::from_secs(DIRECTORY_REFRESH_SECS),
            directory_stale_after: Duration::from_secs(DIRECTORY_STALE_SECS),
            typing_window: Duration::from_millis(TYPING_WINDOW_MS),
            remote_typing_ttl: Duration::from_millis(REMOTE_TYPING_TTL_MS),
        }
    }
}

impl ClientConfig {
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    pub fn with_reconnect(
        mut self,
        attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        self.reconnect_attempts = attempts;
        self.reconnect_base_delay = base_delay;
        self.reconnect_max_delay = max_delay;
        self
    }

    pub fn base_url(&self) -> Result<Url, SessionError> {
        Url::parse(&self.server_url)
            .map_err(|e| SessionError::Config(format!("invalid server url: {e}")))
    }

    /// Socket URL for `user`: the base URL with a ws scheme, the socket
    /// path appended under any base path, and the identity query parameter.
    pub fn ws_url(&self, user: &UserId) -> Result<Url, SessionError> {
        let mut url = self.base_url()?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme).map_err(|_| {
            SessionError::Config(format!("cannot use {scheme} with {}", self.server_url))
        })?;
        url.path_segments_mut()
            .map_err(|_| SessionError::Config(format!("{} cannot be a base URL", self.server_url)))?
            .pop_if_empty()
            .push(WS_PATH.trim_start_matches('/'));
        url.query_pairs_mut()
            .clear()
            .append_pair(WS_IDENTITY_PARAM, user.as_str());
        Ok(url)
    }

    /// Delay before reconnect attempt `attempt` (1-based): doubling from the
    /// base delay, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.reconnect_base_delay
            .saturating_mul(1u32 << exp)
            .min(self.reconnect_max_delay)
    }
}
