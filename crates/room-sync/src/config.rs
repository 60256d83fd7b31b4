use std::env;
use std::time::Duration;

use url::Url;

use crate::SessionError;

pub const DEFAULT_TRANSPORT_BASE_URL: &str = "127.0.0.1:8080";
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_INITIAL_REFRESH_DELAY: Duration = Duration::from_millis(250);

/// Where a session client connects and how it behaves at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Room identifier shared by all participants.
    pub session_id: String,
    /// Relay address, with or without a `ws://`/`wss://` scheme.
    pub transport_base_url: String,
    /// Room service address used for playlist reads.
    pub api_base_url: String,
    /// Delay before the first playlist fetch, giving the transport time to
    /// connect.
    pub initial_refresh_delay: Duration,
}

impl SessionConfig {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            transport_base_url: DEFAULT_TRANSPORT_BASE_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            initial_refresh_delay: DEFAULT_INITIAL_REFRESH_DELAY,
        }
    }

    /// Load endpoints from `WATCHROOM_TRANSPORT_URL`, `WATCHROOM_API_URL` and
    /// `WATCHROOM_REFRESH_DELAY_MS`, falling back to defaults.
    pub fn from_env(session_id: impl Into<String>) -> Self {
        Self::from_lookup(session_id, |key| env::var(key).ok())
    }

    pub fn from_lookup<F>(session_id: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(session_id);
        if let Some(url) = lookup("WATCHROOM_TRANSPORT_URL").filter(|v| !v.trim().is_empty()) {
            config.transport_base_url = url;
        }
        if let Some(url) = lookup("WATCHROOM_API_URL").filter(|v| !v.trim().is_empty()) {
            config.api_base_url = url;
        }
        if let Some(delay) = lookup("WATCHROOM_REFRESH_DELAY_MS").and_then(|v| v.parse::<u64>().ok()) {
            config.initial_refresh_delay = Duration::from_millis(delay);
        }
        config
    }

    pub fn with_transport_base_url(mut self, url: impl Into<String>) -> Self {
        self.transport_base_url = url.into();
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_initial_refresh_delay(mut self, delay: Duration) -> Self {
        self.initial_refresh_delay = delay;
        self
    }

    /// Full relay endpoint for this session, e.g. `wss://relay.example/ws/room-1`.
    pub fn transport_url(&self) -> Result<String, SessionError> {
        if self.session_id.trim().is_empty() {
            return Err(SessionError::Config("session id must not be empty".into()));
        }
        let base = normalize_base(&self.transport_base_url, "ws", "wss");
        let url = format!("{}/ws/{}", base.trim_end_matches('/'), self.session_id);
        Url::parse(&url).map_err(|err| SessionError::Config(format!("invalid transport url {url}: {err}")))?;
        Ok(url)
    }

    /// Room service base URL with a scheme, without a trailing slash.
    pub fn api_url(&self) -> Result<String, SessionError> {
        let base = normalize_base(&self.api_base_url, "http", "https");
        let base = base.trim_end_matches('/').to_string();
        Url::parse(&base).map_err(|err| SessionError::Config(format!("invalid api url {base}: {err}")))?;
        Ok(base)
    }
}

/// Adds a scheme when missing (plain for loopback hosts, secure otherwise),
/// maps http(s) onto ws(s) for socket endpoints and pins `localhost` to IPv4.
fn normalize_base(raw: &str, plain: &str, secure: &str) -> String {
    let raw = raw.trim();
    let mut url = match raw.split_once("://") {
        Some(("http", rest)) | Some(("ws", rest)) => format!("{plain}://{rest}"),
        Some(("https", rest)) | Some(("wss", rest)) => format!("{secure}://{rest}"),
        Some(_) => raw.to_string(),
        None => {
            let scheme = if is_loopback(raw) { plain } else { secure };
            format!("{scheme}://{raw}")
        }
    };
    if url.contains("://localhost") {
        url = url.replacen("://localhost", "://127.0.0.1", 1);
    }
    url
}

fn is_loopback(host: &str) -> bool {
    host.starts_with("localhost") || host.starts_with("127.0.0.1") || host.starts_with("[::1]")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("default")
    }
}
