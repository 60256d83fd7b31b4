//! Read access to a room's shared playlist.
//!
//! The playlist lives in the room service; clients only ever read it and
//! replace their cached copy wholesale. [`PlaylistClient`] talks to the HTTP
//! API, [`InMemoryPlaylistStore`] backs tests and offline wiring.

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

mod store;

pub use store::InMemoryPlaylistStore;

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid playlist body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(String),
}

pub type PlaylistResult<T> = Result<T, PlaylistError>;

#[async_trait]
pub trait PlaylistAccessor: Send + Sync {
    /// Fetches the ordered video references queued in `session_id`.
    /// `Ok(None)` means the service had nothing to say (null or empty body)
    /// and callers should keep what they have.
    async fn fetch_playlist(&self, session_id: &str) -> PlaylistResult<Option<Vec<String>>>;
}

#[derive(Clone)]
pub struct PlaylistClient {
    http: Client,
    base_url: String,
}

impl PlaylistClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn playlist_url(&self, session_id: &str) -> String {
        format!("{}/room/{}/playlist", self.base_url, session_id)
    }
}

#[async_trait]
impl PlaylistAccessor for PlaylistClient {
    async fn fetch_playlist(&self, session_id: &str) -> PlaylistResult<Option<Vec<String>>> {
        let url = self.playlist_url(session_id);
        let res = self.http.get(&url).send().await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(PlaylistError::UnexpectedStatus { status, body });
        }

        let body = res.text().await?;
        if body.trim().is_empty() {
            debug!(target = "room.playlist", %url, "empty playlist body");
            return Ok(None);
        }
        let entries: Option<Vec<String>> = serde_json::from_str(&body)?;
        debug!(
            target = "room.playlist",
            %url,
            entries = entries.as_ref().map(Vec::len),
            "fetched playlist"
        );
        Ok(entries)
    }
}
