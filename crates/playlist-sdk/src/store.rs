use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{PlaylistAccessor, PlaylistError, PlaylistResult};

/// In-memory playlist service for tests and early wiring. Counts fetches and
/// can be told to fail or to answer slowly.
#[derive(Default)]
pub struct InMemoryPlaylistStore {
    playlists: Mutex<HashMap<String, Vec<String>>>,
    latencies: Mutex<Vec<Duration>>,
    fetches: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryPlaylistStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn enqueue(&self, session_id: &str, reference: impl Into<String>) {
        self.playlists
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(reference.into());
    }

    pub async fn replace(&self, session_id: &str, entries: Vec<String>) {
        self.playlists
            .lock()
            .await
            .insert(session_id.to_string(), entries);
    }

    /// Number of fetches served or failed so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Queues per-fetch delays; the n-th fetch sleeps for the n-th entry.
    pub async fn push_latency(&self, delay: Duration) {
        self.latencies.lock().await.push(delay);
    }
}

#[async_trait]
impl PlaylistAccessor for InMemoryPlaylistStore {
    async fn fetch_playlist(&self, session_id: &str) -> PlaylistResult<Option<Vec<String>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        // Snapshot before sleeping so a slow fetch answers with what it saw.
        let snapshot = self.playlists.lock().await.get(session_id).cloned();
        let delay = {
            let mut latencies = self.latencies.lock().await;
            if latencies.is_empty() {
                None
            } else {
                Some(latencies.remove(0))
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlaylistError::Store("playlist service unavailable".into()));
        }
        Ok(snapshot)
    }
}
