use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{FrameSink, InboundFrames, TransportError, TransportResult};

/// In-process stand-in for the relay: every frame published into a session is
/// fanned out to all of its peers, the sender included.
#[derive(Debug, Default)]
pub struct LocalRelay {
    sessions: parking_lot::RwLock<HashMap<String, SessionFanout>>,
}

#[derive(Debug, Default)]
struct SessionFanout {
    peers: Vec<mpsc::UnboundedSender<String>>,
    history: Vec<String>,
}

impl LocalRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Joins `session_id`, returning the peer's outbound half and its inbound
    /// receiver.
    pub fn join(self: &Arc<Self>, session_id: &str) -> (LocalPeer, InboundFrames) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .write()
            .entry(session_id.to_string())
            .or_default()
            .peers
            .push(tx);
        let peer = LocalPeer {
            relay: Arc::clone(self),
            session_id: session_id.to_string(),
            open: AtomicBool::new(true),
        };
        (peer, rx)
    }

    /// Delivers a frame to every peer of the session, as if the relay itself
    /// originated it.
    pub fn broadcast(&self, session_id: &str, frame: &str) -> usize {
        let mut guard = self.sessions.write();
        let fanout = guard.entry(session_id.to_string()).or_default();
        fanout.history.push(frame.to_string());
        fanout.peers.retain(|peer| peer.send(frame.to_string()).is_ok());
        fanout.peers.len()
    }

    /// Every frame the session has seen, in relay order.
    pub fn history(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .read()
            .get(session_id)
            .map(|fanout| fanout.history.clone())
            .unwrap_or_default()
    }
}

pub struct LocalPeer {
    relay: Arc<LocalRelay>,
    session_id: String,
    open: AtomicBool,
}

impl LocalPeer {
    /// Stops accepting outbound frames; subsequent sends fail with `Closed`.
    pub fn disconnect(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl FrameSink for LocalPeer {
    fn send_text(&self, frame: String) -> TransportResult<()> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.relay.broadcast(&self.session_id, &frame);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Sink that records outbound frames instead of sending them.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: parking_lot::Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.frames.lock())
    }

    pub fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::Release);
    }
}

impl FrameSink for MemorySink {
    fn send_text(&self, frame: String) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.frames.lock().push(frame);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}
