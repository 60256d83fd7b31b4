//! Duplex text-frame channel between a room participant and the relay.
//!
//! Outbound frames go through a [`FrameSink`], which never blocks: frames are
//! queued for a writer task and delivery is best effort. Inbound frames arrive
//! on an [`InboundFrames`] receiver in the order the relay sent them.

use thiserror::Error;
use tokio::sync::mpsc;

mod local;
mod websocket;

pub use local::{LocalPeer, LocalRelay, MemorySink};
pub use websocket::WebSocketChannel;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport channel closed")]
    Closed,
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("invalid transport url: {0}")]
    InvalidUrl(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Receiving half of a channel. Yields `None` once the connection is gone.
pub type InboundFrames = mpsc::UnboundedReceiver<String>;

pub trait FrameSink: Send + Sync {
    /// Queues a text frame for delivery. Returns `Closed` when the channel is
    /// no longer open; success does not imply the relay received it.
    fn send_text(&self, frame: String) -> TransportResult<()>;

    fn is_open(&self) -> bool {
        true
    }
}

impl<S: FrameSink + ?Sized> FrameSink for std::sync::Arc<S> {
    fn send_text(&self, frame: String) -> TransportResult<()> {
        (**self).send_text(frame)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
