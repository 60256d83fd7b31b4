//! Room Sync: keeps a participant's player in lockstep with a shared room.
//!
//! Responsibilities:
//! - holding the local view of what is playing, where, and whether it plays
//! - turning local player callbacks into session events for the relay
//! - applying other participants' events without echoing them back
//! - keeping the room playlist mirrored through refreshes

use thiserror::Error;

pub mod config;
pub mod engine;
pub mod refresh;
pub mod session;
pub mod state;
pub mod surface;
pub mod telemetry;

pub use config::SessionConfig;
pub use engine::SyncEngine;
pub use refresh::{RefreshSchedule, RefreshTicket};
pub use session::{Session, SessionHandle, SessionRuntime};
pub use state::{EngineSnapshot, MutationOrigin, PlaybackState, PlaylistSnapshot};
pub use surface::MediaSurface;

pub use playlist_sdk::{InMemoryPlaylistStore, PlaylistAccessor, PlaylistClient};
pub use room_proto::{Action, EventPayload, SessionEvent};
pub use room_transport::{FrameSink, LocalRelay, MemorySink, WebSocketChannel};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session task has stopped")]
    Closed,
    #[error(transparent)]
    Transport(#[from] room_transport::TransportError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("logging setup failed: {0}")]
    Logging(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
