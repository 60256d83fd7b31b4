//! Task that owns a [`SyncEngine`] and serializes everything that touches it.
//!
//! Surface callbacks and user actions arrive as commands through a
//! [`SessionHandle`], inbound relay frames through the transport receiver and
//! playlist results from spawned fetch tasks. One loop handles them one at a
//! time, so every handler sees the latest state. After each step the engine's
//! snapshot is published on a watch channel for the view.

use std::sync::Arc;
use std::time::Duration;

use playlist_sdk::{PlaylistAccessor, PlaylistClient, PlaylistResult};
use room_transport::{FrameSink, InboundFrames, WebSocketChannel};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::engine::SyncEngine;
use crate::refresh::RefreshTicket;
use crate::state::EngineSnapshot;
use crate::surface::MediaSurface;
use crate::SessionError;

enum Command {
    RequestVideo(String),
    NotifyPlay,
    NotifyPause,
    NotifySeekCommitted,
    NotifyMediaEnded,
    NotifyMediaReady,
    AttachSurface(Arc<dyn MediaSurface>),
    DetachSurface,
    Shutdown,
}

struct FetchDone {
    ticket: RefreshTicket,
    result: PlaylistResult<Option<Vec<String>>>,
}

/// Cloneable front door to a running session. Every call is fire-and-forget;
/// the only failure is the session task having stopped.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<EngineSnapshot>,
}

impl SessionHandle {
    pub fn request_video(&self, reference: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::RequestVideo(reference.into()))
    }

    pub fn notify_play(&self) -> Result<(), SessionError> {
        self.send(Command::NotifyPlay)
    }

    pub fn notify_pause(&self) -> Result<(), SessionError> {
        self.send(Command::NotifyPause)
    }

    pub fn notify_seek_committed(&self) -> Result<(), SessionError> {
        self.send(Command::NotifySeekCommitted)
    }

    pub fn notify_media_ended(&self) -> Result<(), SessionError> {
        self.send(Command::NotifyMediaEnded)
    }

    pub fn notify_media_ready(&self) -> Result<(), SessionError> {
        self.send(Command::NotifyMediaReady)
    }

    pub fn attach_surface(&self, surface: Arc<dyn MediaSurface>) -> Result<(), SessionError> {
        self.send(Command::AttachSurface(surface))
    }

    pub fn detach_surface(&self) -> Result<(), SessionError> {
        self.send(Command::DetachSurface)
    }

    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Command::Shutdown)
    }

    /// Latest published state.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.clone()
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}

pub struct SessionRuntime {
    session_id: String,
    engine: SyncEngine,
    playlist: Arc<dyn PlaylistAccessor>,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: InboundFrames,
    fetch_tx: mpsc::UnboundedSender<FetchDone>,
    fetch_rx: mpsc::UnboundedReceiver<FetchDone>,
    snapshots: watch::Sender<EngineSnapshot>,
}

impl SessionRuntime {
    /// Starts the session task. The first playlist fetch goes out after
    /// `config.initial_refresh_delay`.
    pub fn spawn(
        config: &SessionConfig,
        sink: Arc<dyn FrameSink>,
        inbound: InboundFrames,
        playlist: Arc<dyn PlaylistAccessor>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let engine = SyncEngine::new(sink);
        let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());

        let runtime = SessionRuntime {
            session_id: config.session_id.clone(),
            engine,
            playlist,
            commands: command_rx,
            inbound,
            fetch_tx,
            fetch_rx,
            snapshots: snapshot_tx,
        };
        let initial_delay = config.initial_refresh_delay;
        let task = tokio::spawn(runtime.run(initial_delay));

        (
            SessionHandle {
                commands: command_tx,
                snapshots: snapshot_rx,
            },
            task,
        )
    }

    async fn run(mut self, initial_delay: Duration) {
        info!(target = "room.session", session_id = %self.session_id, "session started");
        let ticket = self.engine.schedule_refresh();
        self.spawn_fetch(ticket, initial_delay);

        let mut inbound_open = true;
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
                frame = self.inbound.recv(), if inbound_open => match frame {
                    Some(text) => {
                        if let Some(ticket) = self.engine.handle_inbound_frame(&text) {
                            self.spawn_fetch(ticket, Duration::ZERO);
                        }
                    }
                    None => {
                        warn!(
                            target = "room.session",
                            session_id = %self.session_id,
                            "transport closed; remote updates stopped"
                        );
                        inbound_open = false;
                    }
                },
                Some(done) = self.fetch_rx.recv() => {
                    self.engine.apply_playlist(done.ticket, done.result);
                }
            }
            self.publish();
        }
        info!(target = "room.session", session_id = %self.session_id, "session stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::RequestVideo(reference) => self.engine.request_video(&reference),
            Command::NotifyPlay => self.engine.notify_play(),
            Command::NotifyPause => self.engine.notify_pause(),
            Command::NotifySeekCommitted => self.engine.notify_seek_committed(),
            Command::NotifyMediaEnded => self.engine.notify_media_ended(),
            Command::NotifyMediaReady => self.engine.notify_media_ready(),
            Command::AttachSurface(surface) => self.engine.attach_surface(surface),
            Command::DetachSurface => self.engine.detach_surface(),
            Command::Shutdown => {}
        }
    }

    fn spawn_fetch(&self, ticket: RefreshTicket, delay: Duration) {
        let playlist = Arc::clone(&self.playlist);
        let session_id = self.session_id.clone();
        let tx = self.fetch_tx.clone();
        debug!(target = "room.session", generation = ticket.generation, ?delay, "scheduling playlist fetch");
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = playlist.fetch_playlist(&session_id).await;
            let _ = tx.send(FetchDone { ticket, result });
        });
    }

    fn publish(&self) {
        let snapshot = self.engine.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

/// A session connected to the relay over WebSocket, reading the playlist from
/// the room service.
pub struct Session {
    handle: SessionHandle,
    channel: Arc<WebSocketChannel>,
    task: JoinHandle<()>,
}

impl Session {
    pub async fn connect(config: &SessionConfig) -> Result<Self, SessionError> {
        let playlist = Arc::new(PlaylistClient::new(config.api_url()?));
        Self::connect_with_playlist(config, playlist).await
    }

    pub async fn connect_with_playlist(
        config: &SessionConfig,
        playlist: Arc<dyn PlaylistAccessor>,
    ) -> Result<Self, SessionError> {
        let url = config.transport_url()?;
        let (channel, inbound) = WebSocketChannel::connect(&url).await?;
        let channel = Arc::new(channel);
        let (handle, task) = SessionRuntime::spawn(config, channel.clone(), inbound, playlist);
        Ok(Self {
            handle,
            channel,
            task,
        })
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Stops the session task and waits for it to finish. The socket closes
    /// once the last reference to it is dropped.
    pub async fn close(self) {
        let _ = self.handle.shutdown();
        let _ = self.task.await;
    }
}
