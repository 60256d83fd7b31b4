//! The session synchronization state machine.
//!
//! [`SyncEngine`] owns the local playback view and is driven from two sides:
//! local surface callbacks (`notify_*`, `request_video`) that may produce
//! outbound events, and inbound session events that reconcile local state
//! without producing any. It does no I/O of its own besides queueing outbound
//! frames; playlist fetches are requested by returning a [`RefreshTicket`]
//! and their results handed back through [`SyncEngine::apply_playlist`].

use std::sync::Arc;

use playlist_sdk::PlaylistResult;
use room_proto::{Action, EventPayload, SessionEvent};
use room_transport::FrameSink;
use tracing::{debug, info, warn};

use crate::refresh::{RefreshSchedule, RefreshTicket};
use crate::state::{sanitize_position, EngineSnapshot, MutationOrigin, PlaybackState, PlaylistSnapshot};
use crate::surface::MediaSurface;

/// A surface seek report within this distance of the engine's own seek
/// target is treated as the echo of that seek.
pub const SEEK_ECHO_TOLERANCE_SECS: f64 = 1.0;

pub struct SyncEngine {
    playback: PlaybackState,
    playlist: PlaylistSnapshot,
    media_ready: bool,
    origin: MutationOrigin,
    pending_seek: Option<f64>,
    refresh: RefreshSchedule,
    outbound_failures: u64,
    sink: Arc<dyn FrameSink>,
    surface: Option<Arc<dyn MediaSurface>>,
}

impl SyncEngine {
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            playback: PlaybackState::default(),
            playlist: PlaylistSnapshot::default(),
            media_ready: false,
            origin: MutationOrigin::Initial,
            pending_seek: None,
            refresh: RefreshSchedule::new(),
            outbound_failures: 0,
            sink,
            surface: None,
        }
    }

    pub fn attach_surface(&mut self, surface: Arc<dyn MediaSurface>) {
        self.surface = Some(surface);
    }

    pub fn detach_surface(&mut self) {
        self.surface = None;
        self.media_ready = false;
        self.pending_seek = None;
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    pub fn playlist(&self) -> &PlaylistSnapshot {
        &self.playlist
    }

    pub fn media_ready(&self) -> bool {
        self.media_ready
    }

    pub fn origin(&self) -> MutationOrigin {
        self.origin
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            playback: self.playback.clone(),
            playlist: self.playlist.clone(),
            media_ready: self.media_ready,
            outbound_failures: self.outbound_failures,
        }
    }

    /// Hands out a ticket for a playlist fetch the caller is about to run.
    pub fn schedule_refresh(&mut self) -> RefreshTicket {
        self.refresh.issue()
    }

    /// Asks the room to queue `reference`. When nothing is selected yet the
    /// reference becomes the active video right away so the surface can start
    /// loading; the relay's answer overwrites it later.
    pub fn request_video(&mut self, reference: &str) {
        let reference = reference.trim();
        if reference.is_empty() {
            debug!(target = "room.sync", "ignoring empty video request");
            return;
        }

        self.emit(SessionEvent::request(reference));

        if !self.playback.has_video() {
            self.playback.video_reference = reference.to_string();
            self.origin = MutationOrigin::Local;
        }
    }

    pub fn notify_play(&mut self) {
        self.close_seek_window();
        if !self.media_ready {
            debug!(target = "room.sync", "play before media ready; not broadcasting");
            return;
        }
        if self.playback.is_playing {
            debug!(target = "room.sync", origin = ?self.origin, "already playing; suppressing play");
            return;
        }

        let position = self.surface_time();
        self.playback.position_seconds = position;
        self.playback.is_playing = true;
        self.origin = MutationOrigin::Local;
        self.emit(SessionEvent::play(self.playback.video_reference.clone(), position));
    }

    /// A pause while already paused is not rebroadcast.
    pub fn notify_pause(&mut self) {
        self.close_seek_window();
        if !self.media_ready {
            debug!(target = "room.sync", "pause before media ready; not broadcasting");
            return;
        }
        if !self.playback.is_playing {
            debug!(target = "room.sync", origin = ?self.origin, "already paused; suppressing pause");
            return;
        }

        let position = self.surface_time();
        self.playback.position_seconds = position;
        self.playback.is_playing = false;
        self.origin = MutationOrigin::Local;
        self.emit(SessionEvent::pause(self.playback.video_reference.clone(), position));
    }

    /// The user let go of the seek bar. Seeking resumes playback at the new
    /// position for everyone.
    ///
    /// Right after the engine seeks the surface itself, the first seek report
    /// near that target is taken as the echo of that seek. Any other surface
    /// callback or inbound event closes that window.
    pub fn notify_seek_committed(&mut self) {
        let position = self.surface_time();

        if let MutationOrigin::RemoteSeek { target } = self.origin {
            if (position - target).abs() <= SEEK_ECHO_TOLERANCE_SECS {
                debug!(target = "room.sync", position, seek_target = target, "seek echo suppressed");
                self.origin = MutationOrigin::Remote;
                return;
            }
        }

        self.playback.position_seconds = position;
        self.playback.is_playing = true;
        self.origin = MutationOrigin::Local;
        self.emit(SessionEvent::play(self.playback.video_reference.clone(), position));
    }

    pub fn notify_media_ended(&mut self) {
        self.emit(SessionEvent::end());
    }

    /// Marks the surface ready and performs a seek deferred while it was
    /// still loading.
    pub fn notify_media_ready(&mut self) {
        if !self.media_ready {
            info!(target = "room.sync", video = %self.playback.video_reference, "media surface ready");
        }
        self.media_ready = true;
        if let Some(position) = self.pending_seek.take() {
            self.seek_now(position);
        }
    }

    /// Decodes and dispatches a raw inbound frame. Malformed frames are
    /// logged and dropped.
    pub fn handle_inbound_frame(&mut self, text: &str) -> Option<RefreshTicket> {
        match SessionEvent::decode(text) {
            Ok(event) => self.handle_inbound_event(event),
            Err(err) => {
                warn!(target = "room.sync", error = %err, frame = %text, "dropping malformed frame");
                None
            }
        }
    }

    /// Applies an event from another participant (or the relay). Returns a
    /// ticket when the event calls for a playlist refresh.
    pub fn handle_inbound_event(&mut self, event: SessionEvent) -> Option<RefreshTicket> {
        debug!(target = "room.sync", action = %event.action, payload = ?event.payload, "inbound event");
        self.close_seek_window();
        match event.action {
            Action::Request => {
                let ticket = self.schedule_refresh();
                let Some(payload) = event.payload else {
                    return Some(ticket);
                };
                let Some(requested) = payload.video() else {
                    debug!(target = "room.sync", "request without video; playback unchanged");
                    return Some(ticket);
                };
                if requested != self.playback.video_reference {
                    debug!(target = "room.sync", requested, "video queued; playback unchanged");
                    return Some(ticket);
                }
                self.reconcile(&payload);
                Some(ticket)
            }
            Action::Sync => {
                let Some(payload) = event.payload.filter(|payload| payload.video().is_some()) else {
                    debug!(target = "room.sync", "sync without video; ignoring");
                    return None;
                };
                let ticket = self.schedule_refresh();
                self.reconcile(&payload);
                self.seek_surface(self.playback.position_seconds);
                Some(ticket)
            }
            Action::Play => {
                let payload = event.payload?;
                let ticket = self.schedule_refresh();
                self.reconcile(&payload);
                self.seek_surface(self.playback.position_seconds);
                Some(ticket)
            }
            Action::Pause => {
                let payload = event.payload?;
                self.reconcile(&payload);
                None
            }
            Action::End => None,
            Action::Unknown(kind) => {
                debug!(target = "room.sync", %kind, "ignoring unknown action");
                None
            }
        }
    }

    /// Replaces the cached playlist with a fetch result. Errors and empty
    /// answers keep the current snapshot, as do results older than one
    /// already applied. Returns whether the snapshot was replaced.
    pub fn apply_playlist(
        &mut self,
        ticket: RefreshTicket,
        result: PlaylistResult<Option<Vec<String>>>,
    ) -> bool {
        match result {
            Ok(Some(entries)) => {
                if !self.refresh.accept(ticket) {
                    debug!(
                        target = "room.sync",
                        generation = ticket.generation,
                        applied = self.refresh.applied(),
                        issued = self.refresh.issued(),
                        "dropping stale playlist"
                    );
                    return false;
                }
                debug!(target = "room.sync", entries = entries.len(), "playlist refreshed");
                self.playlist = PlaylistSnapshot::new(entries);
                true
            }
            Ok(None) => {
                debug!(target = "room.sync", generation = ticket.generation, "playlist fetch returned nothing");
                false
            }
            Err(err) => {
                warn!(
                    target = "room.sync",
                    generation = ticket.generation,
                    error = %err,
                    "playlist fetch failed; keeping previous snapshot"
                );
                false
            }
        }
    }

    fn reconcile(&mut self, payload: &EventPayload) {
        self.playback = PlaybackState::from_payload(payload);
        self.origin = MutationOrigin::Remote;
        self.pending_seek = None;
    }

    fn close_seek_window(&mut self) {
        if let MutationOrigin::RemoteSeek { .. } = self.origin {
            self.origin = MutationOrigin::Remote;
        }
    }

    /// Seeks are only issued to a ready surface. Before that the latest
    /// target is kept and applied by `notify_media_ready`.
    fn seek_surface(&mut self, position: f64) {
        if position <= 0.0 {
            return;
        }
        if !self.media_ready {
            warn!(target = "room.sync", position, "seek requested before media ready; deferring");
            self.pending_seek = Some(position);
            return;
        }
        self.seek_now(position);
    }

    fn seek_now(&mut self, position: f64) {
        match &self.surface {
            Some(surface) => {
                surface.seek_to(position);
                self.origin = MutationOrigin::RemoteSeek { target: position };
            }
            None => {
                warn!(target = "room.sync", position, "seek requested without a media surface");
            }
        }
    }

    fn surface_time(&self) -> f64 {
        match &self.surface {
            Some(surface) => sanitize_position(surface.current_time()),
            None => self.playback.position_seconds,
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(target = "room.sync", action = %event.action, error = %err, "failed to encode event");
                self.outbound_failures += 1;
                return;
            }
        };
        match self.sink.send_text(frame) {
            Ok(()) => debug!(target = "room.sync", action = %event.action, "sent event"),
            Err(err) => {
                warn!(target = "room.sync", action = %event.action, error = %err, "failed to send event");
                self.outbound_failures += 1;
            }
        }
    }
}
