use room_proto::EventPayload;

/// Local view of the shared playback: which video, where, playing or not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackState {
    /// Opaque locator of the active video. Empty means nothing is selected.
    pub video_reference: String,
    /// Last known position in seconds. Only meaningful with a reference.
    pub position_seconds: f64,
    pub is_playing: bool,
}

impl PlaybackState {
    pub fn has_video(&self) -> bool {
        !self.video_reference.is_empty()
    }

    /// Builds the state an inbound payload dictates. Absent fields take their
    /// zero value; positions are clamped to finite, non-negative seconds.
    pub fn from_payload(payload: &EventPayload) -> Self {
        Self {
            video_reference: payload.video_reference.clone().unwrap_or_default(),
            position_seconds: sanitize_position(payload.position_seconds.unwrap_or(0.0)),
            is_playing: payload.is_playing.unwrap_or(false),
        }
    }
}

pub(crate) fn sanitize_position(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}

/// Cached copy of the room's queue, in queue order. Only ever replaced whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistSnapshot {
    entries: Vec<String>,
}

impl PlaylistSnapshot {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where the most recent playback mutation came from. Drives echo
/// suppression for surface callbacks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum MutationOrigin {
    #[default]
    Initial,
    /// A genuine local surface callback or user request.
    Local,
    /// An inbound session event.
    Remote,
    /// An inbound event that also repositioned the surface; the surface's
    /// own seek report near `target` is an echo, not a user seek.
    RemoteSeek { target: f64 },
}

/// Read model published to the session view after every engine step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineSnapshot {
    pub playback: PlaybackState,
    pub playlist: PlaylistSnapshot,
    pub media_ready: bool,
    /// Outbound frames the transport refused. Non-zero means the room may not
    /// have seen some local actions.
    pub outbound_failures: u64,
}

impl EngineSnapshot {
    /// Whether the surface should currently be rendering playback.
    pub fn should_play(&self) -> bool {
        self.playback.is_playing && self.media_ready
    }
}
