/// The local media player as the engine sees it.
///
/// The surface reports its lifecycle (ready, play, pause, seek, ended) to the
/// session view, which forwards them to the engine's `notify_*` operations.
/// It must not try to tell remote-driven transitions from local ones; the
/// engine does that.
pub trait MediaSurface: Send + Sync {
    /// Moves the playhead. Only called with positive, finite positions.
    fn seek_to(&self, position_seconds: f64);

    /// Current playhead position in seconds.
    fn current_time(&self) -> f64;
}
