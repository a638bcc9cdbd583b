use crate::error::Result;
use std::sync::Arc;

pub type TempoCallback = Arc<dyn Fn(f64) + Send + Sync>;
pub type PeerCountCallback = Arc<dyn Fn(usize) + Send + Sync>;
pub type PlayStateCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// A tempo and transport consensus session shared with other applications.
///
/// Callbacks may arrive on any thread. Registering a callback replaces the
/// previous one of the same kind.
pub trait PeerSession: Send + Sync {
    fn enable(&self, enabled: bool) -> Result<()>;

    fn is_enabled(&self) -> bool;

    fn set_tempo(&self, bpm: f64);

    fn set_playing(&self, playing: bool);

    /// The session's current tempo.
    fn tempo(&self) -> f64;

    fn peer_count(&self) -> usize;

    fn on_tempo_changed(&self, callback: TempoCallback);

    fn on_peer_count_changed(&self, callback: PeerCountCallback);

    fn on_play_state_changed(&self, callback: PlayStateCallback);
}
