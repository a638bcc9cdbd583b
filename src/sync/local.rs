use crate::config::DEFAULT_BPM;
use crate::error::{EngineError, Result};
use crate::lock;
use crate::sync::peer::{PeerCountCallback, PeerSession, PlayStateCallback, TempoCallback};
use log::{debug, info};
use std::sync::Mutex;

struct LocalState {
    enabled: bool,
    tempo: f64,
    playing: bool,
    peers: usize,
    tempo_pushes: Vec<f64>,
    play_pushes: Vec<bool>,
    enable_failure: Option<String>,
}

#[derive(Default)]
struct Callbacks {
    tempo: Option<TempoCallback>,
    peer_count: Option<PeerCountCallback>,
    play_state: Option<PlayStateCallback>,
}

/// An in-process session with no network behind it.
///
/// Peers are simulated through the `simulate_*` methods, which only have an
/// effect while the session is enabled. Everything pushed by the local side is
/// recorded.
pub struct LocalPeerSession {
    state: Mutex<LocalState>,
    callbacks: Mutex<Callbacks>,
}

impl Default for LocalPeerSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalPeerSession {
    pub fn new() -> Self {
        LocalPeerSession {
            state: Mutex::new(LocalState {
                enabled: false,
                tempo: DEFAULT_BPM,
                playing: false,
                peers: 0,
                tempo_pushes: Vec::new(),
                play_pushes: Vec::new(),
                enable_failure: None,
            }),
            callbacks: Mutex::new(Callbacks::default()),
        }
    }

    /// Make `enable(true)` fail with `message` until cleared with `None`.
    pub fn set_enable_failure(&self, message: Option<&str>) {
        lock(&self.state).enable_failure = message.map(str::to_string);
    }

    pub fn simulate_tempo(&self, bpm: f64) {
        {
            let mut state = lock(&self.state);
            if !state.enabled {
                return;
            }
            state.tempo = bpm;
        }
        let callback = lock(&self.callbacks).tempo.clone();
        if let Some(callback) = callback {
            callback(bpm);
        }
    }

    pub fn simulate_peer_count(&self, peers: usize) {
        {
            let mut state = lock(&self.state);
            if !state.enabled {
                return;
            }
            state.peers = peers;
        }
        let callback = lock(&self.callbacks).peer_count.clone();
        if let Some(callback) = callback {
            callback(peers);
        }
    }

    pub fn simulate_play_state(&self, playing: bool) {
        {
            let mut state = lock(&self.state);
            if !state.enabled {
                return;
            }
            state.playing = playing;
        }
        let callback = lock(&self.callbacks).play_state.clone();
        if let Some(callback) = callback {
            callback(playing);
        }
    }

    /// Tempos pushed by the local side, oldest first.
    pub fn tempo_pushes(&self) -> Vec<f64> {
        lock(&self.state).tempo_pushes.clone()
    }

    pub fn play_pushes(&self) -> Vec<bool> {
        lock(&self.state).play_pushes.clone()
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }
}

impl PeerSession for LocalPeerSession {
    fn enable(&self, enabled: bool) -> Result<()> {
        let dropped_peers = {
            let mut state = lock(&self.state);
            if enabled {
                if let Some(message) = &state.enable_failure {
                    return Err(EngineError::ConnectionError(message.clone()));
                }
                state.enabled = true;
                info!("Local peer session enabled");
                false
            } else {
                state.enabled = false;
                let had_peers = state.peers > 0;
                state.peers = 0;
                had_peers
            }
        };

        if dropped_peers {
            let callback = lock(&self.callbacks).peer_count.clone();
            if let Some(callback) = callback {
                callback(0);
            }
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    fn set_tempo(&self, bpm: f64) {
        let mut state = lock(&self.state);
        if state.enabled {
            debug!("Peer session tempo pushed: {}", bpm);
            state.tempo = bpm;
            state.tempo_pushes.push(bpm);
        }
    }

    fn set_playing(&self, playing: bool) {
        let mut state = lock(&self.state);
        if state.enabled {
            state.playing = playing;
            state.play_pushes.push(playing);
        }
    }

    fn tempo(&self) -> f64 {
        lock(&self.state).tempo
    }

    fn peer_count(&self) -> usize {
        lock(&self.state).peers
    }

    fn on_tempo_changed(&self, callback: TempoCallback) {
        lock(&self.callbacks).tempo = Some(callback);
    }

    fn on_peer_count_changed(&self, callback: PeerCountCallback) {
        lock(&self.callbacks).peer_count = Some(callback);
    }

    fn on_play_state_changed(&self, callback: PlayStateCallback) {
        lock(&self.callbacks).play_state = Some(callback);
    }
}
