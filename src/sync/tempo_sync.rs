use crate::config::TEMPO_EPSILON;
use crate::error::Result;
use crate::lock;
use crate::state::TransportState;
use crate::sync::peer::PeerSession;
use crate::transport::{Subscriber, Transport, TransportEvent};
use log::{debug, info, trace, warn};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

/// Whether two tempos differ by more than the echo-suppression epsilon.
pub fn tempo_diverges(a: f64, b: f64) -> bool {
    (a - b).abs() > TEMPO_EPSILON
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Disabled,
    Enabling,
    Enabled,
    Error(String),
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Disabled => write!(f, "disabled"),
            SyncState::Enabling => write!(f, "enabling"),
            SyncState::Enabled => write!(f, "enabled"),
            SyncState::Error(message) => write!(f, "error: {}", message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoSyncStatus {
    pub enabled: bool,
    pub peer_count: usize,
    pub peer_bpm: f64,
}

struct SyncInner {
    state: SyncState,
    peer_count: usize,
    peer_bpm: f64,
    last_peer_playing: Option<bool>,
}

struct SyncShared {
    session: Arc<dyn PeerSession>,
    transport: Arc<Transport>,
    inner: Mutex<SyncInner>,
}

impl SyncShared {
    fn enabled(&self) -> bool {
        lock(&self.inner).state == SyncState::Enabled
    }

    fn on_peer_tempo(&self, bpm: f64) {
        {
            let mut inner = lock(&self.inner);
            if inner.state != SyncState::Enabled {
                return;
            }
            inner.peer_bpm = bpm;
        }

        let local = self.transport.bpm();
        if !tempo_diverges(local, bpm) {
            trace!("Peer tempo {} within epsilon of local {}", bpm, local);
            return;
        }
        match self.transport.set_bpm(bpm) {
            Ok(()) => info!("Tempo taken from peer session: {}", bpm),
            Err(e) => warn!("Peer tempo rejected: {}", e),
        }
    }

    fn on_local_tempo(&self, bpm: f64) {
        {
            let mut inner = lock(&self.inner);
            if inner.state != SyncState::Enabled || !tempo_diverges(bpm, inner.peer_bpm) {
                return;
            }
            inner.peer_bpm = bpm;
        }
        debug!("Pushing tempo {} to peer session", bpm);
        self.session.set_tempo(bpm);
    }

    fn on_peer_play_state(&self, playing: bool) {
        {
            let mut inner = lock(&self.inner);
            if inner.state != SyncState::Enabled {
                return;
            }
            inner.last_peer_playing = Some(playing);
        }
        if let Err(e) = self.transport.set_playing(playing) {
            warn!("Peer play state rejected: {}", e);
        }
    }

    fn on_local_play_state(&self, playing: bool) {
        {
            let mut inner = lock(&self.inner);
            if inner.state != SyncState::Enabled || inner.last_peer_playing == Some(playing) {
                return;
            }
            inner.last_peer_playing = Some(playing);
        }
        self.session.set_playing(playing);
    }

    fn on_peer_count(&self, peers: usize) {
        let mut inner = lock(&self.inner);
        if inner.state == SyncState::Enabled && inner.peer_count != peers {
            info!("Peer session now has {} peers", peers);
            inner.peer_count = peers;
        }
    }
}

/// Arbitrates tempo and play state between the transport and a peer session.
///
/// Both directions compare against the last tempo exchanged with the session,
/// so a value echoed back within the epsilon is never written again.
#[derive(Clone)]
pub struct TempoSync {
    shared: Arc<SyncShared>,
}

impl TempoSync {
    pub fn new(session: Arc<dyn PeerSession>, transport: Arc<Transport>) -> Self {
        let peer_bpm = transport.bpm();
        let shared = Arc::new(SyncShared {
            session: session.clone(),
            transport,
            inner: Mutex::new(SyncInner {
                state: SyncState::Disabled,
                peer_count: 0,
                peer_bpm,
                last_peer_playing: None,
            }),
        });

        let weak: Weak<SyncShared> = Arc::downgrade(&shared);
        session.on_tempo_changed(Arc::new(move |bpm| {
            if let Some(shared) = weak.upgrade() {
                shared.on_peer_tempo(bpm);
            }
        }));
        let weak = Arc::downgrade(&shared);
        session.on_peer_count_changed(Arc::new(move |peers| {
            if let Some(shared) = weak.upgrade() {
                shared.on_peer_count(peers);
            }
        }));
        let weak = Arc::downgrade(&shared);
        session.on_play_state_changed(Arc::new(move |playing| {
            if let Some(shared) = weak.upgrade() {
                shared.on_peer_play_state(playing);
            }
        }));

        TempoSync { shared }
    }

    /// Join or leave the peer session.
    ///
    /// On joining, the local tempo is pushed if it differs from the session's
    /// by more than the epsilon. A failed join leaves the state at `Error`.
    pub fn enable(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.start()
        } else {
            self.stop();
            Ok(())
        }
    }

    fn start(&self) -> Result<()> {
        let shared = &self.shared;
        {
            let mut inner = lock(&shared.inner);
            if inner.state == SyncState::Enabled {
                return Ok(());
            }
            inner.state = SyncState::Enabling;
        }

        if let Err(e) = shared.session.enable(true) {
            warn!("Tempo sync could not be enabled: {}", e);
            let mut inner = lock(&shared.inner);
            inner.state = SyncState::Error(e.to_string());
            inner.peer_count = 0;
            return Err(e);
        }

        let local = shared.transport.bpm();
        let push = {
            let mut inner = lock(&shared.inner);
            inner.state = SyncState::Enabled;
            inner.peer_count = shared.session.peer_count();
            inner.peer_bpm = shared.session.tempo();
            inner.last_peer_playing = None;
            if tempo_diverges(local, inner.peer_bpm) {
                inner.peer_bpm = local;
                true
            } else {
                false
            }
        };
        info!("Tempo sync enabled");

        if push {
            shared.session.set_tempo(local);
        }
        Ok(())
    }

    fn stop(&self) {
        if let Err(e) = self.shared.session.enable(false) {
            warn!("Peer session did not disable cleanly: {}", e);
        }
        let mut inner = lock(&self.shared.inner);
        if inner.state != SyncState::Disabled {
            info!("Tempo sync disabled");
        }
        inner.state = SyncState::Disabled;
        inner.peer_count = 0;
        inner.last_peer_playing = None;
    }

    pub fn state(&self) -> SyncState {
        lock(&self.shared.inner).state.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled()
    }

    pub fn status(&self) -> TempoSyncStatus {
        let inner = lock(&self.shared.inner);
        let enabled = inner.state == SyncState::Enabled;
        TempoSyncStatus {
            enabled,
            peer_count: if enabled { inner.peer_count } else { 0 },
            peer_bpm: inner.peer_bpm,
        }
    }

    pub fn shutdown(&self) {
        if self.state() != SyncState::Disabled {
            self.stop();
        }
    }
}

impl Subscriber for TempoSync {
    fn on_transport_event(&self, event: &TransportEvent, _state: &TransportState) {
        match event {
            TransportEvent::TempoChanged(bpm) => self.shared.on_local_tempo(*bpm),
            TransportEvent::PlayStateChanged(playing) => {
                self.shared.on_local_play_state(*playing)
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::LocalPeerSession;

    #[test]
    fn test_tempo_diverges() {
        assert!(!tempo_diverges(120.0, 120.05));
        assert!(!tempo_diverges(120.05, 120.0));
        assert!(tempo_diverges(120.0, 121.0));
        assert!(tempo_diverges(121.0, 120.0));
    }

    #[test]
    fn test_status_while_disabled() {
        let sync = TempoSync::new(
            Arc::new(LocalPeerSession::new()),
            Arc::new(Transport::new()),
        );
        assert_eq!(sync.state(), SyncState::Disabled);
        assert_eq!(
            sync.status(),
            TempoSyncStatus {
                enabled: false,
                peer_count: 0,
                peer_bpm: 120.0
            }
        );
    }
}
