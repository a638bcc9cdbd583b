//! The single owner of transport and track state.
//!
//! Every write from any surface (UI, MIDI, OSC, peer sync, the step router)
//! goes through the setters on [`Transport`]. A setter validates, mutates and
//! then notifies every [`Subscriber`] before it returns, so once a call has
//! completed no observer can still be acting on the old value.

use crate::error::{EngineError, Result};
use crate::lock;
use crate::state::{
    validate_bpm, validate_volume, StepCount, TrackId, TrackState, Tracks, TransportState,
};
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard};

type Subscribers = Vec<Arc<dyn Subscriber>>;

/// What changed, as seen by subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    PlayStateChanged(bool),
    TempoChanged(f64),
    StepCountChanged(StepCount),
    TrackAdded(TrackId),
    TrackRemoved(TrackId),
    TrackVolumeChanged { track: TrackId, volume_db: f64 },
    StepToggled { track: TrackId, step: usize, active: bool },
    CurrentStepChanged { track: TrackId, step: usize },
    /// A one-shot trigger for the sample engine (MIDI note, OSC trigger)
    TrackTriggered(TrackId),
}

/// Observer of transport mutations.
///
/// Called synchronously on the writer's thread with the state as it was
/// right after the mutation. Getters may be called from inside
/// `on_transport_event`; setters and `subscribe` may not.
pub trait Subscriber: Send + Sync {
    fn on_transport_event(&self, event: &TransportEvent, state: &TransportState);
}

/// Owned read-only projection of everything the transport holds.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSnapshot {
    pub transport: TransportState,
    pub tracks: Vec<TrackState>,
}

struct Inner {
    state: TransportState,
    tracks: Tracks,
}

pub struct Transport {
    inner: Mutex<Inner>,
    subscribers: Mutex<Subscribers>,
}

/// Both locks of a write, always taken subscribers first.
struct Write<'a> {
    subscribers: MutexGuard<'a, Subscribers>,
    inner: MutexGuard<'a, Inner>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_track(id: TrackId) -> EngineError {
    EngineError::out_of_range("track", id, "an existing track id")
}

fn unknown_index(index: usize) -> EngineError {
    EngineError::out_of_range("track index", index, "below the track count")
}

fn unknown_step(step: usize) -> EngineError {
    EngineError::out_of_range("step", step, "below the step count")
}

impl Transport {
    pub fn new() -> Self {
        Transport {
            inner: Mutex::new(Inner {
                state: TransportState::default(),
                tracks: Tracks::default(),
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        lock(&self.subscribers).push(subscriber);
    }

    pub fn clear_subscribers(&self) {
        lock(&self.subscribers).clear();
    }

    fn write(&self) -> Write<'_> {
        let subscribers = lock(&self.subscribers);
        let inner = lock(&self.inner);
        Write { subscribers, inner }
    }

    /// Deliver `event` to every subscriber, releasing the state lock first.
    ///
    /// The subscriber list stays locked until the fan-out is done, so
    /// concurrent writers notify in the same order they mutated.
    fn publish(write: Write<'_>, event: TransportEvent) {
        let Write { subscribers, inner } = write;
        let state = inner.state;
        drop(inner);

        debug!("Transport event: {:?}", event);
        for subscriber in subscribers.iter() {
            subscriber.on_transport_event(&event, &state);
        }
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<()> {
        let bpm = validate_bpm(bpm)?;
        let mut write = self.write();
        if write.inner.state.bpm == bpm {
            return Ok(());
        }
        write.inner.state.bpm = bpm;
        info!("Tempo set to {} BPM", bpm);
        Self::publish(write, TransportEvent::TempoChanged(bpm));
        Ok(())
    }

    pub fn set_playing(&self, playing: bool) -> Result<()> {
        let mut write = self.write();
        if write.inner.state.is_playing == playing {
            return Ok(());
        }
        write.inner.state.is_playing = playing;
        info!("Transport {}", if playing { "started" } else { "stopped" });
        Self::publish(write, TransportEvent::PlayStateChanged(playing));
        Ok(())
    }

    pub fn set_step_count(&self, steps: u32) -> Result<()> {
        let step_count = StepCount::try_from(steps)?;
        let mut write = self.write();
        if write.inner.state.step_count == step_count {
            return Ok(());
        }
        write.inner.state.step_count = step_count;
        write.inner.tracks.resize_all(step_count);
        info!("Step count set to {}", step_count);
        Self::publish(write, TransportEvent::StepCountChanged(step_count));
        Ok(())
    }

    pub fn set_track_volume(&self, id: TrackId, volume_db: f64) -> Result<()> {
        let volume_db = validate_volume(volume_db)?;
        let mut write = self.write();
        let track = write.inner.tracks.get_mut(id).ok_or_else(|| unknown_track(id))?;
        if track.volume_db == volume_db {
            return Ok(());
        }
        track.volume_db = volume_db;
        Self::publish(
            write,
            TransportEvent::TrackVolumeChanged {
                track: id,
                volume_db,
            },
        );
        Ok(())
    }

    /// Volume write addressed by track position (MIDI channel, OSC path).
    pub fn set_track_volume_at(&self, index: usize, volume_db: f64) -> Result<TrackId> {
        let id = self.track_id_at(index).ok_or_else(|| unknown_index(index))?;
        self.set_track_volume(id, volume_db)?;
        Ok(id)
    }

    /// Flip one step and return its new value.
    pub fn toggle_step(&self, id: TrackId, step: usize) -> Result<bool> {
        let mut write = self.write();
        let steps = write.inner.state.step_count.len();
        let track = write.inner.tracks.get_mut(id).ok_or_else(|| unknown_track(id))?;
        if step >= steps {
            return Err(unknown_step(step));
        }
        let active = !track.active_steps[step];
        track.active_steps[step] = active;
        Self::publish(
            write,
            TransportEvent::StepToggled {
                track: id,
                step,
                active,
            },
        );
        Ok(active)
    }

    pub fn add_track(&self) -> TrackId {
        let mut write = self.write();
        let step_count = write.inner.state.step_count;
        let id = write.inner.tracks.add(step_count);
        info!("Added track {}", id);
        Self::publish(write, TransportEvent::TrackAdded(id));
        id
    }

    pub fn remove_track(&self, id: TrackId) -> Result<()> {
        let mut write = self.write();
        write.inner.tracks.remove(id).ok_or_else(|| unknown_track(id))?;
        info!("Removed track {}", id);
        Self::publish(write, TransportEvent::TrackRemoved(id));
        Ok(())
    }

    pub fn trigger_track(&self, id: TrackId) -> Result<()> {
        let write = self.write();
        write.inner.tracks.get(id).ok_or_else(|| unknown_track(id))?;
        Self::publish(write, TransportEvent::TrackTriggered(id));
        Ok(())
    }

    pub fn trigger_track_at(&self, index: usize) -> Result<TrackId> {
        let id = self.track_id_at(index).ok_or_else(|| unknown_index(index))?;
        self.trigger_track(id)?;
        Ok(id)
    }

    /// Record the step the sequencing engine just played on a track.
    pub fn set_current_step(&self, id: TrackId, step: usize) -> Result<()> {
        let mut write = self.write();
        let steps = write.inner.state.step_count.len();
        let track = write.inner.tracks.get_mut(id).ok_or_else(|| unknown_track(id))?;
        if step >= steps {
            return Err(unknown_step(step));
        }
        if track.current_step_index == Some(step) {
            return Ok(());
        }
        track.current_step_index = Some(step);
        Self::publish(write, TransportEvent::CurrentStepChanged { track: id, step });
        Ok(())
    }

    pub fn state(&self) -> TransportState {
        lock(&self.inner).state
    }

    pub fn bpm(&self) -> f64 {
        lock(&self.inner).state.bpm
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.inner).state.is_playing
    }

    pub fn step_count(&self) -> StepCount {
        lock(&self.inner).state.step_count
    }

    pub fn track_count(&self) -> usize {
        lock(&self.inner).tracks.len()
    }

    pub fn track_id_at(&self, index: usize) -> Option<TrackId> {
        lock(&self.inner).tracks.id_at(index)
    }

    pub fn track(&self, id: TrackId) -> Option<TrackState> {
        lock(&self.inner).tracks.get(id).cloned()
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        let inner = lock(&self.inner);
        TransportSnapshot {
            transport: inner.state,
            tracks: inner.tracks.to_vec(),
        }
    }
}
