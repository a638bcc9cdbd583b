use crate::error::Result;
use crate::midi::MidiRouter;
use crate::osc::OscBridge;
use crate::state::TrackId;
use crate::transport::Transport;
use log::{trace, warn};
use std::sync::Arc;

/// A step with its active flag set was reached during playback.
#[derive(Debug, Clone, PartialEq)]
pub struct StepEvent {
    pub track: TrackId,
    pub step: usize,
    pub sample_label: Option<String>,
}

impl StepEvent {
    pub fn new(track: TrackId, step: usize) -> Self {
        StepEvent {
            track,
            step,
            sample_label: None,
        }
    }

    pub fn with_sample(mut self, label: impl Into<String>) -> Self {
        self.sample_label = Some(label.into());
        self
    }
}

/// Which sinks accepted a step event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepDelivery {
    pub midi: bool,
    pub osc: bool,
}

/// Fans fired steps out to MIDI and OSC. Each sink is attempted on its own;
/// a failure in one is logged and never stops the other.
pub struct StepEventRouter {
    transport: Arc<Transport>,
    midi: MidiRouter,
    osc: OscBridge,
}

impl StepEventRouter {
    pub fn new(transport: Arc<Transport>, midi: MidiRouter, osc: OscBridge) -> Self {
        StepEventRouter {
            transport,
            midi,
            osc,
        }
    }

    pub fn step_fired(&self, event: &StepEvent) -> Result<StepDelivery> {
        self.transport.set_current_step(event.track, event.step)?;
        trace!(
            "Step {} fired on track {} ({})",
            event.step,
            event.track,
            event.sample_label.as_deref().unwrap_or("no sample")
        );

        let mut delivery = StepDelivery::default();
        if self.midi.output().is_bound() {
            match self.midi.send_note_on(event.track) {
                Ok(()) => delivery.midi = true,
                Err(e) => warn!("MIDI note for track {} not sent: {}", event.track, e),
            }
        }
        if self.osc.is_connected() {
            match self.osc.send_step_played(event.track) {
                Ok(()) => delivery.osc = true,
                Err(e) => warn!("OSC step telemetry for track {} not sent: {}", event.track, e),
            }
        }
        Ok(delivery)
    }
}
