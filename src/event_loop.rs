// event_loop.rs

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::state::TrackId;
use crate::step_router::StepEvent;
use crossbeam::channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// An intent from a UI or other controller.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    Play,
    Stop,
    SetBpm(f64),
    SetStepCount(u32),
    ToggleStep { track: TrackId, step: usize },
    SetVolume { track: TrackId, volume_db: f64 },
    AddTrack,
    RemoveTrack(TrackId),
    TriggerTrack(TrackId),
    StepFired(StepEvent),
    SelectOutput(Option<String>),
    RefreshDevices,
    ConnectOsc(String),
    DisconnectOsc,
    EnableSync(bool),
    ProgramChange(u32),
    SendSysEx(String),
    Shutdown,
}

/// Applies intents to the engine one at a time, in arrival order.
pub struct EventLoop {
    engine: Arc<Engine>,
    intents: Receiver<EngineMessage>,
    feedback: Option<Sender<EngineError>>,
}

impl EventLoop {
    pub fn new(
        engine: Arc<Engine>,
        intents: Receiver<EngineMessage>,
        feedback: Option<Sender<EngineError>>,
    ) -> Self {
        EventLoop {
            engine,
            intents,
            feedback,
        }
    }

    /// Run until a `Shutdown` intent arrives or every sender is gone.
    pub fn run(&self) {
        loop {
            match self.intents.recv() {
                Ok(EngineMessage::Shutdown) => {
                    info!("Shutdown requested");
                    self.engine.shutdown();
                    break;
                }
                Ok(message) => {
                    if let Err(e) = self.apply(message) {
                        self.reject(e);
                    }
                }
                Err(e) => {
                    error!("Intent channel closed: {}", e);
                    break;
                }
            }
        }
    }

    fn reject(&self, e: EngineError) {
        warn!("Intent rejected: {}", e);
        if let Some(feedback) = &self.feedback {
            let _ = feedback.send(e);
        }
    }

    /// Apply a single intent.
    pub fn apply(&self, message: EngineMessage) -> Result<()> {
        debug!("Applying intent: {:?}", message);
        let engine = &self.engine;
        let transport = engine.transport();
        match message {
            EngineMessage::Play => transport.set_playing(true),
            EngineMessage::Stop => transport.set_playing(false),
            EngineMessage::SetBpm(bpm) => transport.set_bpm(bpm),
            EngineMessage::SetStepCount(steps) => transport.set_step_count(steps),
            EngineMessage::ToggleStep { track, step } => {
                transport.toggle_step(track, step).map(|_| ())
            }
            EngineMessage::SetVolume { track, volume_db } => {
                transport.set_track_volume(track, volume_db)
            }
            EngineMessage::AddTrack => {
                transport.add_track();
                Ok(())
            }
            EngineMessage::RemoveTrack(track) => transport.remove_track(track),
            EngineMessage::TriggerTrack(track) => transport.trigger_track(track),
            EngineMessage::StepFired(event) => engine.step_fired(&event).map(|_| ()),
            EngineMessage::SelectOutput(device) => engine.midi().select_output(device.as_deref()),
            EngineMessage::RefreshDevices => engine.midi().refresh_devices(),
            EngineMessage::ConnectOsc(url) => engine.osc().connect(&url),
            EngineMessage::DisconnectOsc => {
                engine.osc().disconnect();
                Ok(())
            }
            EngineMessage::EnableSync(enabled) => engine.sync().enable(enabled),
            EngineMessage::ProgramChange(program) => engine.midi().send_program_change(program),
            EngineMessage::SendSysEx(hex) => engine.midi().send_sysex_hex(&hex),
            EngineMessage::Shutdown => {
                engine.shutdown();
                Ok(())
            }
        }
    }
}
