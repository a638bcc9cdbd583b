use crate::config::{
    NOTE_BASE, NOTE_OFF_DELAY, NOTE_VELOCITY, SYSEX_HISTORY, VOLUME_CC, VOLUME_CC_CHANNELS,
};
use crate::error::{EngineError, Result};
use crate::lock;
use crate::midi::backend::{InputListener, MidiBackend, MidiDevice};
use crate::midi::message::{hex_string, MidiMessage};
use crate::midi::output::OutputSlot;
use crate::state::{cc_to_db, TrackId, TransportState};
use crate::transport::{Subscriber, Transport, TransportEvent};
use chrono::{DateTime, Local};
use crossbeam::channel::{after, bounded, select, Sender};
use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// What an inbound message means for the sequencer.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundAction {
    /// Note-On `60 + index` for an existing track position
    Trigger { index: usize, note: u8 },
    NoteOff { note: u8 },
    /// Volume CC on channel `index + 1`
    Volume { index: usize, volume_db: f64 },
    SysEx(Vec<u8>),
    Ignored,
}

/// Map raw inbound bytes onto an action, given how many tracks exist.
pub fn classify(data: &[u8], track_count: usize) -> InboundAction {
    match MidiMessage::parse(data) {
        Some(MidiMessage::NoteOn { note, .. }) => match note.checked_sub(NOTE_BASE) {
            Some(offset) if usize::from(offset) < track_count => InboundAction::Trigger {
                index: usize::from(offset),
                note,
            },
            _ => InboundAction::Ignored,
        },
        Some(MidiMessage::NoteOff { note, .. }) => InboundAction::NoteOff { note },
        Some(MidiMessage::ControlChange {
            channel,
            controller,
            value,
        }) if controller == VOLUME_CC
            && channel < VOLUME_CC_CHANNELS
            && usize::from(channel) < track_count =>
        {
            InboundAction::Volume {
                index: usize::from(channel),
                volume_db: cc_to_db(value),
            }
        }
        Some(MidiMessage::SysEx(bytes)) => InboundAction::SysEx(bytes),
        _ => InboundAction::Ignored,
    }
}

/// A received Sysex message, kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedSysEx {
    pub received_at: DateTime<Local>,
    pub bytes: Vec<u8>,
}

impl CapturedSysEx {
    pub fn hex(&self) -> String {
        hex_string(&self.bytes)
    }
}

/// Which devices the router is attached to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MidiBinding {
    pub selected_output: Option<String>,
    pub input_listeners: BTreeSet<String>,
}

struct PendingNoteOff {
    id: u64,
    track: TrackId,
    note: u8,
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

struct RouterShared {
    backend: Arc<dyn MidiBackend>,
    transport: Arc<Transport>,
    output: OutputSlot,
    listeners: Mutex<BTreeMap<String, Box<dyn InputListener>>>,
    note_offs: Mutex<Vec<PendingNoteOff>>,
    next_note_off: AtomicU64,
    held_notes: Mutex<BTreeSet<u8>>,
    sysex: Mutex<VecDeque<CapturedSysEx>>,
    shut_down: AtomicBool,
}

impl RouterShared {
    fn handle_inbound(&self, bytes: &[u8]) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }

        match classify(bytes, self.transport.track_count()) {
            InboundAction::Trigger { index, note } => {
                lock(&self.held_notes).insert(note);
                match self.transport.trigger_track_at(index) {
                    Ok(id) => debug!("MIDI note {} triggered track {}", note, id),
                    Err(e) => warn!("MIDI note {} rejected: {}", note, e),
                }
            }
            InboundAction::NoteOff { note } => {
                lock(&self.held_notes).remove(&note);
            }
            InboundAction::Volume { index, volume_db } => {
                if let Err(e) = self.transport.set_track_volume_at(index, volume_db) {
                    warn!("MIDI volume for track index {} rejected: {}", index, e);
                }
            }
            InboundAction::SysEx(bytes) => {
                info!("Received Sysex message: {}", hex_string(&bytes));
                let mut history = lock(&self.sysex);
                history.push_front(CapturedSysEx {
                    received_at: Local::now(),
                    bytes,
                });
                history.truncate(SYSEX_HISTORY);
            }
            InboundAction::Ignored => trace!("Ignored MIDI message: {:02X?}", bytes),
        }
    }

    fn send_note_off(&self, note: u8) {
        let bytes = MidiMessage::NoteOff {
            channel: 0,
            note,
            velocity: 0,
        }
        .to_bytes();
        if let Err(e) = self.output.send(&bytes) {
            debug!("Note-Off for note {} not sent: {}", note, e);
        }
    }

    /// Timer path: whoever removes the entry sends its Note-Off.
    fn fire_note_off(&self, id: u64) {
        let fired = {
            let mut pending = lock(&self.note_offs);
            pending
                .iter()
                .position(|p| p.id == id)
                .map(|i| pending.remove(i))
        };
        if let Some(pending) = fired {
            self.send_note_off(pending.note);
        }
    }

    /// Cancel pending Note-Offs (all, or one track's). With `flush` their
    /// Note-Offs go out now to whatever output is still bound.
    fn cancel_note_offs(&self, track: Option<TrackId>, flush: bool) {
        let cancelled: Vec<PendingNoteOff> = {
            let mut pending = lock(&self.note_offs);
            let (matching, rest): (Vec<_>, Vec<_>) = pending
                .drain(..)
                .partition(|p| track.map_or(true, |t| p.track == t));
            *pending = rest;
            matching
        };

        for PendingNoteOff {
            note,
            cancel,
            handle,
            ..
        } in cancelled
        {
            drop(cancel);
            let _ = handle.join();
            if flush {
                self.send_note_off(note);
            }
        }
    }

    fn schedule_note_off(self: &Arc<Self>, track: TrackId, note: u8) {
        let id = self.next_note_off.fetch_add(1, Ordering::SeqCst);
        let (cancel, cancelled) = bounded::<()>(0);
        let weak = Arc::downgrade(self);

        // Hold the list while spawning so the timer always finds its entry.
        let mut pending = lock(&self.note_offs);
        let handle = thread::spawn(move || {
            select! {
                recv(cancelled) -> _ => return,
                recv(after(NOTE_OFF_DELAY)) -> _ => {}
            }
            if let Some(shared) = weak.upgrade() {
                shared.fire_note_off(id);
            }
        });
        pending.push(PendingNoteOff {
            id,
            track,
            note,
            cancel,
            handle,
        });
    }

    fn close_listeners(&self, keep: impl Fn(&str) -> bool) {
        let closing: Vec<(String, Box<dyn InputListener>)> = {
            let mut listeners = lock(&self.listeners);
            let gone: Vec<String> = listeners
                .keys()
                .filter(|id| !keep(id))
                .cloned()
                .collect();
            gone.into_iter()
                .filter_map(|id| listeners.remove(&id).map(|l| (id, l)))
                .collect()
        };
        for (id, listener) in closing {
            listener.close();
            info!("Detached MIDI input listener from {}", id);
        }
    }

    fn release_devices(&self) {
        self.output.replace(None);
        self.cancel_note_offs(None, false);
        self.close_listeners(|_| false);
    }
}

/// Exact id match first, then the first device whose name contains `id`.
pub fn resolve_device<'a>(devices: &'a [MidiDevice], id: &str) -> Option<&'a MidiDevice> {
    devices
        .iter()
        .find(|d| d.id == id)
        .or_else(|| devices.iter().find(|d| d.name.contains(id)))
}

/// MIDI in and out for the sequencer.
///
/// Inbound: notes 60.. trigger tracks by position, CC 7 on channels 1-4 sets
/// track volume, Sysex is captured. Outbound: per-step notes with a delayed
/// Note-Off, Program Change and Sysex.
#[derive(Clone)]
pub struct MidiRouter {
    shared: Arc<RouterShared>,
}

impl MidiRouter {
    pub fn new(backend: Arc<dyn MidiBackend>, transport: Arc<Transport>, output: OutputSlot) -> Self {
        MidiRouter {
            shared: Arc::new(RouterShared {
                backend,
                transport,
                output,
                listeners: Mutex::new(BTreeMap::new()),
                note_offs: Mutex::new(Vec::new()),
                next_note_off: AtomicU64::new(0),
                held_notes: Mutex::new(BTreeSet::new()),
                sysex: Mutex::new(VecDeque::with_capacity(SYSEX_HISTORY)),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn output(&self) -> &OutputSlot {
        &self.shared.output
    }

    pub fn list_outputs(&self) -> Result<Vec<MidiDevice>> {
        self.shared.backend.outputs()
    }

    pub fn list_inputs(&self) -> Result<Vec<MidiDevice>> {
        self.shared.backend.inputs()
    }

    /// Bind an output by id (or partial name), or release it with `None`.
    ///
    /// On failure the current binding is kept. On success any pending
    /// Note-Offs are delivered to the old device before it is released.
    pub fn select_output(&self, id: Option<&str>) -> Result<()> {
        let shared = &self.shared;
        if shared.shut_down.load(Ordering::SeqCst) {
            return Err(EngineError::DeviceUnavailable(
                "MIDI router is shut down".to_string(),
            ));
        }

        let Some(id) = id else {
            shared.cancel_note_offs(None, true);
            shared.output.replace(None);
            return Ok(());
        };

        let devices = shared.backend.outputs()?;
        let device = resolve_device(&devices, id).ok_or_else(|| {
            EngineError::DeviceUnavailable(format!("MIDI output device '{}' not found", id))
        })?;
        let port = shared.backend.open_output(&device.id)?;

        shared.cancel_note_offs(None, true);
        shared.output.replace(Some((device.id.clone(), port)));
        info!("Selected MIDI output: {}", device.name);
        Ok(())
    }

    /// Reconcile with the devices present now.
    ///
    /// Attaches listeners to new inputs, detaches vanished ones and releases
    /// the selected output if it is gone. If MIDI access fails everything is
    /// released and the error returned; the rest of the engine keeps going.
    pub fn refresh_devices(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.shut_down.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (outputs, inputs) = match shared
            .backend
            .outputs()
            .and_then(|outputs| Ok((outputs, shared.backend.inputs()?)))
        {
            Ok(devices) => devices,
            Err(e) => {
                warn!("MIDI unavailable, running without MIDI: {}", e);
                shared.release_devices();
                return Err(e);
            }
        };

        if let Some(selected) = shared.output.device_id() {
            if !outputs.iter().any(|d| d.id == selected) {
                warn!("Selected MIDI output disconnected: {}", selected);
                shared.output.replace(None);
                shared.cancel_note_offs(None, false);
            }
        }

        let present: BTreeSet<String> = inputs.iter().map(|d| d.id.clone()).collect();
        shared.close_listeners(|id| present.contains(id));

        for device in inputs {
            if lock(&shared.listeners).contains_key(&device.id) {
                continue;
            }
            let weak = Arc::downgrade(shared);
            let listener = shared.backend.open_input(
                &device.id,
                Box::new(move |bytes: &[u8]| {
                    if let Some(shared) = weak.upgrade() {
                        shared.handle_inbound(bytes);
                    }
                }),
            );
            match listener {
                Ok(listener) => {
                    info!("Attached MIDI input listener to {}", device.name);
                    lock(&shared.listeners).insert(device.id, listener);
                }
                Err(e) => warn!("Could not listen on {}: {}", device.name, e),
            }
        }

        if outputs.is_empty() && present.is_empty() {
            debug!("No MIDI input or output devices found");
        }
        Ok(())
    }

    pub fn binding(&self) -> MidiBinding {
        MidiBinding {
            selected_output: self.shared.output.device_id(),
            input_listeners: lock(&self.shared.listeners).keys().cloned().collect(),
        }
    }

    /// Process one inbound message as if a device had delivered it.
    pub fn handle_inbound(&self, bytes: &[u8]) {
        self.shared.handle_inbound(bytes);
    }

    /// Send `[0x90, 60 + track, 100]` now and the matching Note-Off 150 ms later.
    pub fn send_note_on(&self, track: TrackId) -> Result<()> {
        let note = track
            .0
            .checked_add(u32::from(NOTE_BASE))
            .and_then(|n| u8::try_from(n).ok())
            .filter(|n| *n <= 127)
            .ok_or_else(|| {
                EngineError::InvalidMessage(format!("track {} has no MIDI note", track))
            })?;

        self.shared.output.send(
            &MidiMessage::NoteOn {
                channel: 0,
                note,
                velocity: NOTE_VELOCITY,
            }
            .to_bytes(),
        )?;
        self.shared.schedule_note_off(track, note);
        Ok(())
    }

    pub fn send_program_change(&self, program: u32) -> Result<()> {
        let message = MidiMessage::program_change(0, program)?;
        self.shared.output.send(&message.to_bytes())?;
        info!("Sent Program Change {} on channel 1", program);
        Ok(())
    }

    pub fn send_sysex(&self, bytes: Vec<u8>) -> Result<()> {
        let message = MidiMessage::sysex(bytes)?;
        let bytes = message.to_bytes();
        self.shared.output.send(&bytes)?;
        info!("Sent Sysex: {}", hex_string(&bytes));
        Ok(())
    }

    pub fn send_sysex_hex(&self, text: &str) -> Result<()> {
        match MidiMessage::sysex_from_hex(text)? {
            MidiMessage::SysEx(bytes) => self.send_sysex(bytes),
            _ => Err(EngineError::InvalidMessage("not a sysex message".to_string())),
        }
    }

    /// Most recent first, at most three.
    pub fn received_sysex(&self) -> Vec<CapturedSysEx> {
        lock(&self.shared.sysex).iter().cloned().collect()
    }

    pub fn held_notes(&self) -> Vec<u8> {
        lock(&self.shared.held_notes).iter().copied().collect()
    }

    pub fn pending_note_offs(&self) -> usize {
        lock(&self.shared.note_offs).len()
    }

    /// Flush Note-Offs, detach every listener and release the output.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        shared.shut_down.store(true, Ordering::SeqCst);
        shared.cancel_note_offs(None, true);
        shared.close_listeners(|_| false);
        shared.output.replace(None);
        info!("MIDI router shut down");
    }
}

impl Subscriber for MidiRouter {
    fn on_transport_event(&self, event: &TransportEvent, _state: &TransportState) {
        if let TransportEvent::TrackRemoved(track) = event {
            self.shared.cancel_note_offs(Some(*track), true);
        }
    }
}
