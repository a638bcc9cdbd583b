use crate::clock::ClockEmitter;
use crate::config::Settings;
use crate::error::Result;
use crate::lock;
use crate::midi::{MidiBackend, MidiBinding, MidiRouter, OutputSlot};
use crate::osc::{OscBridge, OscConnection};
use crate::step_router::{StepDelivery, StepEvent, StepEventRouter};
use crate::sync::{PeerSession, TempoSync, TempoSyncStatus};
use crate::transport::{Transport, TransportSnapshot};
use crossbeam::channel::{bounded, select, tick, Sender};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Everything a status display needs, captured at one moment.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub snapshot: TransportSnapshot,
    pub clock_running: bool,
    pub midi: MidiBinding,
    pub osc: OscConnection,
    pub sync: TempoSyncStatus,
}

/// Polls for MIDI hot-plug changes until stopped.
struct DeviceMonitor {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

impl DeviceMonitor {
    fn start(midi: MidiRouter, interval: Duration) -> Self {
        let (cancel, cancelled) = bounded::<()>(0);
        let handle = thread::spawn(move || {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(cancelled) -> _ => break,
                    recv(ticker) -> _ => {
                        if let Err(e) = midi.refresh_devices() {
                            debug!("Device refresh failed: {}", e);
                        }
                    }
                }
            }
        });
        DeviceMonitor { cancel, handle }
    }

    fn stop(self) {
        drop(self.cancel);
        let _ = self.handle.join();
    }
}

/// The transport synchronisation engine.
///
/// Owns the transport and every component that observes or drives it, and
/// wires them together. Dropping the engine shuts it down.
pub struct Engine {
    transport: Arc<Transport>,
    clock: ClockEmitter,
    midi: MidiRouter,
    osc: OscBridge,
    sync: TempoSync,
    steps: StepEventRouter,
    monitor: Mutex<Option<DeviceMonitor>>,
    shut_down: AtomicBool,
}

impl Engine {
    /// Build an engine from `settings`.
    ///
    /// MIDI, OSC and peer-sync problems are logged and leave that surface
    /// inactive; only invalid transport settings fail construction.
    pub fn new(
        settings: &Settings,
        backend: Arc<dyn MidiBackend>,
        session: Arc<dyn PeerSession>,
    ) -> Result<Self> {
        let transport = Arc::new(Transport::new());
        transport.set_step_count(settings.step_count.len() as u32)?;
        transport.set_bpm(settings.bpm)?;
        for _ in 0..settings.track_count {
            transport.add_track();
        }

        let output = OutputSlot::new();
        let clock = ClockEmitter::new(output.clone(), transport.state());
        let midi = MidiRouter::new(backend, Arc::clone(&transport), output);
        let osc = OscBridge::new(Arc::clone(&transport));
        let sync = TempoSync::new(session, Arc::clone(&transport));
        let steps = StepEventRouter::new(Arc::clone(&transport), midi.clone(), osc.clone());

        transport.subscribe(Arc::new(clock.clone()));
        transport.subscribe(Arc::new(midi.clone()));
        transport.subscribe(Arc::new(osc.clone()));
        transport.subscribe(Arc::new(sync.clone()));

        let engine = Engine {
            transport,
            clock,
            midi,
            osc,
            sync,
            steps,
            monitor: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        };

        if engine.midi.refresh_devices().is_err() {
            warn!("Starting without MIDI");
        }
        if let Some(device) = &settings.midi_output {
            if let Err(e) = engine.midi.select_output(Some(device)) {
                warn!("Could not select MIDI output {}: {}", device, e);
            }
        }
        if let Some(url) = &settings.osc_url {
            if let Err(e) = engine.osc.connect(url) {
                warn!("Could not connect OSC bridge: {}", e);
            }
        }
        if settings.peer_sync {
            if let Err(e) = engine.sync.enable(true) {
                warn!("Could not enable tempo sync: {}", e);
            }
        }

        info!(
            "Engine ready: {} tracks, {} steps, {} BPM",
            settings.track_count, settings.step_count, settings.bpm
        );
        Ok(engine)
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn clock(&self) -> &ClockEmitter {
        &self.clock
    }

    pub fn midi(&self) -> &MidiRouter {
        &self.midi
    }

    pub fn osc(&self) -> &OscBridge {
        &self.osc
    }

    pub fn sync(&self) -> &TempoSync {
        &self.sync
    }

    pub fn step_fired(&self, event: &StepEvent) -> Result<StepDelivery> {
        self.steps.step_fired(event)
    }

    /// Poll for MIDI device changes every `interval`. Replaces a running monitor.
    pub fn start_device_monitor(&self, interval: Duration) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let previous = lock(&self.monitor).replace(DeviceMonitor::start(self.midi.clone(), interval));
        if let Some(previous) = previous {
            previous.stop();
        }
        debug!("Device monitor polling every {:?}", interval);
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            snapshot: self.transport.snapshot(),
            clock_running: self.clock.is_running(),
            midi: self.midi.binding(),
            osc: self.osc.connection(),
            sync: self.sync.status(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop the clock, flush pending Note-Offs, detach MIDI listeners, release
    /// the output, close the bridge and leave the peer session. Returns once
    /// every thread the engine started has exited.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down engine");

        let monitor = lock(&self.monitor).take();
        if let Some(monitor) = monitor {
            monitor.stop();
        }
        self.clock.shutdown();
        self.midi.shutdown();
        self.osc.shutdown();
        self.sync.shutdown();
        self.transport.clear_subscribers();
        info!("Engine shut down");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
