pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_loop;
pub mod logging;
pub mod midi;
pub mod osc;
pub mod state;
pub mod step_router;
pub mod sync;
pub mod transport;
pub mod ui;

pub use cli::Args;
pub use engine::{Engine, EngineStatus};
pub use error::{EngineError, Result};
pub use event_loop::{EngineMessage, EventLoop};
pub use state::{StepCount, TrackId, TrackState, TransportState};
pub use step_router::{StepDelivery, StepEvent};
pub use transport::{Subscriber, Transport, TransportEvent, TransportSnapshot};

use midi::{MidiBackend, MidiDevice};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// MIDI devices currently visible to a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceList {
    pub inputs: Vec<MidiDevice>,
    pub outputs: Vec<MidiDevice>,
}

pub fn handle_device_list(backend: &dyn MidiBackend) -> Result<DeviceList> {
    Ok(DeviceList {
        inputs: backend.inputs()?,
        outputs: backend.outputs()?,
    })
}
