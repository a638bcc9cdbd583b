use crate::error::{EngineError, Result};
use crate::lock;
use crate::midi::backend::OutputPort;
use log::info;
use std::sync::{Arc, Mutex};

/// Called with `true` when an output is bound and `false` when it is released.
pub type OutputWatcher = Arc<dyn Fn(bool) + Send + Sync>;

struct Bound {
    id: String,
    port: Box<dyn OutputPort>,
}

#[derive(Default)]
struct SlotShared {
    bound: Mutex<Option<Bound>>,
    watchers: Mutex<Vec<OutputWatcher>>,
}

/// The currently selected MIDI output, shared by everything that sends.
#[derive(Clone, Default)]
pub struct OutputSlot {
    shared: Arc<SlotShared>,
}

impl OutputSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `port` (or release with `None`) and return the previous device id.
    /// Watchers run after the swap, outside the slot's lock.
    pub fn replace(&self, output: Option<(String, Box<dyn OutputPort>)>) -> Option<String> {
        let bound = output.is_some();
        let previous = {
            let mut slot = lock(&self.shared.bound);
            let previous = slot.take().map(|b| b.id);
            *slot = output.map(|(id, port)| Bound { id, port });
            previous
        };

        match (&previous, bound) {
            (Some(id), false) => info!("Released MIDI output {}", id),
            (None, false) => return None,
            _ => {}
        }

        let watchers = lock(&self.shared.watchers).clone();
        for watcher in watchers {
            watcher(bound);
        }
        previous
    }

    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        match lock(&self.shared.bound).as_mut() {
            Some(bound) => bound.port.send(bytes),
            None => Err(EngineError::DeviceUnavailable(
                "no MIDI output selected".to_string(),
            )),
        }
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.shared.bound).is_some()
    }

    pub fn device_id(&self) -> Option<String> {
        lock(&self.shared.bound).as_ref().map(|b| b.id.clone())
    }

    pub fn watch(&self, watcher: OutputWatcher) {
        lock(&self.shared.watchers).push(watcher);
    }
}
