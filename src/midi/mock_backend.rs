use crate::error::{EngineError, Result};
use crate::lock;
use crate::midi::backend::{InputCallback, InputListener, MidiBackend, MidiDevice, OutputPort};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory MIDI devices for tests and for running without hardware.
///
/// Outputs record every message sent to them; inputs are driven with
/// [`MockBackend::inject`]. Devices can be added and removed at any time to
/// simulate hot-plugging.
#[derive(Clone, Default)]
pub struct MockBackend {
    shared: Arc<MockShared>,
}

#[derive(Default)]
struct MockShared {
    outputs: Mutex<Vec<String>>,
    inputs: Mutex<Vec<String>>,
    sent: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    listeners: Mutex<HashMap<String, Arc<Mutex<InputCallback>>>>,
    unavailable: AtomicBool,
}

fn device(name: &str) -> MidiDevice {
    MidiDevice {
        id: name.to_string(),
        name: name.to_string(),
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(outputs: &[&str], inputs: &[&str]) -> Self {
        let backend = Self::new();
        for name in outputs {
            backend.add_output(name);
        }
        for name in inputs {
            backend.add_input(name);
        }
        backend
    }

    pub fn add_output(&self, name: &str) {
        lock(&self.shared.outputs).push(name.to_string());
    }

    pub fn remove_output(&self, name: &str) {
        lock(&self.shared.outputs).retain(|n| n != name);
    }

    pub fn add_input(&self, name: &str) {
        lock(&self.shared.inputs).push(name.to_string());
    }

    /// Unplug an input. Its listener stops receiving but stays registered
    /// until the owner closes it.
    pub fn remove_input(&self, name: &str) {
        lock(&self.shared.inputs).retain(|n| n != name);
    }

    /// Simulate MIDI access being denied.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Everything sent to an output, oldest first.
    pub fn sent(&self, output: &str) -> Vec<Vec<u8>> {
        lock(&self.shared.sent)
            .get(output)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear_sent(&self, output: &str) {
        lock(&self.shared.sent).remove(output);
    }

    pub fn is_listening(&self, input: &str) -> bool {
        lock(&self.shared.listeners).contains_key(input)
    }

    /// Deliver bytes to whoever listens on `input`. Returns false if nobody does.
    pub fn inject(&self, input: &str, bytes: &[u8]) -> bool {
        if !lock(&self.shared.inputs).iter().any(|n| n == input) {
            return false;
        }
        let callback = lock(&self.shared.listeners).get(input).cloned();
        match callback {
            Some(callback) => {
                let mut callback = lock(&callback);
                (*callback)(bytes);
                true
            }
            None => false,
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            Err(EngineError::DeviceUnavailable(
                "MIDI access denied".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

struct MockOutput {
    id: String,
    shared: Arc<MockShared>,
}

impl OutputPort for MockOutput {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if !lock(&self.shared.outputs).iter().any(|n| n == &self.id) {
            return Err(EngineError::DeviceUnavailable(format!(
                "MIDI output device '{}' disconnected",
                self.id
            )));
        }
        lock(&self.shared.sent)
            .entry(self.id.clone())
            .or_default()
            .push(bytes.to_vec());
        Ok(())
    }
}

struct MockListener {
    id: String,
    shared: Arc<MockShared>,
}

impl InputListener for MockListener {
    fn close(self: Box<Self>) {
        lock(&self.shared.listeners).remove(&self.id);
    }
}

impl MidiBackend for MockBackend {
    fn outputs(&self) -> Result<Vec<MidiDevice>> {
        self.check_available()?;
        Ok(lock(&self.shared.outputs).iter().map(|n| device(n)).collect())
    }

    fn inputs(&self) -> Result<Vec<MidiDevice>> {
        self.check_available()?;
        Ok(lock(&self.shared.inputs).iter().map(|n| device(n)).collect())
    }

    fn open_output(&self, id: &str) -> Result<Box<dyn OutputPort>> {
        self.check_available()?;
        if !lock(&self.shared.outputs).iter().any(|n| n == id) {
            return Err(EngineError::DeviceUnavailable(format!(
                "MIDI output device '{}' not found",
                id
            )));
        }
        Ok(Box::new(MockOutput {
            id: id.to_string(),
            shared: Arc::clone(&self.shared),
        }))
    }

    fn open_input(&self, id: &str, callback: InputCallback) -> Result<Box<dyn InputListener>> {
        self.check_available()?;
        if !lock(&self.shared.inputs).iter().any(|n| n == id) {
            return Err(EngineError::DeviceUnavailable(format!(
                "MIDI input device '{}' not found",
                id
            )));
        }
        lock(&self.shared.listeners).insert(id.to_string(), Arc::new(Mutex::new(callback)));
        Ok(Box::new(MockListener {
            id: id.to_string(),
            shared: Arc::clone(&self.shared),
        }))
    }
}
