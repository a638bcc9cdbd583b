use crate::error::Result;

/// A MIDI port as the backend reports it. `id` is what selection uses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MidiDevice {
    pub id: String,
    pub name: String,
}

/// Invoked on the backend's thread for every inbound message, in arrival order.
pub type InputCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// An open output connection.
pub trait OutputPort: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

/// An open input subscription. Dropping without `close` also detaches.
pub trait InputListener: Send {
    fn close(self: Box<Self>);
}

/// Access to the system's MIDI devices.
pub trait MidiBackend: Send + Sync {
    fn outputs(&self) -> Result<Vec<MidiDevice>>;

    fn inputs(&self) -> Result<Vec<MidiDevice>>;

    fn open_output(&self, id: &str) -> Result<Box<dyn OutputPort>>;

    fn open_input(&self, id: &str, callback: InputCallback) -> Result<Box<dyn InputListener>>;
}
