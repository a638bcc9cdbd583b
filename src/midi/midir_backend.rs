use crate::error::{EngineError, Result};
use crate::midi::backend::{InputCallback, InputListener, MidiBackend, MidiDevice, OutputPort};
use log::{debug, info};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

fn unavailable(e: impl ToString) -> EngineError {
    EngineError::DeviceUnavailable(e.to_string())
}

/// Exact name match first, then the first port whose name contains `id`.
fn find_port<P: Clone>(ports: &[P], names: &[String], id: &str) -> Option<P> {
    names
        .iter()
        .position(|name| name == id)
        .or_else(|| names.iter().position(|name| name.contains(id)))
        .map(|index| ports[index].clone())
}

/// System MIDI through `midir`. Devices are identified by port name.
pub struct MidirBackend {
    client_name: String,
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MidirBackend {
    pub fn new() -> Self {
        MidirBackend {
            client_name: "stepsync".to_string(),
        }
    }

    fn midi_in(&self) -> Result<MidiInput> {
        let mut midi_in = MidiInput::new(&format!("{}-in", self.client_name)).map_err(unavailable)?;
        midi_in.ignore(Ignore::None);
        Ok(midi_in)
    }

    fn midi_out(&self) -> Result<MidiOutput> {
        MidiOutput::new(&format!("{}-out", self.client_name)).map_err(unavailable)
    }
}

struct MidirOutput {
    connection: MidiOutputConnection,
}

impl OutputPort for MidirOutput {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.connection.send(bytes).map_err(unavailable)
    }
}

struct MidirInputListener {
    connection: MidiInputConnection<()>,
}

impl InputListener for MidirInputListener {
    fn close(self: Box<Self>) {
        let _ = self.connection.close();
    }
}

impl MidiBackend for MidirBackend {
    fn outputs(&self) -> Result<Vec<MidiDevice>> {
        let midi_out = self.midi_out()?;
        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|p| midi_out.port_name(p).ok())
            .map(|name| MidiDevice {
                id: name.clone(),
                name,
            })
            .collect())
    }

    fn inputs(&self) -> Result<Vec<MidiDevice>> {
        let midi_in = self.midi_in()?;
        Ok(midi_in
            .ports()
            .iter()
            .filter_map(|p| midi_in.port_name(p).ok())
            .map(|name| MidiDevice {
                id: name.clone(),
                name,
            })
            .collect())
    }

    fn open_output(&self, id: &str) -> Result<Box<dyn OutputPort>> {
        let midi_out = self.midi_out()?;
        let ports = midi_out.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_out.port_name(p).unwrap_or_default())
            .collect();
        debug!("Available MIDI output ports: {:?}", names);

        let port = find_port(&ports, &names, id)
            .ok_or_else(|| unavailable(format!("MIDI output device '{}' not found", id)))?;

        let connection = midi_out
            .connect(&port, "stepsync-output")
            .map_err(unavailable)?;
        info!("Connected to MIDI output port: {}", id);
        Ok(Box::new(MidirOutput { connection }))
    }

    fn open_input(&self, id: &str, callback: InputCallback) -> Result<Box<dyn InputListener>> {
        let midi_in = self.midi_in()?;
        let ports = midi_in.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_in.port_name(p).unwrap_or_default())
            .collect();

        let port = find_port(&ports, &names, id)
            .ok_or_else(|| unavailable(format!("MIDI input device '{}' not found", id)))?;

        let mut callback = callback;
        let connection = midi_in
            .connect(
                &port,
                "stepsync-input",
                move |_stamp, message, _| callback(message),
                (),
            )
            .map_err(unavailable)?;
        info!("Listening for MIDI input on: {}", id);
        Ok(Box::new(MidirInputListener { connection }))
    }
}
