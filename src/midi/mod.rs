//! MIDI functionality for StepSync
//!
//! This module provides MIDI communication, including:
//! - Wire-level message parsing and encoding
//! - Device access through a swappable backend (midir or in-memory mock)
//! - The shared output slot used by the clock and the router
//! - Inbound routing to the transport and outbound note/program/sysex sending
//!
//! The main components are:
//! - [`MidiBackend`] trait for enumerating and opening devices
//! - [`MidirBackend`] for real MIDI devices
//! - [`MockBackend`] for testing
//! - [`MidiRouter`] for everything the sequencer sends and receives
//!
mod backend;
mod message;
mod midir_backend;
mod mock_backend;
mod output;
mod router;

pub use backend::{InputCallback, InputListener, MidiBackend, MidiDevice, OutputPort};
pub use message::{hex_string, MidiMessage, CLOCK_PULSE, SYSEX_END, SYSEX_START};
pub use midir_backend::MidirBackend;
pub use mock_backend::MockBackend;
pub use output::{OutputSlot, OutputWatcher};
pub use router::{classify, resolve_device, CapturedSysEx, InboundAction, MidiBinding, MidiRouter};
