//! OSC bridge: command table for inbound messages and the WebSocket
//! connection that carries them.
mod address;
mod bridge;

pub use address::{parse_command, played_address, OscCommand};
pub use bridge::{validate_url, ConnectionState, OscBridge, OscConnection, ReceivedOsc};
