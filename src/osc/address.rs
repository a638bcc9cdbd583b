use crate::error::{EngineError, Result};
use crate::state::{normalized_to_db, TrackId};
use rosc::{OscMessage, OscType};

pub const PLAY: &str = "/sequencer/play";
pub const STOP: &str = "/sequencer/stop";
pub const BPM: &str = "/sequencer/bpm";
pub const IS_PLAYING: &str = "/sequencer/isPlaying";

/// Inbound commands, in the order addresses are matched.
#[derive(Debug, Clone, PartialEq)]
pub enum OscCommand {
    Trigger { index: usize },
    Volume { index: usize, volume_db: f64 },
    Play,
    Stop,
    Bpm(f64),
}

pub fn played_address(track: TrackId) -> String {
    format!("/sequencer/track/{}/played", track)
}

/// `/track/{n}/{action}` split into its index and action.
fn track_path(addr: &str) -> Option<(usize, &str)> {
    let rest = addr.strip_prefix("/track/")?;
    let (index, action) = rest.split_once('/')?;
    let index = index.parse().ok()?;
    Some((index, action))
}

fn number(arg: &OscType) -> Option<f64> {
    match arg {
        OscType::Float(v) => Some(f64::from(*v)),
        OscType::Double(v) => Some(*v),
        OscType::Int(v) => Some(f64::from(*v)),
        OscType::Long(v) => Some(*v as f64),
        _ => None,
    }
}

fn single_number(msg: &OscMessage) -> Result<f64> {
    match msg.args.as_slice() {
        [arg] => number(arg).ok_or_else(|| {
            EngineError::InvalidMessage(format!("{} expects a number, got {:?}", msg.addr, arg))
        }),
        args => Err(EngineError::InvalidMessage(format!(
            "{} expects one argument, got {}",
            msg.addr,
            args.len()
        ))),
    }
}

/// Match an inbound message against the command table.
pub fn parse_command(msg: &OscMessage) -> Result<OscCommand> {
    if let Some((index, action)) = track_path(&msg.addr) {
        match action {
            "trigger" => return Ok(OscCommand::Trigger { index }),
            "volume" => {
                let value = single_number(msg)?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(EngineError::out_of_range("osc volume", value, "0.0..=1.0"));
                }
                return Ok(OscCommand::Volume {
                    index,
                    volume_db: normalized_to_db(value),
                });
            }
            _ => {}
        }
    }

    match msg.addr.as_str() {
        PLAY => Ok(OscCommand::Play),
        STOP => Ok(OscCommand::Stop),
        BPM => {
            let bpm = single_number(msg)?;
            if bpm > 0.0 {
                Ok(OscCommand::Bpm(bpm))
            } else {
                Err(EngineError::out_of_range("osc bpm", bpm, "greater than 0"))
            }
        }
        _ => Err(EngineError::InvalidMessage(format!(
            "unknown OSC address {}",
            msg.addr
        ))),
    }
}
