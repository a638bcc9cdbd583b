use crate::event_loop::EngineMessage;
use crate::state::TrackId;
use crate::step_router::StepEvent;
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// List available MIDI devices
    #[arg(long)]
    pub device_list: bool,

    /// MIDI output device to send clock and notes to
    #[arg(long)]
    pub midi_output: Option<String>,

    /// Pick the MIDI output interactively
    #[arg(long, conflicts_with = "midi_output")]
    pub select_output: bool,

    /// WebSocket URL of the OSC bridge
    #[arg(long)]
    pub osc_url: Option<String>,

    /// Initial tempo
    #[arg(long)]
    pub bpm: Option<f64>,

    /// Steps per track (8, 16, 32 or 64)
    #[arg(long)]
    pub steps: Option<u32>,

    /// Number of tracks to create
    #[arg(long)]
    pub tracks: Option<usize>,

    /// Join the peer tempo session at startup
    #[arg(long)]
    pub peer_sync: bool,

    /// Configuration file (format taken from the extension)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log to stderr instead of the log file
    #[arg(long)]
    pub log_stderr: bool,
}

pub const HELP: &str = "\
Commands:
  play | stop                 start or stop the transport
  bpm <value>                 set the tempo
  steps <8|16|32|64>          set the step count
  toggle <track> <step>       flip a step
  volume <track> <dB>         set a track's volume
  trigger <track>             trigger a track
  fire <track> <step> [name]  report a fired step
  add | remove <track>        add or remove a track
  output <name>|none          select or release the MIDI output
  refresh                     rescan MIDI devices
  osc <url>|off               connect or disconnect the OSC bridge
  sync on|off                 join or leave the peer tempo session
  pc <program>                send a Program Change
  sysex <hex bytes>           send a Sysex message
  status                      print every track
  quit                        shut down";

fn arg<T: FromStr>(words: &[&str], index: usize, what: &str) -> Result<T, String> {
    let word = words
        .get(index)
        .ok_or_else(|| format!("missing {}", what))?;
    word.parse()
        .map_err(|_| format!("'{}' is not a valid {}", word, what))
}

fn track(words: &[&str], index: usize) -> Result<TrackId, String> {
    arg(words, index, "track id").map(TrackId)
}

/// Parse one line of user input into an intent.
pub fn parse_intent(line: &str) -> Result<EngineMessage, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some(command) = words.first() else {
        return Err("empty command".to_string());
    };

    let message = match command.to_ascii_lowercase().as_str() {
        "play" => EngineMessage::Play,
        "stop" => EngineMessage::Stop,
        "bpm" => EngineMessage::SetBpm(arg(&words, 1, "tempo")?),
        "steps" => EngineMessage::SetStepCount(arg(&words, 1, "step count")?),
        "toggle" => EngineMessage::ToggleStep {
            track: track(&words, 1)?,
            step: arg(&words, 2, "step")?,
        },
        "volume" => EngineMessage::SetVolume {
            track: track(&words, 1)?,
            volume_db: arg(&words, 2, "volume")?,
        },
        "trigger" => EngineMessage::TriggerTrack(track(&words, 1)?),
        "fire" => {
            let mut event = StepEvent::new(track(&words, 1)?, arg(&words, 2, "step")?);
            if words.len() > 3 {
                event = event.with_sample(words[3..].join(" "));
            }
            EngineMessage::StepFired(event)
        }
        "add" => EngineMessage::AddTrack,
        "remove" => EngineMessage::RemoveTrack(track(&words, 1)?),
        "output" => match words.get(1..).map(|rest| rest.join(" ")) {
            Some(name) if name == "none" => EngineMessage::SelectOutput(None),
            Some(name) if !name.is_empty() => EngineMessage::SelectOutput(Some(name)),
            _ => return Err("missing device name".to_string()),
        },
        "refresh" => EngineMessage::RefreshDevices,
        "osc" => match words.get(1) {
            Some(&"off") => EngineMessage::DisconnectOsc,
            Some(url) => EngineMessage::ConnectOsc(url.to_string()),
            None => return Err("missing bridge URL".to_string()),
        },
        "sync" => match words.get(1) {
            Some(&"on") => EngineMessage::EnableSync(true),
            Some(&"off") => EngineMessage::EnableSync(false),
            _ => return Err("expected 'sync on' or 'sync off'".to_string()),
        },
        "pc" => EngineMessage::ProgramChange(arg(&words, 1, "program")?),
        "sysex" if words.len() > 1 => EngineMessage::SendSysEx(words[1..].join(" ")),
        "sysex" => return Err("missing sysex bytes".to_string()),
        "quit" | "exit" => EngineMessage::Shutdown,
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transport_intents() {
        assert_eq!(parse_intent("play"), Ok(EngineMessage::Play));
        assert_eq!(parse_intent("  STOP "), Ok(EngineMessage::Stop));
        assert_eq!(parse_intent("bpm 128.5"), Ok(EngineMessage::SetBpm(128.5)));
        assert_eq!(parse_intent("steps 32"), Ok(EngineMessage::SetStepCount(32)));
    }

    #[test]
    fn test_parse_track_intents() {
        assert_eq!(
            parse_intent("toggle 1 3"),
            Ok(EngineMessage::ToggleStep {
                track: TrackId(1),
                step: 3
            })
        );
        assert_eq!(
            parse_intent("volume 0 -12"),
            Ok(EngineMessage::SetVolume {
                track: TrackId(0),
                volume_db: -12.0
            })
        );
        assert_eq!(
            parse_intent("fire 2 5 Kick 01"),
            Ok(EngineMessage::StepFired(
                StepEvent::new(TrackId(2), 5).with_sample("Kick 01")
            ))
        );
    }

    #[test]
    fn test_parse_device_intents() {
        assert_eq!(
            parse_intent("output IAC Driver Bus 1"),
            Ok(EngineMessage::SelectOutput(Some(
                "IAC Driver Bus 1".to_string()
            )))
        );
        assert_eq!(
            parse_intent("output none"),
            Ok(EngineMessage::SelectOutput(None))
        );
        assert_eq!(
            parse_intent("sysex F0 41 10 F7"),
            Ok(EngineMessage::SendSysEx("F0 41 10 F7".to_string()))
        );
        assert_eq!(parse_intent("osc off"), Ok(EngineMessage::DisconnectOsc));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_intent("").is_err());
        assert!(parse_intent("bpm fast").is_err());
        assert!(parse_intent("toggle 1").is_err());
        assert!(parse_intent("output").is_err());
        assert!(parse_intent("sync maybe").is_err());
        assert!(parse_intent("dance").is_err());
    }
}
