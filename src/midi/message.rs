use crate::error::{EngineError, Result};

pub const CLOCK_PULSE: u8 = 0xF8;
pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;

/// Represents a MIDI message that can be sent or received
#[derive(Debug, Clone, PartialEq)]
pub enum MidiMessage {
    /// Note On message with note number and velocity
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Note Off message with note number and velocity
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Control Change message with controller number and value
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    /// Program Change message with program number
    ProgramChange { channel: u8, program: u8 },
    /// System-Exclusive message, framing bytes included
    SysEx(Vec<u8>),
    /// MIDI Clock timing message
    Clock,
    /// MIDI Start message
    Start,
    /// MIDI Stop message
    Stop,
    /// MIDI Continue message
    Continue,
}

impl MidiMessage {
    /// Classify raw bytes. Channels are 0-based.
    ///
    /// A Note On with velocity 0 comes back as a Note Off.
    pub fn parse(data: &[u8]) -> Option<MidiMessage> {
        let status = *data.first()?;

        if status == SYSEX_START {
            return Some(MidiMessage::SysEx(data.to_vec()));
        }

        match status & 0xF0 {
            0x90 if data.len() >= 3 => {
                let (channel, note, velocity) = (status & 0x0F, data[1], data[2]);
                if velocity == 0 {
                    Some(MidiMessage::NoteOff {
                        channel,
                        note,
                        velocity,
                    })
                } else {
                    Some(MidiMessage::NoteOn {
                        channel,
                        note,
                        velocity,
                    })
                }
            }
            0x80 if data.len() >= 3 => Some(MidiMessage::NoteOff {
                channel: status & 0x0F,
                note: data[1],
                velocity: data[2],
            }),
            0xB0 if data.len() >= 3 => Some(MidiMessage::ControlChange {
                channel: status & 0x0F,
                controller: data[1],
                value: data[2],
            }),
            0xC0 if data.len() >= 2 => Some(MidiMessage::ProgramChange {
                channel: status & 0x0F,
                program: data[1],
            }),
            0xF0 => match status {
                CLOCK_PULSE => Some(MidiMessage::Clock),
                0xFA => Some(MidiMessage::Start),
                0xFC => Some(MidiMessage::Stop),
                0xFB => Some(MidiMessage::Continue),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => vec![0x90 | (channel & 0x0F), *note, *velocity],
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => vec![0x80 | (channel & 0x0F), *note, *velocity],
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => vec![0xB0 | (channel & 0x0F), *controller, *value],
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), *program]
            }
            MidiMessage::SysEx(bytes) => bytes.clone(),
            MidiMessage::Clock => vec![CLOCK_PULSE],
            MidiMessage::Start => vec![0xFA],
            MidiMessage::Stop => vec![0xFC],
            MidiMessage::Continue => vec![0xFB],
        }
    }

    pub fn program_change(channel: u8, program: u32) -> Result<MidiMessage> {
        match u8::try_from(program) {
            Ok(program) if program <= 127 => Ok(MidiMessage::ProgramChange { channel, program }),
            _ => Err(EngineError::InvalidMessage(format!(
                "program change value {} is outside 0-127",
                program
            ))),
        }
    }

    /// Build a Sysex message, checking the `F0 ... F7` framing.
    pub fn sysex(bytes: Vec<u8>) -> Result<MidiMessage> {
        match (bytes.first(), bytes.last()) {
            (Some(&SYSEX_START), Some(&SYSEX_END)) if bytes.len() >= 2 => {
                Ok(MidiMessage::SysEx(bytes))
            }
            _ => Err(EngineError::InvalidMessage(
                "sysex must start with F0 and end with F7".to_string(),
            )),
        }
    }

    /// Parse whitespace separated hex bytes, e.g. `"F0 41 10 00 00 7F F7"`.
    pub fn sysex_from_hex(text: &str) -> Result<MidiMessage> {
        let bytes = text
            .split_whitespace()
            .map(|token| {
                u8::from_str_radix(token, 16).map_err(|_| {
                    EngineError::InvalidMessage(format!("invalid sysex byte '{}'", token))
                })
            })
            .collect::<Result<Vec<u8>>>()?;
        Self::sysex(bytes)
    }
}

/// Uppercase hex rendering used when logging or displaying Sysex data.
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channel_messages() {
        assert_eq!(
            MidiMessage::parse(&[0x90, 60, 100]),
            Some(MidiMessage::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100
            })
        );
        assert_eq!(
            MidiMessage::parse(&[0xB3, 7, 64]),
            Some(MidiMessage::ControlChange {
                channel: 3,
                controller: 7,
                value: 64
            })
        );
        assert_eq!(
            MidiMessage::parse(&[0x81, 62, 0]),
            Some(MidiMessage::NoteOff {
                channel: 1,
                note: 62,
                velocity: 0
            })
        );
    }

    #[test]
    fn test_note_on_velocity_zero_is_note_off() {
        assert_eq!(
            MidiMessage::parse(&[0x90, 60, 0]),
            Some(MidiMessage::NoteOff {
                channel: 0,
                note: 60,
                velocity: 0
            })
        );
    }

    #[test]
    fn test_parse_system_messages() {
        assert_eq!(MidiMessage::parse(&[0xF8]), Some(MidiMessage::Clock));
        assert_eq!(MidiMessage::parse(&[0xFA]), Some(MidiMessage::Start));
        assert_eq!(MidiMessage::parse(&[0xFC]), Some(MidiMessage::Stop));
        assert_eq!(MidiMessage::parse(&[0xFB]), Some(MidiMessage::Continue));
        assert_eq!(
            MidiMessage::parse(&[0xF0, 0x7E, 0xF7]),
            Some(MidiMessage::SysEx(vec![0xF0, 0x7E, 0xF7]))
        );
    }

    #[test]
    fn test_parse_truncated_or_empty() {
        assert_eq!(MidiMessage::parse(&[]), None);
        assert_eq!(MidiMessage::parse(&[0x90, 60]), None);
        assert_eq!(MidiMessage::parse(&[0xC0]), None);
    }

    #[test]
    fn test_program_change_validation() {
        assert_eq!(
            MidiMessage::program_change(0, 5).unwrap().to_bytes(),
            vec![0xC0, 5]
        );
        assert!(MidiMessage::program_change(0, 127).is_ok());
        assert!(matches!(
            MidiMessage::program_change(0, 128),
            Err(EngineError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_sysex_framing() {
        let ok = MidiMessage::sysex_from_hex("F0 41 10 00 00 7F F7").unwrap();
        assert_eq!(
            ok.to_bytes(),
            vec![0xF0, 0x41, 0x10, 0x00, 0x00, 0x7F, 0xF7]
        );

        assert!(matches!(
            MidiMessage::sysex_from_hex("41 10 F7"),
            Err(EngineError::InvalidMessage(_))
        ));
        assert!(MidiMessage::sysex_from_hex("F0 41 10").is_err());
        assert!(MidiMessage::sysex_from_hex("F0 100 F7").is_err());
        assert!(MidiMessage::sysex_from_hex("").is_err());
        assert!(MidiMessage::sysex(vec![0xF0]).is_err());
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0xF0, 0x0A, 0xF7]), "F0 0A F7");
    }
}
