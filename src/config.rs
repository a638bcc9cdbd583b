// config.rs

use crate::cli::Args;
use crate::state::{validate_bpm, StepCount};
use log::{debug, info, LevelFilter};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const TICKS_PER_BEAT: u32 = 24;

pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 330.0;
pub const DEFAULT_BPM: f64 = 120.0;

pub const MIN_VOLUME_DB: f64 = -30.0;
pub const MAX_VOLUME_DB: f64 = 0.0;
pub const DEFAULT_VOLUME_DB: f64 = -6.0;

/// Note number of track 0, both for inbound triggers and outbound notes
pub const NOTE_BASE: u8 = 60;
pub const NOTE_VELOCITY: u8 = 100;
pub const NOTE_OFF_DELAY: Duration = Duration::from_millis(150);
pub const VOLUME_CC: u8 = 7;
/// Highest MIDI channel (1-based) whose volume CC maps to a track
pub const VOLUME_CC_CHANNELS: u8 = 4;

/// Tempo differences at or below this are treated as the same tempo
pub const TEMPO_EPSILON: f64 = 0.1;

pub const SYSEX_HISTORY: usize = 3;
pub const OSC_HISTORY: usize = 5;

pub const DEFAULT_TRACK_COUNT: usize = 4;
pub const MAX_TRACK_COUNT: usize = 64;
pub const DEFAULT_DEVICE_POLL: Duration = Duration::from_millis(2000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Engine settings, merged from defaults, an optional config file,
/// `STEPSYNC_*` environment variables and the command line (last wins).
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bpm: f64,
    pub step_count: StepCount,
    pub track_count: usize,
    pub midi_output: Option<String>,
    pub osc_url: Option<String>,
    pub peer_sync: bool,
    pub device_poll: Duration,
    pub log_level: LevelFilter,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bpm: DEFAULT_BPM,
            step_count: StepCount::default(),
            track_count: DEFAULT_TRACK_COUNT,
            midi_output: None,
            osc_url: None,
            peer_sync: false,
            device_poll: DEFAULT_DEVICE_POLL,
            log_level: LevelFilter::Debug,
        }
    }
}

impl Settings {
    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Ok(config::Config::builder()
            .set_default("bpm", DEFAULT_BPM)?
            .set_default("step_count", StepCount::default().len() as i64)?
            .set_default("track_count", DEFAULT_TRACK_COUNT as i64)?
            .set_default("peer_sync", false)?
            .set_default("device_poll_ms", DEFAULT_DEVICE_POLL.as_millis() as i64)?
            .set_default("log_level", "debug")?)
    }

    /// Load settings for the given command line.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut builder = Self::builder()?;

        if let Some(path) = &args.config {
            info!("Loading configuration file {}", path.display());
            builder = builder.add_source(config::File::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("STEPSYNC"));

        if let Some(bpm) = args.bpm {
            builder = builder.set_override("bpm", bpm)?;
        }
        if let Some(steps) = args.steps {
            builder = builder.set_override("step_count", i64::from(steps))?;
        }
        if let Some(tracks) = args.tracks {
            builder = builder.set_override("track_count", tracks as i64)?;
        }
        if let Some(device) = &args.midi_output {
            builder = builder.set_override("midi_output", device.as_str())?;
        }
        if let Some(url) = &args.osc_url {
            builder = builder.set_override("osc_url", url.as_str())?;
        }
        if args.peer_sync {
            builder = builder.set_override("peer_sync", true)?;
        }

        Self::from_config(&builder.build()?)
    }

    /// Validate an already-built configuration.
    pub fn from_config(cfg: &config::Config) -> Result<Self, ConfigError> {
        let bpm = cfg.get_float("bpm")?;
        validate_bpm(bpm).map_err(|e| ConfigError::Invalid {
            key: "bpm",
            reason: e.to_string(),
        })?;
        debug!("Configured BPM: {}", bpm);

        let steps = cfg.get_int("step_count")?;
        let step_count = u32::try_from(steps)
            .map_err(|_| ConfigError::Invalid {
                key: "step_count",
                reason: format!("{} is not a step count", steps),
            })
            .and_then(|n| {
                StepCount::try_from(n).map_err(|e| ConfigError::Invalid {
                    key: "step_count",
                    reason: e.to_string(),
                })
            })?;

        let tracks = cfg.get_int("track_count")?;
        if tracks < 1 || tracks > MAX_TRACK_COUNT as i64 {
            return Err(ConfigError::Invalid {
                key: "track_count",
                reason: format!("{} is outside 1..={}", tracks, MAX_TRACK_COUNT),
            });
        }

        let poll_ms = cfg.get_int("device_poll_ms")?;
        if poll_ms <= 0 {
            return Err(ConfigError::Invalid {
                key: "device_poll_ms",
                reason: format!("{} must be positive", poll_ms),
            });
        }

        let level = cfg.get_string("log_level")?;
        let log_level = LevelFilter::from_str(&level).map_err(|_| ConfigError::Invalid {
            key: "log_level",
            reason: format!("unknown level '{}'", level),
        })?;

        let midi_output = cfg.get_string("midi_output").ok().filter(|s| !s.is_empty());
        let osc_url = cfg.get_string("osc_url").ok().filter(|s| !s.is_empty());
        debug!("MIDI output setting: {:?}, OSC URL setting: {:?}", midi_output, osc_url);

        Ok(Settings {
            bpm,
            step_count,
            track_count: tracks as usize,
            midi_output,
            osc_url,
            peer_sync: cfg.get_bool("peer_sync")?,
            device_poll: Duration::from_millis(poll_ms as u64),
            log_level,
        })
    }
}
