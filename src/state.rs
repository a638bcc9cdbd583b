use crate::config::{
    DEFAULT_BPM, DEFAULT_VOLUME_DB, MAX_BPM, MAX_VOLUME_DB, MIN_BPM, MIN_VOLUME_DB,
};
use crate::error::{EngineError, Result};
use std::fmt;

/// Stable track identifier. Assigned once, never reused while the engine lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pattern length shared by every track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepCount {
    Eight,
    #[default]
    Sixteen,
    ThirtyTwo,
    SixtyFour,
}

impl StepCount {
    pub const ALL: [StepCount; 4] = [
        StepCount::Eight,
        StepCount::Sixteen,
        StepCount::ThirtyTwo,
        StepCount::SixtyFour,
    ];

    pub fn len(self) -> usize {
        match self {
            StepCount::Eight => 8,
            StepCount::Sixteen => 16,
            StepCount::ThirtyTwo => 32,
            StepCount::SixtyFour => 64,
        }
    }
}

impl TryFrom<u32> for StepCount {
    type Error = EngineError;

    fn try_from(steps: u32) -> Result<Self> {
        match steps {
            8 => Ok(StepCount::Eight),
            16 => Ok(StepCount::Sixteen),
            32 => Ok(StepCount::ThirtyTwo),
            64 => Ok(StepCount::SixtyFour),
            other => Err(EngineError::out_of_range(
                "step count",
                other,
                "one of 8, 16, 32, 64",
            )),
        }
    }
}

impl fmt::Display for StepCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.len())
    }
}

/// Play state, tempo and pattern length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportState {
    pub is_playing: bool,
    pub bpm: f64,
    pub step_count: StepCount,
}

impl Default for TransportState {
    fn default() -> Self {
        Self {
            is_playing: false,
            bpm: DEFAULT_BPM,
            step_count: StepCount::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackState {
    pub id: TrackId,
    pub volume_db: f64,
    pub active_steps: Vec<bool>,
    pub current_step_index: Option<usize>,
}

impl TrackState {
    pub fn new(id: TrackId, step_count: StepCount) -> Self {
        Self {
            id,
            volume_db: DEFAULT_VOLUME_DB,
            active_steps: vec![false; step_count.len()],
            current_step_index: None,
        }
    }

    /// Keep the common prefix, zero-fill anything new.
    pub fn resize(&mut self, step_count: StepCount) {
        self.active_steps.resize(step_count.len(), false);
        if matches!(self.current_step_index, Some(i) if i >= step_count.len()) {
            self.current_step_index = None;
        }
    }
}

/// Tracks in creation order, addressed by [`TrackId`].
#[derive(Debug, Clone, Default)]
pub struct Tracks {
    tracks: Vec<TrackState>,
    next_id: u32,
}

impl Tracks {
    pub fn add(&mut self, step_count: StepCount) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.tracks.push(TrackState::new(id, step_count));
        id
    }

    pub fn remove(&mut self, id: TrackId) -> Option<TrackState> {
        let position = self.position(id)?;
        Some(self.tracks.remove(position))
    }

    pub fn get(&self, id: TrackId) -> Option<&TrackState> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut TrackState> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    pub fn position(&self, id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }

    pub fn id_at(&self, index: usize) -> Option<TrackId> {
        self.tracks.get(index).map(|t| t.id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackState> {
        self.tracks.iter()
    }

    pub fn resize_all(&mut self, step_count: StepCount) {
        for track in &mut self.tracks {
            track.resize(step_count);
        }
    }

    pub fn to_vec(&self) -> Vec<TrackState> {
        self.tracks.clone()
    }
}

pub fn validate_bpm(bpm: f64) -> Result<f64> {
    if (MIN_BPM..=MAX_BPM).contains(&bpm) {
        Ok(bpm)
    } else {
        Err(EngineError::out_of_range("bpm", bpm, "20..=330"))
    }
}

pub fn validate_volume(volume_db: f64) -> Result<f64> {
    if (MIN_VOLUME_DB..=MAX_VOLUME_DB).contains(&volume_db) {
        Ok(volume_db)
    } else {
        Err(EngineError::out_of_range("volume", volume_db, "-30..=0 dB"))
    }
}

/// Map a 0..=1 control value onto the volume range.
pub fn normalized_to_db(value: f64) -> f64 {
    value * (MAX_VOLUME_DB - MIN_VOLUME_DB) + MIN_VOLUME_DB
}

/// Map a 7-bit controller value onto the volume range: `value / 127 * 30 - 30`.
pub fn cc_to_db(value: u8) -> f64 {
    f64::from(value.min(127)) / 127.0 * 30.0 - 30.0
}
