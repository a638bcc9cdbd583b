use thiserror::Error;

/// Every way an engine operation can be rejected.
///
/// None of these are fatal: the caller reports them to whoever issued the
/// intent and the engine keeps its previous state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A value outside its domain (bpm, step count, volume, track or step index)
    #[error("{field} out of range: {value} (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
    /// A malformed outbound MIDI message or inbound OSC payload
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    /// MIDI access denied, device missing, or no output selected
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    /// The OSC bridge could not be reached or is not connected
    #[error("connection error: {0}")]
    ConnectionError(String),
}

impl EngineError {
    pub(crate) fn out_of_range(
        field: &'static str,
        value: impl ToString,
        expected: &'static str,
    ) -> Self {
        EngineError::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        }
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, EngineError::OutOfRange { .. })
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
