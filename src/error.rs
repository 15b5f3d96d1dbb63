use thiserror::Error;

/// failures surfaced by the monitor core
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MonitorError {
    #[error("sensor {0} is not registered")]
    UnknownSensor(String),

    #[error("wireless capability is not available on this host")]
    CapabilityUnavailable,

    #[error("device {0} was not found within the discovery window")]
    DeviceNotFound(String),

    #[error("session lost: {0}")]
    SessionLost(String),

    #[error("malformed {characteristic} payload: expected 4 bytes, got {len} ({hex})")]
    MalformedResponse {
        characteristic: &'static str,
        len: usize,
        hex: String,
    },

    #[error("device does not expose the {0}")]
    NotExposed(&'static str),

    #[error("invalid calibration input: {0}")]
    InvalidCalibrationInput(String),

    #[error("bulk channel request failed: {0}")]
    TransientNetwork(String),

    #[error("device session timed out after {0} ms")]
    Timeout(u64),

    #[error("a session for sensor {0} is already active")]
    SessionBusy(String),
}

pub type MonitorResult<T> = Result<T, MonitorError>;
