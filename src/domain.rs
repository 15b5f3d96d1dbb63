//! ==============================================================================
//! domain.rs - shared sensor, event and connectivity types
//! ==============================================================================
//!
//! purpose:
//!     plain data carried between the store, the event log, both acquisition
//!     channels and the dashboard. everything here is serializable so the
//!     json api can hand it straight to the browser.
//!
//! relationships:
//!     - used by: store.rs, events.rs, poller.rs, session.rs, dashboard.rs
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};

/// threshold a sensor starts with until a device session reports its own
pub const DEFAULT_THRESHOLD_CM: f32 = 5.0;

/// coarse detection state as reported by the controller's bulk endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    #[default]
    Unknown,
    Low,
    High,
}

impl SensorStatus {
    /// parse the wire form used by `GET /sensors` ("low" / "high")
    ///
    /// the controller never reports "unknown"; that value only exists locally
    /// before the first poll lands.
    pub fn from_reported(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

/// observed state of one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    /// written only by the bulk poll channel
    pub status: SensorStatus,
    /// last live distance read over a device session (cm)
    pub distance: Option<f32>,
    /// calibration baseline (cm)
    pub zero: Option<f32>,
    /// detection threshold relative to zero (cm)
    pub threshold: f32,
    /// unix ms of the last live distance read
    pub last_update: Option<u64>,
    /// unix ms of the last bulk status write
    pub status_updated_ms: Option<u64>,
}

impl Default for SensorState {
    fn default() -> Self {
        Self {
            status: SensorStatus::Unknown,
            distance: None,
            zero: None,
            threshold: DEFAULT_THRESHOLD_CM,
            last_update: None,
            status_updated_ms: None,
        }
    }
}

/// fields obtained from a device session read; `None` leaves the store untouched
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionReading {
    pub distance: Option<f32>,
    pub zero: Option<f32>,
    pub threshold: Option<f32>,
}

/// calibration values accepted by a sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub zero: Option<f32>,
    pub threshold: Option<f32>,
}

impl Calibration {
    pub fn is_empty(&self) -> bool {
        self.zero.is_none() && self.threshold.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Info,
    PotholeDetected,
    NormalRestored,
    Success,
    Error,
}

/// one entry of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub message: String,
    pub kind: EventKind,
    /// unix timestamp (ms)
    pub timestamp_ms: u64,
}

/// reachability of both acquisition channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub bulk_channel_reachable: bool,
    pub wireless_capability_available: bool,
}

/// get current timestamp in milliseconds (unix epoch)
pub fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_status_parsing() {
        assert_eq!(SensorStatus::from_reported("low"), Some(SensorStatus::Low));
        assert_eq!(SensorStatus::from_reported("HIGH"), Some(SensorStatus::High));
        assert_eq!(SensorStatus::from_reported("unknown"), None);
        assert_eq!(SensorStatus::from_reported(""), None);
    }

    #[test]
    fn test_default_state() {
        let state = SensorState::default();
        assert_eq!(state.status, SensorStatus::Unknown);
        assert_eq!(state.threshold, DEFAULT_THRESHOLD_CM);
        assert!(state.distance.is_none() && state.zero.is_none() && state.last_update.is_none());
    }

    #[test]
    fn test_timestamp() {
        // should be after 2024
        assert!(timestamp_ms() > 1_700_000_000_000);
    }
}
