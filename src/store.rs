//! ==============================================================================
//! store.rs - canonical in-memory sensor state
//! ==============================================================================
//!
//! purpose:
//!     single source of truth for every registered sensor's observed state.
//!     both acquisition channels write through here and the dashboard reads
//!     snapshots from here.
//!
//! locking:
//!     the key set is fixed at construction, so the map itself is never
//!     mutated. each entry sits behind its own mutex and every operation
//!     applies all of its fields under one guard, so a reader never sees a
//!     half-applied update and two sensors never contend.
//!
//! ==============================================================================

use crate::domain::{Calibration, SensorState, SensorStatus, SessionReading};
use crate::error::{MonitorError, MonitorResult};
use crate::registry::SensorRegistry;
use parking_lot::Mutex;
use std::collections::HashMap;

pub struct SensorStore {
    entries: HashMap<String, Mutex<SensorState>>,
}

impl SensorStore {
    pub fn new(registry: &SensorRegistry) -> Self {
        let entries = registry
            .list_sensors()
            .iter()
            .map(|s| (s.name.clone(), Mutex::new(SensorState::default())))
            .collect();
        Self { entries }
    }

    fn entry(&self, name: &str) -> MonitorResult<&Mutex<SensorState>> {
        self.entries
            .get(name)
            .ok_or_else(|| MonitorError::UnknownSensor(name.to_string()))
    }

    pub fn get(&self, name: &str) -> MonitorResult<SensorState> {
        Ok(self.entry(name)?.lock().clone())
    }

    /// write a server-reported status and hand back the one it replaced
    pub fn apply_bulk_status(
        &self,
        name: &str,
        status: SensorStatus,
        now_ms: u64,
    ) -> MonitorResult<SensorStatus> {
        let mut state = self.entry(name)?.lock();
        let previous = state.status;
        state.status = status;
        state.status_updated_ms = Some(now_ms);
        Ok(previous)
    }

    /// merge a device session read; absent fields are left as they were
    pub fn apply_session_reading(
        &self,
        name: &str,
        reading: SessionReading,
        now_ms: u64,
    ) -> MonitorResult<SensorState> {
        let mut state = self.entry(name)?.lock();
        if let Some(distance) = reading.distance {
            state.distance = Some(distance);
            state.last_update = Some(now_ms);
        }
        if let Some(zero) = reading.zero {
            state.zero = Some(zero);
        }
        if let Some(threshold) = reading.threshold {
            state.threshold = threshold;
        }
        Ok(state.clone())
    }

    /// record calibration accepted by the sensor; distance and last_update stay
    pub fn apply_calibration(&self, name: &str, calibration: Calibration) -> MonitorResult<SensorState> {
        let mut state = self.entry(name)?.lock();
        if let Some(zero) = calibration.zero {
            state.zero = Some(zero);
        }
        if let Some(threshold) = calibration.threshold {
            state.threshold = threshold;
        }
        Ok(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_sensors;

    fn store() -> SensorStore {
        SensorStore::new(&SensorRegistry::from_entries(&default_sensors()))
    }

    #[test]
    fn test_unknown_sensor() {
        let store = store();
        assert_eq!(store.get("Z1"), Err(MonitorError::UnknownSensor("Z1".into())));
        assert!(store.apply_bulk_status("Z1", SensorStatus::High, 1).is_err());
    }

    #[test]
    fn test_bulk_status_returns_previous() {
        let store = store();
        assert_eq!(store.apply_bulk_status("R1", SensorStatus::Low, 10).unwrap(), SensorStatus::Unknown);
        assert_eq!(store.apply_bulk_status("R1", SensorStatus::High, 20).unwrap(), SensorStatus::Low);
        let state = store.get("R1").unwrap();
        assert_eq!(state.status, SensorStatus::High);
        assert_eq!(state.status_updated_ms, Some(20));
        assert_eq!(state.last_update, None);
    }

    #[test]
    fn test_distance_only_reading_keeps_calibration() {
        let store = store();
        store.apply_calibration("R2", Calibration { zero: Some(30.0), threshold: Some(4.0) }).unwrap();

        let reading = SessionReading { distance: Some(12.3), ..Default::default() };
        let state = store.apply_session_reading("R2", reading, 99).unwrap();
        assert_eq!(state.distance, Some(12.3));
        assert_eq!(state.last_update, Some(99));
        assert_eq!(state.zero, Some(30.0));
        assert_eq!(state.threshold, 4.0);
    }

    #[test]
    fn test_reading_without_distance_keeps_last_update() {
        let store = store();
        let reading = SessionReading { zero: Some(25.0), ..Default::default() };
        let state = store.apply_session_reading("R3", reading, 50).unwrap();
        assert_eq!(state.zero, Some(25.0));
        assert_eq!(state.last_update, None);
    }

    #[test]
    fn test_calibration_leaves_distance_alone() {
        let store = store();
        store
            .apply_session_reading("L1", SessionReading { distance: Some(40.0), ..Default::default() }, 7)
            .unwrap();
        let state = store.apply_calibration("L1", Calibration { zero: Some(1.0), threshold: None }).unwrap();
        assert_eq!(state.zero, Some(1.0));
        assert_eq!(state.threshold, crate::domain::DEFAULT_THRESHOLD_CM);
        assert_eq!(state.distance, Some(40.0));
        assert_eq!(state.last_update, Some(7));
    }
}
