//! ==============================================================================
//! registry.rs - static catalog of sensor identities
//! ==============================================================================
//!
//! purpose:
//!     holds one descriptor per physical sensor, built once from configuration.
//!     the ordering of the catalog is the iteration order for bulk operations.
//!
//! ==============================================================================

use crate::config::SensorEntry;
use crate::error::{MonitorError, MonitorResult};
use serde::Serialize;

/// immutable identity and addressing data for one sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorDescriptor {
    /// unique logical name (e.g. "R3")
    pub name: String,
    /// advertised BLE local name of the sensor node
    pub wireless_device_id: String,
    /// controller input the sensor's detection line is wired to
    pub address_index: u32,
}

#[derive(Debug, Clone)]
pub struct SensorRegistry {
    sensors: Vec<SensorDescriptor>,
}

impl SensorRegistry {
    pub fn from_entries(entries: &[SensorEntry]) -> Self {
        let sensors = entries
            .iter()
            .map(|e| SensorDescriptor {
                name: e.name.clone(),
                wireless_device_id: e.wireless_device_id.clone(),
                address_index: e.address_index,
            })
            .collect();
        Self { sensors }
    }

    pub fn list_sensors(&self) -> &[SensorDescriptor] {
        &self.sensors
    }

    pub fn find_by_name(&self, name: &str) -> MonitorResult<&SensorDescriptor> {
        self.sensors
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| MonitorError::UnknownSensor(name.to_string()))
    }
}
