//! ==============================================================================
//! wireless.rs - per-sensor wireless session abstraction
//! ==============================================================================
//!
//! purpose:
//!     the platform capability the device session channel drives. a link
//!     opens an exclusive session to one sensor node (connect + bind to the
//!     sensor service); the session reads and writes the three float
//!     characteristics and is then torn down.
//!
//! design:
//!     characteristic presence is part of the result type (FieldRead) so the
//!     "optional zero/threshold" branch is an ordinary success path and
//!     errors are reserved for real failures.
//!
//! relationships:
//!     - used by: session.rs, connectivity.rs
//!     - implemented by: ble.rs (btleplug), fakes.rs (tests)
//!
//! ==============================================================================

use crate::error::{MonitorError, MonitorResult};
use std::future::Future;

/// the sensor service's characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattField {
    /// read-only, mandatory
    Distance,
    /// read/write, optional on older firmware
    Zero,
    /// read/write, optional on older firmware
    Threshold,
}

impl GattField {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Distance => "distance",
            Self::Zero => "zero",
            Self::Threshold => "threshold",
        }
    }
}

/// outcome of touching a characteristic that may not exist on the device
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRead<T> {
    Present(T),
    Absent,
}

/// an open, service-bound session with one sensor node
pub trait DeviceSession: Send {
    fn read(&mut self, field: GattField) -> impl Future<Output = MonitorResult<FieldRead<Vec<u8>>>> + Send;

    fn write(&mut self, field: GattField, payload: &[u8]) -> impl Future<Output = MonitorResult<FieldRead<()>>> + Send;

    /// tear the session down; must be safe to call after a failed operation
    fn disconnect(self) -> impl Future<Output = ()> + Send;
}

pub trait WirelessLink: Send + Sync + 'static {
    type Session: DeviceSession + 'static;

    /// synchronous capability check, no radio traffic
    fn is_available(&self) -> bool;

    /// discover the advertiser named `device_id`, connect and bind the sensor service
    ///
    /// implementations bound each of their own steps and never leave a
    /// connection behind when they fail, so callers await this to completion.
    fn open_session(&self, device_id: &str) -> impl Future<Output = MonitorResult<Self::Session>> + Send;
}

/// decode a little-endian f32 characteristic value
pub fn decode_f32_le(field: GattField, payload: &[u8]) -> MonitorResult<f32> {
    let bytes: [u8; 4] = payload.try_into().map_err(|_| MonitorError::MalformedResponse {
        characteristic: field.name(),
        len: payload.len(),
        hex: hex::encode(payload),
    })?;
    Ok(f32::from_le_bytes(bytes))
}

pub fn encode_f32_le(value: f32) -> [u8; 4] {
    value.to_le_bytes()
}
