//! in-memory stand-ins for the controller and the sensor nodes

use crate::bulk::{BulkTransport, StatusSnapshot};
use crate::domain::SensorStatus;
use crate::error::{MonitorError, MonitorResult};
use crate::wireless::{encode_f32_le, DeviceSession, FieldRead, GattField, WirelessLink};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ==============================================================================
// bulk controller
// ==============================================================================

#[derive(Default)]
struct BulkInner {
    reachable: AtomicBool,
    fail_fetch: AtomicBool,
    fetches: AtomicUsize,
    snapshot: Mutex<StatusSnapshot>,
    delay: Mutex<Option<Duration>>,
}

#[derive(Clone, Default)]
pub struct FakeBulk {
    inner: Arc<BulkInner>,
}

impl FakeBulk {
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.inner.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock() = Some(delay);
    }

    pub fn report(&self, entries: &[(&str, SensorStatus)]) {
        let mut snapshot = self.inner.snapshot.lock();
        for (name, status) in entries {
            snapshot.insert(name.to_string(), *status);
        }
    }

    pub fn report_all(&self, names: &[&str], status: SensorStatus) {
        let mut snapshot = self.inner.snapshot.lock();
        for name in names {
            snapshot.insert(name.to_string(), status);
        }
    }

    pub fn fetches(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }
}

impl BulkTransport for FakeBulk {
    async fn probe(&self) -> bool {
        self.inner.reachable.load(Ordering::SeqCst)
    }

    async fn fetch_snapshot(&self) -> MonitorResult<StatusSnapshot> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.inner.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.inner.fail_fetch.load(Ordering::SeqCst) {
            return Err(MonitorError::TransientNetwork("connection refused".into()));
        }
        Ok(self.inner.snapshot.lock().clone())
    }
}

// ==============================================================================
// sensor nodes
// ==============================================================================

/// one simulated node; `None` characteristics are not exposed
#[derive(Clone, Debug)]
pub struct FakeDevice {
    pub distance: Option<Vec<u8>>,
    pub zero: Option<Vec<u8>>,
    pub threshold: Option<Vec<u8>>,
    /// the link drops when this field is touched
    pub lose_on: Option<GattField>,
    /// how long each read takes
    pub latency: Option<Duration>,
}

impl FakeDevice {
    pub fn full(distance: f32, zero: f32, threshold: f32) -> Self {
        Self {
            distance: Some(encode_f32_le(distance).to_vec()),
            zero: Some(encode_f32_le(zero).to_vec()),
            threshold: Some(encode_f32_le(threshold).to_vec()),
            lose_on: None,
            latency: None,
        }
    }

    pub fn distance_only(distance: f32) -> Self {
        Self {
            distance: Some(encode_f32_le(distance).to_vec()),
            zero: None,
            threshold: None,
            lose_on: None,
            latency: None,
        }
    }

    fn slot(&mut self, field: GattField) -> &mut Option<Vec<u8>> {
        match field {
            GattField::Distance => &mut self.distance,
            GattField::Zero => &mut self.zero,
            GattField::Threshold => &mut self.threshold,
        }
    }
}

#[derive(Default)]
struct WirelessInner {
    available: AtomicBool,
    devices: Mutex<HashMap<String, FakeDevice>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    writes: Mutex<Vec<(String, GattField, Vec<u8>)>>,
    /// time spent connecting and binding before a session exists
    open_latency: Mutex<Option<Duration>>,
    /// disconnect never completes
    disconnect_hangs: AtomicBool,
}

#[derive(Clone, Default)]
pub struct FakeWireless {
    inner: Arc<WirelessInner>,
}

impl FakeWireless {
    pub fn new() -> Self {
        let link = Self::default();
        link.inner.available.store(true, Ordering::SeqCst);
        link
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device_id: &str, device: FakeDevice) {
        self.inner.devices.lock().insert(device_id.to_string(), device);
    }

    pub fn set_open_latency(&self, latency: Duration) {
        *self.inner.open_latency.lock() = Some(latency);
    }

    pub fn set_disconnect_hangs(&self, hangs: bool) {
        self.inner.disconnect_hangs.store(hangs, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(String, GattField, Vec<u8>)> {
        self.inner.writes.lock().clone()
    }
}

impl WirelessLink for FakeWireless {
    type Session = FakeSession;

    fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    async fn open_session(&self, device_id: &str) -> MonitorResult<FakeSession> {
        if !self.is_available() {
            return Err(MonitorError::CapabilityUnavailable);
        }
        if !self.inner.devices.lock().contains_key(device_id) {
            return Err(MonitorError::DeviceNotFound(device_id.to_string()));
        }
        let latency = *self.inner.open_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            device_id: device_id.to_string(),
            inner: self.inner.clone(),
        })
    }
}

pub struct FakeSession {
    device_id: String,
    inner: Arc<WirelessInner>,
}

impl DeviceSession for FakeSession {
    async fn read(&mut self, field: GattField) -> MonitorResult<FieldRead<Vec<u8>>> {
        let device = self.inner.devices.lock().get(&self.device_id).cloned();
        let mut device = device.ok_or_else(|| MonitorError::SessionLost("device vanished".into()))?;
        if let Some(latency) = device.latency {
            tokio::time::sleep(latency).await;
        }
        if device.lose_on == Some(field) {
            return Err(MonitorError::SessionLost("link dropped".into()));
        }
        Ok(match device.slot(field).clone() {
            Some(bytes) => FieldRead::Present(bytes),
            None => FieldRead::Absent,
        })
    }

    async fn write(&mut self, field: GattField, payload: &[u8]) -> MonitorResult<FieldRead<()>> {
        let mut devices = self.inner.devices.lock();
        let device = devices
            .get_mut(&self.device_id)
            .ok_or_else(|| MonitorError::SessionLost("device vanished".into()))?;
        if device.lose_on == Some(field) {
            return Err(MonitorError::SessionLost("link dropped".into()));
        }
        let slot = device.slot(field);
        if slot.is_none() {
            return Ok(FieldRead::Absent);
        }
        *slot = Some(payload.to_vec());
        self.inner
            .writes
            .lock()
            .push((self.device_id.clone(), field, payload.to_vec()));
        Ok(FieldRead::Present(()))
    }

    async fn disconnect(self) {
        if self.inner.disconnect_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.closed.fetch_add(1, Ordering::SeqCst);
    }
}
