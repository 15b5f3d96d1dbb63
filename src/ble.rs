//! ==============================================================================
//! ble.rs - btleplug implementation of the wireless link
//! ==============================================================================
//!
//! purpose:
//!     finds a sensor node by its advertised local name, connects, binds the
//!     sensor service and exposes its float characteristics.
//!
//! hardware:
//!     arduino nano 33 ble nodes named "NanoTFluna-<sensor>", one gatt
//!     service with distance / zero / threshold characteristics, each a
//!     4-byte little-endian float in centimeters.
//!
//! relationships:
//!     - implements: wireless.rs (WirelessLink, DeviceSession)
//!     - used by: main.rs (constructs the link handed to the monitor)
//!
//! ==============================================================================

use crate::config::{GattLayout, WirelessConfig};
use crate::error::{MonitorError, MonitorResult};
use crate::wireless::{DeviceSession, FieldRead, GattField, WirelessLink};

use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::time::Duration;
use tokio::time;
use uuid::Uuid;

pub struct BleLink {
    adapter: Option<Adapter>,
    layout: GattLayout,
    scan_timeout: Duration,
    connect_timeout: Duration,
}

impl BleLink {
    /// grab the first bluetooth adapter, if the host has one
    ///
    /// a missing adapter is not an error: the link simply reports itself
    /// unavailable and every session request fails fast.
    pub async fn new(config: &WirelessConfig) -> anyhow::Result<Self> {
        let layout = config.gatt_layout()?;
        let adapter = if config.enabled {
            first_adapter().await
        } else {
            tracing::info!("wireless sessions disabled by configuration");
            None
        };

        Ok(Self {
            adapter,
            layout,
            scan_timeout: config.scan_timeout(),
            connect_timeout: config.connect_timeout(),
        })
    }

    async fn find_peripheral(&self, adapter: &Adapter, device_id: &str) -> MonitorResult<Peripheral> {
        let lost = |e| map_ble_error(e, device_id);

        // already seen during an earlier scan
        if let Ok(peripherals) = adapter.peripherals().await {
            for p in peripherals {
                if local_name(&p).await.as_deref() == Some(device_id) {
                    return Ok(p);
                }
            }
        }

        let mut events = adapter.events().await.map_err(lost)?;
        adapter.start_scan(ScanFilter::default()).await.map_err(lost)?;
        let mut scan = StopScanOnDrop { adapter: adapter.clone(), armed: true };

        let found = time::timeout(self.scan_timeout, async {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) = event {
                    if let Ok(p) = adapter.peripheral(&id).await {
                        if local_name(&p).await.as_deref() == Some(device_id) {
                            return Some(p);
                        }
                    }
                }
            }
            None
        })
        .await
        .ok()
        .flatten();

        scan.armed = false;
        if let Err(e) = adapter.stop_scan().await {
            tracing::debug!("stop_scan failed: {}", e);
        }

        found.ok_or_else(|| MonitorError::DeviceNotFound(device_id.to_string()))
    }

    async fn bind(&self, peripheral: &Peripheral, device_id: &str) -> MonitorResult<Vec<Characteristic>> {
        match time::timeout(self.connect_timeout, peripheral.discover_services()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(map_ble_error(e, device_id)),
            Err(_) => return Err(MonitorError::Timeout(self.connect_timeout.as_millis() as u64)),
        }
        let service = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == self.layout.service)
            .ok_or(MonitorError::NotExposed("sensor service"))?;
        Ok(service.characteristics.into_iter().collect())
    }
}

impl WirelessLink for BleLink {
    type Session = BleSession;

    fn is_available(&self) -> bool {
        self.adapter.is_some()
    }

    /// every step is bounded; a failure or a dropped future never leaves
    /// the peripheral connected or the adapter scanning
    async fn open_session(&self, device_id: &str) -> MonitorResult<BleSession> {
        let adapter = self.adapter.as_ref().ok_or(MonitorError::CapabilityUnavailable)?;

        let peripheral = self.find_peripheral(adapter, device_id).await?;
        let mut link = DisconnectOnDrop { peripheral: peripheral.clone(), armed: true };

        match time::timeout(self.connect_timeout, peripheral.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(map_ble_error(e, device_id)),
            Err(_) => return Err(MonitorError::Timeout(self.connect_timeout.as_millis() as u64)),
        }
        tracing::debug!(device = device_id, "connected");

        let characteristics = self.bind(&peripheral, device_id).await?;
        link.armed = false;
        Ok(BleSession {
            device_id: device_id.to_string(),
            peripheral,
            characteristics,
            layout: self.layout,
        })
    }
}

// ==============================================================================
// teardown guards
// ==============================================================================
// drop cannot await, so cleanup is handed to the runtime.

struct DisconnectOnDrop {
    peripheral: Peripheral,
    armed: bool,
}

impl Drop for DisconnectOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let peripheral = self.peripheral.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    tracing::warn!("disconnect after failed open failed: {}", e);
                }
            });
        }
    }
}

struct StopScanOnDrop {
    adapter: Adapter,
    armed: bool,
}

impl Drop for StopScanOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let adapter = self.adapter.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = adapter.stop_scan().await;
            });
        }
    }
}

pub struct BleSession {
    device_id: String,
    peripheral: Peripheral,
    characteristics: Vec<Characteristic>,
    layout: GattLayout,
}

impl BleSession {
    fn characteristic(&self, field: GattField) -> Option<&Characteristic> {
        let uuid: Uuid = match field {
            GattField::Distance => self.layout.distance,
            GattField::Zero => self.layout.zero,
            GattField::Threshold => self.layout.threshold,
        };
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

impl DeviceSession for BleSession {
    async fn read(&mut self, field: GattField) -> MonitorResult<FieldRead<Vec<u8>>> {
        let Some(ch) = self.characteristic(field) else {
            return Ok(FieldRead::Absent);
        };
        let value = self
            .peripheral
            .read(ch)
            .await
            .map_err(|e| map_ble_error(e, &self.device_id))?;
        Ok(FieldRead::Present(value))
    }

    async fn write(&mut self, field: GattField, payload: &[u8]) -> MonitorResult<FieldRead<()>> {
        let Some(ch) = self.characteristic(field) else {
            return Ok(FieldRead::Absent);
        };
        self.peripheral
            .write(ch, payload, WriteType::WithResponse)
            .await
            .map_err(|e| map_ble_error(e, &self.device_id))?;
        Ok(FieldRead::Present(()))
    }

    async fn disconnect(self) {
        match self.peripheral.disconnect().await {
            Ok(()) => tracing::debug!(device = %self.device_id, "disconnected"),
            Err(e) => tracing::warn!(device = %self.device_id, "disconnect failed: {}", e),
        }
    }
}

async fn first_adapter() -> Option<Adapter> {
    let manager = match Manager::new().await {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("bluetooth manager unavailable: {}", e);
            return None;
        }
    };
    match manager.adapters().await {
        Ok(adapters) => {
            let adapter = adapters.into_iter().next();
            if adapter.is_none() {
                tracing::warn!("no bluetooth adapter found");
            }
            adapter
        }
        Err(e) => {
            tracing::warn!("failed to list bluetooth adapters: {}", e);
            None
        }
    }
}

async fn local_name(p: &Peripheral) -> Option<String> {
    p.properties().await.ok().flatten().and_then(|props| props.local_name)
}

fn map_ble_error(e: btleplug::Error, device_id: &str) -> MonitorError {
    match e {
        btleplug::Error::DeviceNotFound => MonitorError::DeviceNotFound(device_id.to_string()),
        btleplug::Error::TimedOut(d) => MonitorError::Timeout(d.as_millis() as u64),
        other => MonitorError::SessionLost(other.to_string()),
    }
}
