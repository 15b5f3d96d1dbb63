//! ==============================================================================
//! session.rs - exclusive per-sensor device sessions
//! ==============================================================================
//!
//! purpose:
//!     operator-initiated, short-lived sessions with one sensor node:
//!     - read_sensor: distance (mandatory) + zero/threshold (optional)
//!     - write_calibration: push zero and/or threshold to the node
//!
//! state machine per invocation:
//!
//! ```text
//!     Idle -> Connecting -> ServiceBound -> Reading|Writing -> Disconnecting -> Idle
//!       \________________________ any error ________________________/-> Failed -> Idle
//! ```
//!
//! guarantees:
//!     - one session per sensor at a time; a second request fails with SessionBusy.
//!     - reads and writes run under one deadline; teardown is bounded too.
//!     - an opened session is disconnected on every exit path, including
//!       the caller's future being dropped.
//!     - the store is only touched after every read/write succeeded.
//!     - every failure is surfaced: an Error event plus an observer message.
//!
//! ==============================================================================

use crate::bulk::BulkTransport;
use crate::connectivity::ConnectivitySupervisor;
use crate::domain::{timestamp_ms, Calibration, EventKind, SensorState, SessionReading};
use crate::error::{MonitorError, MonitorResult};
use crate::events::EventLog;
use crate::monitor::MonitorObserver;
use crate::registry::{SensorDescriptor, SensorRegistry};
use crate::store::SensorStore;
use crate::wireless::{decode_f32_le, encode_f32_le, DeviceSession, FieldRead, GattField, WirelessLink};

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};

/// upper bound on teardown, so a hung disconnect cannot pin the slot
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Connecting,
    ServiceBound,
    Reading,
    Writing,
    Disconnecting,
    Failed,
}

type PhaseTable = Arc<Mutex<HashMap<String, SessionPhase>>>;

/// marks a sensor as having an active session; releases it on drop
struct SessionSlot {
    name: String,
    phases: PhaseTable,
}

impl SessionSlot {
    fn set(&self, phase: SessionPhase) {
        tracing::debug!(sensor = %self.name, ?phase, "session phase");
        self.phases.lock().insert(self.name.clone(), phase);
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.phases.lock().remove(&self.name);
    }
}

// ==============================================================================
// session bodies
// ==============================================================================

/// the part of a session that runs between bind and disconnect
trait SessionBody: Send + 'static {
    type Output: Send + 'static;
    const PHASE: SessionPhase;

    fn run<S: DeviceSession>(self, session: &mut S) -> impl Future<Output = MonitorResult<Self::Output>> + Send;
}

struct ReadFields;

impl SessionBody for ReadFields {
    type Output = SessionReading;
    const PHASE: SessionPhase = SessionPhase::Reading;

    async fn run<S: DeviceSession>(self, session: &mut S) -> MonitorResult<SessionReading> {
        read_fields(session).await
    }
}

struct WriteFields(Calibration);

impl SessionBody for WriteFields {
    type Output = ();
    const PHASE: SessionPhase = SessionPhase::Writing;

    async fn run<S: DeviceSession>(self, session: &mut S) -> MonitorResult<()> {
        write_fields(session, self.0).await
    }
}

// ==============================================================================
// channel
// ==============================================================================

pub struct DeviceSessionChannel<B, W> {
    registry: Arc<SensorRegistry>,
    store: Arc<SensorStore>,
    events: Arc<EventLog>,
    wireless: Arc<W>,
    connectivity: Arc<ConnectivitySupervisor<B, W>>,
    observer: Arc<dyn MonitorObserver>,
    session_timeout: Duration,
    phases: PhaseTable,
}

impl<B: BulkTransport, W: WirelessLink> DeviceSessionChannel<B, W> {
    pub fn new(
        registry: Arc<SensorRegistry>,
        store: Arc<SensorStore>,
        events: Arc<EventLog>,
        wireless: Arc<W>,
        connectivity: Arc<ConnectivitySupervisor<B, W>>,
        observer: Arc<dyn MonitorObserver>,
        session_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            events,
            wireless,
            connectivity,
            observer,
            session_timeout,
            phases: PhaseTable::default(),
        }
    }

    pub fn phase(&self, name: &str) -> SessionPhase {
        self.phases.lock().get(name).copied().unwrap_or(SessionPhase::Idle)
    }

    fn claim(&self, name: &str) -> MonitorResult<SessionSlot> {
        let mut phases = self.phases.lock();
        if phases.contains_key(name) {
            return Err(MonitorError::SessionBusy(name.to_string()));
        }
        phases.insert(name.to_string(), SessionPhase::Connecting);
        Ok(SessionSlot { name: name.to_string(), phases: self.phases.clone() })
    }

    /// resolve the sensor and check the radio before any session is opened
    fn preflight(&self, name: &str) -> MonitorResult<SensorDescriptor> {
        let sensor = self.registry.find_by_name(name)?.clone();
        if !self.connectivity.detect_wireless_capability() {
            return Err(MonitorError::CapabilityUnavailable);
        }
        Ok(sensor)
    }

    fn fail(&self, action: &str, name: &str, error: &MonitorError) {
        tracing::warn!(sensor = name, "{} failed: {}", action, error);
        let message = format!("Failed to {} {}: {}", action, name, error);
        self.observer.message(&message, EventKind::Error);
        self.events.record(message, EventKind::Error);
    }

    /// run one session on its own task
    ///
    /// the task owns the slot and the link, so dropping the caller (a client
    /// hanging up, an aborted task) still ends in a disconnect and the sensor
    /// only reads as idle once that happened.
    async fn run_session<T: SessionBody>(&self, slot: SessionSlot, device_id: String, body: T) -> MonitorResult<T::Output> {
        let wireless = self.wireless.clone();
        let session_timeout = self.session_timeout;

        let task = tokio::spawn(async move {
            let result = drive(&*wireless, &slot, &device_id, session_timeout, body).await;
            if result.is_err() {
                slot.set(SessionPhase::Failed);
            }
            result
        });

        task.await
            .map_err(|e| MonitorError::SessionLost(format!("session task ended abnormally: {e}")))?
    }

    /// high-fidelity read of one sensor over its wireless link
    pub async fn read_sensor(&self, name: &str) -> MonitorResult<SensorState> {
        let result = self.try_read(name).await;
        if let Err(e) = &result {
            self.fail("read sensor", name, e);
        }
        result
    }

    async fn try_read(&self, name: &str) -> MonitorResult<SensorState> {
        let sensor = self.preflight(name)?;
        let slot = self.claim(name)?;

        self.observer
            .message(&format!("Connecting to {}...", sensor.wireless_device_id), EventKind::Info);

        let reading = self.run_session(slot, sensor.wireless_device_id, ReadFields).await?;

        let state = self.store.apply_session_reading(name, reading, timestamp_ms())?;
        self.observer.sensor_updated(name, &state);

        let distance = reading.distance.unwrap_or_default();
        self.observer
            .message(&format!("Successfully read data from {}", name), EventKind::Success);
        self.events
            .record(format!("Polled sensor {} via BLE: {:.2} cm", name, distance), EventKind::Success);
        Ok(state)
    }

    /// push calibration to a sensor; false on any failure, never an error
    ///
    /// only fields that are `Some` are written. with both absent the session
    /// is still opened and closed, nothing is written and the store is left
    /// as it was. success means the node accepted the writes; nothing is
    /// read back.
    pub async fn write_calibration(&self, name: &str, calibration: Calibration) -> bool {
        match self.try_write(name, calibration).await {
            Ok(()) => true,
            Err(e) => {
                self.fail("configure", name, &e);
                false
            }
        }
    }

    async fn try_write(&self, name: &str, calibration: Calibration) -> MonitorResult<()> {
        validate_calibration(&calibration)?;
        let sensor = self.preflight(name)?;
        let slot = self.claim(name)?;

        self.observer
            .message(&format!("Connecting to {}...", sensor.wireless_device_id), EventKind::Info);

        self.run_session(slot, sensor.wireless_device_id, WriteFields(calibration))
            .await?;

        let state = self.store.apply_calibration(name, calibration)?;
        if !calibration.is_empty() {
            self.observer.sensor_updated(name, &state);
        }

        self.observer
            .message(&format!("Successfully configured {}", name), EventKind::Success);
        self.events.record(
            format!(
                "Configured sensor {}: zero={}, threshold={}",
                name,
                describe(calibration.zero),
                describe(calibration.threshold)
            ),
            EventKind::Success,
        );
        Ok(())
    }
}

/// open, run the body under the session deadline, always disconnect
async fn drive<W: WirelessLink, T: SessionBody>(
    wireless: &W,
    slot: &SessionSlot,
    device_id: &str,
    session_timeout: Duration,
    body: T,
) -> MonitorResult<T::Output> {
    let deadline = Instant::now() + session_timeout;
    let timed_out = || MonitorError::Timeout(session_timeout.as_millis() as u64);

    // not cut short from here: the link cleans up after its own failures
    let mut session = wireless.open_session(device_id).await?;
    slot.set(SessionPhase::ServiceBound);

    let outcome = if Instant::now() >= deadline {
        Err(timed_out())
    } else {
        slot.set(T::PHASE);
        timeout_at(deadline, body.run(&mut session))
            .await
            .unwrap_or_else(|_| Err(timed_out()))
    };

    slot.set(SessionPhase::Disconnecting);
    if timeout(DISCONNECT_TIMEOUT, session.disconnect()).await.is_err() {
        tracing::warn!(device = device_id, "disconnect did not finish within {:?}", DISCONNECT_TIMEOUT);
    }

    outcome
}

async fn read_fields<S: DeviceSession>(session: &mut S) -> MonitorResult<SessionReading> {
    let distance = match session.read(GattField::Distance).await? {
        FieldRead::Present(bytes) => decode_f32_le(GattField::Distance, &bytes)?,
        FieldRead::Absent => return Err(MonitorError::NotExposed("distance characteristic")),
    };
    let zero = read_optional(session, GattField::Zero).await?;
    let threshold = read_optional(session, GattField::Threshold).await?;

    Ok(SessionReading { distance: Some(distance), zero, threshold })
}

async fn read_optional<S: DeviceSession>(session: &mut S, field: GattField) -> MonitorResult<Option<f32>> {
    match session.read(field).await? {
        FieldRead::Present(bytes) => decode_f32_le(field, &bytes).map(Some),
        FieldRead::Absent => {
            tracing::info!("{} characteristic not available", field.name());
            Ok(None)
        }
    }
}

async fn write_fields<S: DeviceSession>(session: &mut S, calibration: Calibration) -> MonitorResult<()> {
    let writes = [
        (GattField::Zero, calibration.zero),
        (GattField::Threshold, calibration.threshold),
    ];
    for (field, value) in writes {
        let Some(value) = value else { continue };
        match session.write(field, &encode_f32_le(value)).await? {
            FieldRead::Present(()) => tracing::debug!("set {} to {}", field.name(), value),
            FieldRead::Absent => {
                return Err(MonitorError::NotExposed(match field {
                    GattField::Zero => "zero characteristic",
                    _ => "threshold characteristic",
                }))
            }
        }
    }
    Ok(())
}

fn validate_calibration(calibration: &Calibration) -> MonitorResult<()> {
    for (label, value) in [("zero", calibration.zero), ("threshold", calibration.threshold)] {
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(MonitorError::InvalidCalibrationInput(format!("{label} must be a finite number")));
            }
        }
    }
    Ok(())
}

/// parse operator text for one calibration field; blank means "leave unchanged"
pub fn parse_calibration_field(label: &str, text: Option<&str>) -> MonitorResult<Option<f32>> {
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    let value: f32 = text
        .parse()
        .map_err(|_| MonitorError::InvalidCalibrationInput(format!("{label} {text:?} is not a number")))?;
    if !value.is_finite() {
        return Err(MonitorError::InvalidCalibrationInput(format!("{label} must be a finite number")));
    }
    Ok(Some(value))
}

fn describe(value: Option<f32>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_else(|| "unchanged".to_string())
}
