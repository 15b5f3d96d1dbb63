//! ==============================================================================
//! monitor.rs - the context object tying the components together
//! ==============================================================================
//!
//! purpose:
//!     one Monitor owns one registry, store, event log, connectivity
//!     supervisor, poller and session channel. nothing is global, so several
//!     independent monitors can live in one process (tests do exactly that).
//!
//! relationships:
//!     - builds: registry.rs, store.rs, events.rs, connectivity.rs,
//!       poller.rs, session.rs
//!     - used by: dashboard.rs (http surface), main.rs (lifecycle)
//!
//! ==============================================================================

use crate::bulk::BulkTransport;
use crate::config::MonitorConfig;
use crate::connectivity::ConnectivitySupervisor;
use crate::domain::{Calibration, ConnectivityState, Event, EventKind, SensorState};
use crate::error::{MonitorError, MonitorResult};
use crate::events::EventLog;
use crate::poller::BulkPoller;
use crate::registry::{SensorDescriptor, SensorRegistry};
use crate::session::{parse_calibration_field, DeviceSessionChannel, SessionPhase};
use crate::store::SensorStore;
use crate::wireless::WirelessLink;

use std::sync::Arc;
use std::time::Duration;

// ==============================================================================
// observer
// ==============================================================================

/// hooks for a presentation layer; every method defaults to doing nothing
pub trait MonitorObserver: Send + Sync {
    fn event_recorded(&self, _event: &Event) {}
    fn sensor_updated(&self, _name: &str, _state: &SensorState) {}
    fn connectivity_changed(&self, _state: ConnectivityState) {}
    /// transient operator notice, e.g. "Connecting to NanoTFluna-R1..."
    fn message(&self, _text: &str, _kind: EventKind) {}
}

pub struct NoopObserver;

impl MonitorObserver for NoopObserver {}

// ==============================================================================
// monitor
// ==============================================================================

pub struct Monitor<B, W> {
    registry: Arc<SensorRegistry>,
    store: Arc<SensorStore>,
    events: Arc<EventLog>,
    connectivity: Arc<ConnectivitySupervisor<B, W>>,
    poller: Arc<BulkPoller<B, W>>,
    sessions: DeviceSessionChannel<B, W>,
}

impl<B: BulkTransport, W: WirelessLink> Monitor<B, W> {
    pub fn new(config: &MonitorConfig, bulk: B, wireless: W, observer: Arc<dyn MonitorObserver>) -> Self {
        let registry = Arc::new(SensorRegistry::from_entries(&config.sensors));
        let store = Arc::new(SensorStore::new(&registry));
        let events = Arc::new(EventLog::new(config.events.capacity, observer.clone()));
        let bulk = Arc::new(bulk);
        let wireless = Arc::new(wireless);

        let connectivity = Arc::new(ConnectivitySupervisor::new(
            bulk.clone(),
            wireless.clone(),
            observer.clone(),
        ));
        let poller = Arc::new(BulkPoller::new(
            registry.clone(),
            store.clone(),
            events.clone(),
            bulk,
            connectivity.clone(),
            observer.clone(),
            config.bulk.poll_interval(),
        ));
        let sessions = DeviceSessionChannel::new(
            registry.clone(),
            store.clone(),
            events.clone(),
            wireless,
            connectivity.clone(),
            observer,
            config.wireless.session_timeout(),
        );

        Self { registry, store, events, connectivity, poller, sessions }
    }

    pub fn list_sensors(&self) -> &[SensorDescriptor] {
        self.registry.list_sensors()
    }

    pub fn get_sensor_state(&self, name: &str) -> MonitorResult<SensorState> {
        self.store.get(name)
    }

    /// newest first
    pub fn get_events(&self) -> Vec<Event> {
        self.events.list()
    }

    pub fn clear_events(&self) {
        self.events.clear();
    }

    pub fn start_polling(&self) {
        self.poller.start();
    }

    pub fn stop_polling(&self) {
        self.poller.stop();
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.connectivity.state()
    }

    pub fn session_phase(&self, name: &str) -> MonitorResult<SessionPhase> {
        self.registry.find_by_name(name)?;
        Ok(self.sessions.phase(name))
    }

    /// probe both channels; polling follows the bulk channel's reachability
    pub async fn check_connectivity(&self) -> ConnectivityState {
        let reachable = self.connectivity.probe_bulk_channel().await;
        self.connectivity.detect_wireless_capability();

        if reachable {
            if !self.poller.is_running() {
                self.poller.start();
            }
        } else {
            self.poller.stop();
        }
        self.connectivity.state()
    }

    /// keep probing in the background and start/stop polling on changes
    pub fn start_connectivity_monitoring(&self, interval: Duration) {
        let poller = self.poller.clone();
        self.connectivity.start_monitoring(interval, move |state| {
            if state.bulk_channel_reachable {
                if !poller.is_running() {
                    poller.start();
                }
            } else {
                poller.stop();
            }
        });
    }

    pub async fn read_sensor(&self, name: &str) -> MonitorResult<SensorState> {
        self.sessions.read_sensor(name).await
    }

    pub async fn write_calibration(&self, name: &str, calibration: Calibration) -> bool {
        self.sessions.write_calibration(name, calibration).await
    }

    /// parse operator text first; bad input never opens a session
    pub async fn write_calibration_input(
        &self,
        name: &str,
        zero: Option<&str>,
        threshold: Option<&str>,
    ) -> MonitorResult<bool> {
        let parsed = parse_calibration_field("zero", zero).and_then(|zero| {
            parse_calibration_field("threshold", threshold).map(|threshold| Calibration { zero, threshold })
        });
        match parsed {
            Ok(calibration) => Ok(self.write_calibration(name, calibration).await),
            Err(e) => {
                self.events
                    .record(format!("Invalid calibration for {}: {}", name, e), EventKind::Error);
                Err(e)
            }
        }
    }

    /// distance to use as the new zero: the stored reading, or a fresh one
    pub async fn zero_from_current_reading(&self, name: &str) -> MonitorResult<f32> {
        if let Some(distance) = self.store.get(name)?.distance {
            return Ok(distance);
        }
        self.read_sensor(name)
            .await?
            .distance
            .ok_or(MonitorError::NotExposed("distance characteristic"))
    }

    /// stop every background task and wait for the poll loop to exit
    pub async fn shutdown(&self) {
        // monitoring first: it may start the poller until it has exited
        self.connectivity.stop_monitoring().await;
        self.poller.shutdown().await;
        tracing::info!("monitor shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SensorStatus;
    use crate::fakes::{FakeBulk, FakeDevice, FakeWireless};
    use crate::poller::PollOutcome;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<String>>,
        updates: Mutex<Vec<String>>,
        events: Mutex<Vec<EventKind>>,
        connectivity: Mutex<Vec<ConnectivityState>>,
    }

    impl MonitorObserver for Recorder {
        fn event_recorded(&self, event: &Event) {
            self.events.lock().push(event.kind);
        }
        fn sensor_updated(&self, name: &str, _state: &SensorState) {
            self.updates.lock().push(name.to_string());
        }
        fn connectivity_changed(&self, state: ConnectivityState) {
            self.connectivity.lock().push(state);
        }
        fn message(&self, text: &str, _kind: EventKind) {
            self.messages.lock().push(text.to_string());
        }
    }

    const ALL: [&str; 16] = [
        "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "L1", "L2", "L3", "L4", "L5", "L6", "L7", "L8",
    ];

    fn monitor(bulk: FakeBulk, link: FakeWireless) -> (Monitor<FakeBulk, FakeWireless>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let monitor = Monitor::new(&MonitorConfig::default(), bulk, link, recorder.clone());
        (monitor, recorder)
    }

    #[tokio::test]
    async fn test_pothole_scenario() {
        let bulk = FakeBulk::default();
        bulk.set_reachable(true);
        let (monitor, recorder) = monitor(bulk.clone(), FakeWireless::new());
        monitor.connectivity.probe_bulk_channel().await;

        bulk.report_all(&ALL, SensorStatus::Low);
        assert_eq!(monitor.poller.poll_once().await, PollOutcome::Applied { transitions: 0 });
        assert!(monitor.get_events().is_empty());

        bulk.report(&[("R3", SensorStatus::High)]);
        assert_eq!(monitor.poller.poll_once().await, PollOutcome::Applied { transitions: 1 });

        bulk.report(&[("R3", SensorStatus::Low)]);
        assert_eq!(monitor.poller.poll_once().await, PollOutcome::Applied { transitions: 1 });

        let events = monitor.get_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::NormalRestored);
        assert!(events[0].message.contains("R3"));
        assert_eq!(events[1].kind, EventKind::PotholeDetected);
        assert!(events[1].message.contains("R3"));

        assert_eq!(monitor.get_sensor_state("R3").unwrap().status, SensorStatus::Low);
        assert_eq!(recorder.events.lock().len(), 2);
        // 16 first sightings plus two R3 changes
        assert_eq!(recorder.updates.lock().len(), 18);

        monitor.clear_events();
        assert!(monitor.get_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_connectivity_drives_polling() {
        let bulk = FakeBulk::default();
        let (monitor, recorder) = monitor(bulk.clone(), FakeWireless::new());

        let state = monitor.check_connectivity().await;
        assert!(!state.bulk_channel_reachable);
        assert!(state.wireless_capability_available);
        assert!(!monitor.is_polling());

        bulk.set_reachable(true);
        assert!(monitor.check_connectivity().await.bulk_channel_reachable);
        assert!(monitor.is_polling());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(bulk.fetches() >= 3);

        bulk.set_reachable(false);
        monitor.check_connectivity().await;
        assert!(!monitor.is_polling());
        assert_eq!(recorder.connectivity.lock().len(), 3);

        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_monitoring_starts_polling() {
        let bulk = FakeBulk::default();
        let (monitor, _) = monitor(bulk.clone(), FakeWireless::new());
        monitor.start_connectivity_monitoring(Duration::from_millis(500));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!monitor.is_polling());

        bulk.set_reachable(true);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(monitor.is_polling());

        bulk.set_reachable(false);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!monitor.is_polling());

        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_leaves_nothing_running() {
        let bulk = FakeBulk::default();
        bulk.set_reachable(true);
        let (monitor, _) = monitor(bulk.clone(), FakeWireless::new());
        monitor.start_connectivity_monitoring(Duration::from_millis(500));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(monitor.is_polling());

        monitor.shutdown().await;
        assert!(!monitor.is_polling());
        let fetched = bulk.fetches();

        // neither the monitor nor a restarted poll loop survives shutdown
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(bulk.fetches(), fetched);
        assert!(!monitor.is_polling());
    }

    #[tokio::test]
    async fn test_zero_from_current_reading() {
        let link = FakeWireless::new();
        link.add_device("NanoTFluna-L2", FakeDevice::full(33.5, 30.0, 5.0));
        let (monitor, recorder) = monitor(FakeBulk::default(), link.clone());

        assert_eq!(monitor.zero_from_current_reading("L2").await.unwrap(), 33.5);
        assert_eq!(link.opened(), 1);
        assert!(recorder.messages.lock().iter().any(|m| m == "Connecting to NanoTFluna-L2..."));

        // second time the stored distance is used
        assert_eq!(monitor.zero_from_current_reading("L2").await.unwrap(), 33.5);
        assert_eq!(link.opened(), 1);

        assert!(monitor.write_calibration("L2", Calibration { zero: Some(33.5), threshold: None }).await);
        assert_eq!(monitor.get_sensor_state("L2").unwrap().zero, Some(33.5));
    }

    #[tokio::test]
    async fn test_invalid_calibration_input_opens_no_session() {
        let link = FakeWireless::new();
        link.add_device("NanoTFluna-R1", FakeDevice::full(10.0, 10.0, 5.0));
        let (monitor, _) = monitor(FakeBulk::default(), link.clone());

        let err = monitor
            .write_calibration_input("R1", Some("12"), Some("five"))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::InvalidCalibrationInput(_)));
        assert_eq!(link.opened(), 0);
        assert_eq!(monitor.get_events()[0].kind, EventKind::Error);

        assert!(monitor.write_calibration_input("R1", Some("12"), Some("")).await.unwrap());
        let state = monitor.get_sensor_state("R1").unwrap();
        assert_eq!(state.zero, Some(12.0));
        assert_eq!(state.threshold, crate::domain::DEFAULT_THRESHOLD_CM);
    }

    #[tokio::test]
    async fn test_unknown_sensor_surfaces() {
        let (monitor, _) = monitor(FakeBulk::default(), FakeWireless::new());
        assert!(monitor.get_sensor_state("X1").is_err());
        assert!(monitor.session_phase("X1").is_err());
        assert_eq!(monitor.session_phase("R1").unwrap(), SessionPhase::Idle);
        assert_eq!(monitor.list_sensors().len(), 16);
        assert_eq!(monitor.list_sensors()[8].name, "L8");
    }
}
