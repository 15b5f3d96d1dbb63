//! ==============================================================================
//! poller.rs - periodic bulk status reconciliation
//! ==============================================================================
//!
//! purpose:
//!     once per interval, fetch every sensor's coarse status from the
//!     controller, write it into the store and turn status flips into
//!     pothole / normal events.
//!
//! rules:
//!     - a failed or malformed fetch is dropped silently; the next tick retries.
//!     - the first status after Unknown never produces an event (startup grace).
//!     - ticks never overlap: the loop awaits each fetch, missed ticks are
//!       skipped, and a manual poll while one is outstanding is a no-op.
//!     - stop only prevents future ticks. a fetch already in flight finishes,
//!       but its result is thrown away once the loop has been cancelled.
//!
//! relationships:
//!     - reads: registry.rs (iteration order), connectivity.rs (gate)
//!     - writes: store.rs (apply_bulk_status), events.rs
//!
//! ==============================================================================

use crate::bulk::{BulkTransport, StatusSnapshot};
use crate::connectivity::ConnectivitySupervisor;
use crate::domain::{timestamp_ms, EventKind, SensorStatus};
use crate::events::EventLog;
use crate::monitor::MonitorObserver;
use crate::registry::SensorRegistry;
use crate::store::SensorStore;
use crate::wireless::WirelessLink;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// what a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// bulk channel not reachable, nothing attempted
    Gated,
    /// a previous fetch is still outstanding
    Skipped,
    /// transport failure or malformed body
    Failed,
    /// the loop was stopped while the fetch was in flight
    Discarded,
    Applied { transitions: usize },
}

struct PollTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct BulkPoller<B, W> {
    registry: Arc<SensorRegistry>,
    store: Arc<SensorStore>,
    events: Arc<EventLog>,
    bulk: Arc<B>,
    connectivity: Arc<ConnectivitySupervisor<B, W>>,
    observer: Arc<dyn MonitorObserver>,
    interval: Duration,
    busy: AtomicBool,
    task: Mutex<Option<PollTask>>,
}

/// clears the busy flag however the tick ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<B: BulkTransport, W: WirelessLink> BulkPoller<B, W> {
    pub fn new(
        registry: Arc<SensorRegistry>,
        store: Arc<SensorStore>,
        events: Arc<EventLog>,
        bulk: Arc<B>,
        connectivity: Arc<ConnectivitySupervisor<B, W>>,
        observer: Arc<dyn MonitorObserver>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            events,
            bulk,
            connectivity,
            observer,
            interval,
            busy: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// start (or restart) the poll loop; the first tick fires immediately
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            previous.token.cancel();
        }

        let token = CancellationToken::new();
        let poller = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poller.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let outcome = poller.tick(Some(&loop_token)).await;
                tracing::trace!(?outcome, "poll tick");
            }
            tracing::debug!("poll loop exited");
        });

        *task = Some(PollTask { token, handle });
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "started polling sensor states");
    }

    /// cancel future ticks; returns without waiting for an in-flight fetch
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.token.cancel();
            tracing::info!("stopped polling sensor states");
        }
    }

    /// cancel and wait for the loop task to finish
    pub async fn shutdown(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.token.cancel();
            if let Err(e) = task.handle.await {
                tracing::warn!("poll loop ended abnormally: {}", e);
            }
        }
    }

    /// run one tick outside the loop
    pub async fn poll_once(&self) -> PollOutcome {
        self.tick(None).await
    }

    async fn tick(&self, token: Option<&CancellationToken>) -> PollOutcome {
        if !self.connectivity.bulk_channel_reachable() {
            return PollOutcome::Gated;
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            return PollOutcome::Skipped;
        }
        let _busy = BusyGuard(&self.busy);

        let snapshot = match self.bulk.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // don't surface: a missed poll is expected noise
                tracing::debug!("error polling sensor states: {}", e);
                return PollOutcome::Failed;
            }
        };

        if token.is_some_and(|t| t.is_cancelled()) {
            tracing::debug!("polling stopped during fetch, discarding snapshot");
            return PollOutcome::Discarded;
        }

        PollOutcome::Applied { transitions: self.reconcile(&snapshot) }
    }

    /// merge a snapshot into the store, returning how many events were emitted
    pub fn reconcile(&self, snapshot: &StatusSnapshot) -> usize {
        let now = timestamp_ms();
        let mut transitions = 0;

        for sensor in self.registry.list_sensors() {
            let Some(&reported) = snapshot.get(&sensor.name) else {
                continue;
            };
            let previous = match self.store.apply_bulk_status(&sensor.name, reported, now) {
                Ok(previous) => previous,
                Err(e) => {
                    tracing::error!("registry and store disagree: {}", e);
                    continue;
                }
            };

            if previous == reported {
                continue;
            }
            tracing::debug!(sensor = %sensor.name, from = previous.as_str(), to = reported.as_str(), "status changed");
            if let Ok(state) = self.store.get(&sensor.name) {
                self.observer.sensor_updated(&sensor.name, &state);
            }
            if previous == SensorStatus::Unknown {
                continue;
            }

            match reported {
                SensorStatus::High => {
                    self.events.record(
                        format!("Pothole detected by sensor {}!", sensor.name),
                        EventKind::PotholeDetected,
                    );
                }
                SensorStatus::Low => {
                    self.events.record(
                        format!("Sensor {} returned to normal", sensor.name),
                        EventKind::NormalRestored,
                    );
                }
                SensorStatus::Unknown => continue,
            }
            transitions += 1;
        }

        transitions
    }
}
