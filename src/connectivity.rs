//! ==============================================================================
//! connectivity.rs - reachability of both acquisition channels
//! ==============================================================================
//!
//! purpose:
//!     answers "may we poll?" and "may we open a device session?".
//!     the poller and the session channel re-check these flags before every
//!     action; stored sensor state stays readable regardless.
//!
//! ==============================================================================

use crate::bulk::BulkTransport;
use crate::domain::ConnectivityState;
use crate::monitor::MonitorObserver;
use crate::wireless::WirelessLink;

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ConnectivitySupervisor<B, W> {
    bulk: Arc<B>,
    wireless: Arc<W>,
    state: RwLock<ConnectivityState>,
    observer: Arc<dyn MonitorObserver>,
    monitoring: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl<B: BulkTransport, W: WirelessLink> ConnectivitySupervisor<B, W> {
    pub fn new(bulk: Arc<B>, wireless: Arc<W>, observer: Arc<dyn MonitorObserver>) -> Self {
        Self {
            bulk,
            wireless,
            state: RwLock::new(ConnectivityState::default()),
            observer,
            monitoring: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.read()
    }

    pub fn bulk_channel_reachable(&self) -> bool {
        self.state.read().bulk_channel_reachable
    }

    /// one request/response against the controller; never fails, only reports
    pub async fn probe_bulk_channel(&self) -> bool {
        let reachable = self.bulk.probe().await;
        self.update(|s| s.bulk_channel_reachable = reachable);
        reachable
    }

    pub fn detect_wireless_capability(&self) -> bool {
        let available = self.wireless.is_available();
        self.update(|s| s.wireless_capability_available = available);
        available
    }

    fn update(&self, apply: impl FnOnce(&mut ConnectivityState)) {
        let (before, after) = {
            let mut state = self.state.write();
            let before = *state;
            apply(&mut state);
            (before, *state)
        };
        if before != after {
            tracing::info!(
                bulk = after.bulk_channel_reachable,
                wireless = after.wireless_capability_available,
                "connectivity changed"
            );
            self.observer.connectivity_changed(after);
        }
    }

    /// probe both channels every `interval` until stopped
    ///
    /// restarting replaces the previous monitor. `on_status_change` fires
    /// only when the combined state differs from the previous probe.
    pub fn start_monitoring<F>(self: &Arc<Self>, interval: Duration, on_status_change: F)
    where
        F: Fn(ConnectivityState) + Send + Sync + 'static,
    {
        if let Some((previous, _)) = self.monitoring.lock().take() {
            previous.cancel();
        }

        let token = CancellationToken::new();
        let supervisor = Arc::clone(self);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last: Option<ConnectivityState> = None;
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                supervisor.probe_bulk_channel().await;
                supervisor.detect_wireless_capability();
                if task_token.is_cancelled() {
                    break;
                }
                let current = supervisor.state();
                if last != Some(current) {
                    on_status_change(current);
                    last = Some(current);
                }
            }
        });

        *self.monitoring.lock() = Some((token, handle));
    }

    /// cancel the monitor and wait for it to exit, so no status callback
    /// can fire after this returns
    pub async fn stop_monitoring(&self) {
        let monitoring = self.monitoring.lock().take();
        if let Some((token, handle)) = monitoring {
            token.cancel();
            if let Err(e) = handle.await {
                tracing::warn!("connectivity monitor ended abnormally: {}", e);
            }
        }
    }
}
