//! ==============================================================================
//! main.rs - pothole monitor entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the real transports into a Monitor and serves it over http.
//!
//! responsibilities:
//!     - load configuration and set up logging
//!     - build the reqwest bulk client and the btleplug wireless link
//!     - probe connectivity once, then keep probing in the background
//!       (polling starts and stops with the controller's reachability)
//!     - serve the json dashboard until ctrl-c, then shut down cleanly
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                        monitor (lib)                          │
//!     │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐   │
//!     │  │ connectivity │──>│ bulk poller  │   │ session channel  │   │
//!     │  │  (5s probe)  │   │ (1s cycle)   │   │ (on demand)      │   │
//!     │  └──────┬───────┘   └──────┬───────┘   └────────┬─────────┘   │
//!     │         │                  └─────> store <──────┘             │
//!     │         │                          events                     │
//!     └─────────┼──────────────────────────────┬──────────────────────┘
//!               │ http (reqwest)               │ ble (btleplug)
//!        ┌──────┴───────┐               ┌──────┴───────┐
//!        │  controller  │               │ sensor nodes │
//!        │ /status      │               │ NanoTFluna-* │
//!        │ /sensors     │               └──────────────┘
//!        └──────────────┘
//!
//! ==============================================================================

use anyhow::Result;
use pothole_monitor::ble::BleLink;
use pothole_monitor::bulk::HttpBulkClient;
use pothole_monitor::config::MonitorConfig;
use pothole_monitor::dashboard;
use pothole_monitor::domain::EventKind;
use pothole_monitor::{Monitor, MonitorObserver};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};

// ==============================================================================
// observer
// ==============================================================================
// no ui in this process: operator notices go to the log.

struct LogObserver;

impl MonitorObserver for LogObserver {
    fn message(&self, text: &str, kind: EventKind) {
        match kind {
            EventKind::Error => tracing::warn!("{}", text),
            _ => tracing::info!("{}", text),
        }
    }
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: logging first, so config loading is visible
    let filter = init_logging();

    println!("===========================================================");
    println!("  Pothole Monitor");
    println!("  bulk polling + on-demand BLE sessions");
    println!("===========================================================");

    // step 2: configuration (RUST_LOG wins over logging.level)
    let config = MonitorConfig::load_or_default();
    if std::env::var_os("RUST_LOG").is_none() {
        match EnvFilter::try_new(&config.logging.level) {
            Ok(level) => {
                if let Err(e) = filter.reload(level) {
                    tracing::warn!("failed to apply log level: {}", e);
                }
            }
            Err(e) => tracing::warn!(level = %config.logging.level, "invalid log level: {}", e),
        }
    }
    config.print_summary();

    // step 3: transports
    let bulk = HttpBulkClient::new(&config.bulk)?;
    let link = BleLink::new(&config.wireless).await?;

    // step 4: the monitor and its background tasks
    let monitor = Arc::new(Monitor::new(&config, bulk, link, Arc::new(LogObserver)));
    let state = monitor.check_connectivity().await;
    if state.bulk_channel_reachable {
        tracing::info!("connected to controller at {}", config.bulk.base_url);
    } else {
        tracing::warn!("controller unreachable at {}, will keep probing", config.bulk.base_url);
    }
    if !state.wireless_capability_available {
        tracing::warn!("bluetooth unavailable: live sensor reads are disabled");
    }
    monitor.start_connectivity_monitoring(config.bulk.probe_interval());

    // step 5: serve until ctrl-c
    let served = dashboard::serve(monitor.clone(), &config.dashboard.bind, shutdown_signal()).await;

    monitor.shutdown().await;
    served
}

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

fn init_logging() -> FilterHandle {
    let initial = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(initial);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
    handle
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
