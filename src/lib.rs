//! ==============================================================================
//! lib.rs - pothole monitor core
//! ==============================================================================
//!
//! purpose:
//!     keeps a live picture of every road sensor by combining two channels:
//!     - bulk: the controller's /sensors snapshot, polled once a second
//!     - wireless: on-demand BLE sessions with a single sensor node
//!
//! layout:
//!     config, registry, domain, error     static data and shared types
//!     store, events                       shared mutable state
//!     bulk, wireless, ble                 transports
//!     connectivity, poller, session       the three active components
//!     monitor                             context object + observer
//!     dashboard                           axum json api
//!
//! ==============================================================================

pub mod ble;
pub mod bulk;
pub mod config;
pub mod connectivity;
pub mod dashboard;
pub mod domain;
pub mod error;
pub mod events;
pub mod monitor;
pub mod poller;
pub mod registry;
pub mod session;
pub mod store;
pub mod wireless;

#[cfg(test)]
mod fakes;

pub use error::{MonitorError, MonitorResult};
pub use monitor::{Monitor, MonitorObserver, NoopObserver};
