//! ==============================================================================
//! dashboard.rs - json api over the monitor
//! ==============================================================================
//!
//! purpose:
//!     thin http surface for whatever ui sits in front of the monitor.
//!     every handler maps 1:1 onto a Monitor operation; no logic lives here.
//!
//! routes:
//!     GET    /api/sensors                     registry + current state
//!     GET    /api/sensors/:name               one sensor, with session phase
//!     POST   /api/sensors/:name/read          live read over the wireless link
//!     POST   /api/sensors/:name/zero          distance to use as the new zero
//!     POST   /api/sensors/:name/calibration   {"zero": "..", "threshold": ".."}
//!     GET    /api/events                      newest first
//!     DELETE /api/events
//!     GET    /api/connectivity
//!     POST   /api/connectivity                re-probe (starts/stops polling)
//!     POST   /api/polling/start
//!     POST   /api/polling/stop
//!
//! ==============================================================================

use crate::bulk::BulkTransport;
use crate::domain::{ConnectivityState, Event, SensorState};
use crate::error::MonitorError;
use crate::monitor::Monitor;
use crate::registry::SensorDescriptor;
use crate::session::SessionPhase;
use crate::wireless::WirelessLink;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

type Shared<B, W> = State<Arc<Monitor<B, W>>>;

// ==============================================================================
// payloads
// ==============================================================================

#[derive(Serialize)]
pub struct SensorView {
    #[serde(flatten)]
    pub sensor: SensorDescriptor,
    pub state: SensorState,
}

#[derive(Serialize)]
pub struct SensorDetail {
    #[serde(flatten)]
    pub view: SensorView,
    pub session: SessionPhase,
}

/// operator text, exactly as typed; blank fields are left unchanged
#[derive(Debug, Default, Deserialize)]
pub struct CalibrationRequest {
    pub zero: Option<String>,
    pub threshold: Option<String>,
}

/// error body: {"status": "error", "message": "..."}
pub struct ApiError(MonitorError);

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            MonitorError::UnknownSensor(_) => StatusCode::NOT_FOUND,
            MonitorError::InvalidCalibrationInput(_) => StatusCode::BAD_REQUEST,
            MonitorError::SessionBusy(_) => StatusCode::CONFLICT,
            MonitorError::CapabilityUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            MonitorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "status": "error", "message": self.0.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

// ==============================================================================
// router
// ==============================================================================

pub fn router<B: BulkTransport, W: WirelessLink>(monitor: Arc<Monitor<B, W>>) -> Router {
    Router::new()
        .route("/api/sensors", get(list_sensors::<B, W>))
        .route("/api/sensors/:name", get(get_sensor::<B, W>))
        .route("/api/sensors/:name/read", post(read_sensor::<B, W>))
        .route("/api/sensors/:name/zero", post(zero_sensor::<B, W>))
        .route("/api/sensors/:name/calibration", post(write_calibration::<B, W>))
        .route("/api/events", get(list_events::<B, W>).delete(clear_events::<B, W>))
        .route("/api/connectivity", get(connectivity::<B, W>).post(check_connectivity::<B, W>))
        .route("/api/polling/start", post(start_polling::<B, W>))
        .route("/api/polling/stop", post(stop_polling::<B, W>))
        .layer(CorsLayer::permissive())
        .with_state(monitor)
}

/// bind and serve until `shutdown` resolves
pub async fn serve<B, W, F>(monitor: Arc<Monitor<B, W>>, bind: &str, shutdown: F) -> Result<()>
where
    B: BulkTransport,
    W: WirelessLink,
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind dashboard to {}", bind))?;
    tracing::info!("dashboard live at http://{}", bind);
    axum::serve(listener, router(monitor))
        .with_graceful_shutdown(shutdown)
        .await
        .context("dashboard server error")?;
    Ok(())
}

// ==============================================================================
// handlers
// ==============================================================================

async fn list_sensors<B: BulkTransport, W: WirelessLink>(
    State(monitor): Shared<B, W>,
) -> Result<Json<Vec<SensorView>>, ApiError> {
    let views = monitor
        .list_sensors()
        .iter()
        .map(|sensor| {
            Ok(SensorView {
                sensor: sensor.clone(),
                state: monitor.get_sensor_state(&sensor.name)?,
            })
        })
        .collect::<Result<Vec<_>, MonitorError>>()?;
    Ok(Json(views))
}

async fn get_sensor<B: BulkTransport, W: WirelessLink>(
    State(monitor): Shared<B, W>,
    Path(name): Path<String>,
) -> Result<Json<SensorDetail>, ApiError> {
    let sensor = monitor
        .list_sensors()
        .iter()
        .find(|s| s.name == name)
        .cloned()
        .ok_or_else(|| MonitorError::UnknownSensor(name.clone()))?;
    Ok(Json(SensorDetail {
        view: SensorView { sensor, state: monitor.get_sensor_state(&name)? },
        session: monitor.session_phase(&name)?,
    }))
}

async fn read_sensor<B: BulkTransport, W: WirelessLink>(
    State(monitor): Shared<B, W>,
    Path(name): Path<String>,
) -> Result<Json<SensorState>, ApiError> {
    Ok(Json(monitor.read_sensor(&name).await?))
}

async fn zero_sensor<B: BulkTransport, W: WirelessLink>(
    State(monitor): Shared<B, W>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let zero = monitor.zero_from_current_reading(&name).await?;
    Ok(Json(serde_json::json!({ "zero": zero })))
}

async fn write_calibration<B: BulkTransport, W: WirelessLink>(
    State(monitor): Shared<B, W>,
    Path(name): Path<String>,
    Json(request): Json<CalibrationRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let configured = monitor
        .write_calibration_input(&name, request.zero.as_deref(), request.threshold.as_deref())
        .await?;
    let status = if configured { "ok" } else { "error" };
    Ok(Json(serde_json::json!({ "status": status, "configured": configured })))
}

async fn list_events<B: BulkTransport, W: WirelessLink>(State(monitor): Shared<B, W>) -> Json<Vec<Event>> {
    Json(monitor.get_events())
}

async fn clear_events<B: BulkTransport, W: WirelessLink>(State(monitor): Shared<B, W>) -> StatusCode {
    monitor.clear_events();
    StatusCode::NO_CONTENT
}

async fn connectivity<B: BulkTransport, W: WirelessLink>(State(monitor): Shared<B, W>) -> Json<ConnectivityState> {
    Json(monitor.connectivity())
}

async fn check_connectivity<B: BulkTransport, W: WirelessLink>(
    State(monitor): Shared<B, W>,
) -> Json<ConnectivityState> {
    Json(monitor.check_connectivity().await)
}

async fn start_polling<B: BulkTransport, W: WirelessLink>(State(monitor): Shared<B, W>) -> Json<serde_json::Value> {
    monitor.start_polling();
    Json(serde_json::json!({ "status": "ok", "polling": true }))
}

async fn stop_polling<B: BulkTransport, W: WirelessLink>(State(monitor): Shared<B, W>) -> Json<serde_json::Value> {
    monitor.stop_polling();
    Json(serde_json::json!({ "status": "ok", "polling": false }))
}
