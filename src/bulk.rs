//! ==============================================================================
//! bulk.rs - coarse status transport against the central controller
//! ==============================================================================
//!
//! purpose:
//!     one round trip returns every sensor's detection line state.
//!     the controller exposes:
//!     - GET {base}/status   any 2xx with a parseable json body = reachable
//!     - GET {base}/sensors  { "R1": { "status": "low" }, ... }
//!
//! relationships:
//!     - used by: poller.rs (fetch_snapshot), connectivity.rs (probe)
//!     - implemented by: HttpBulkClient (reqwest), fakes.rs (tests)
//!
//! ==============================================================================

use crate::config::BulkConfig;
use crate::domain::SensorStatus;
use crate::error::{MonitorError, MonitorResult};
use std::collections::HashMap;
use std::future::Future;

/// server-reported status per sensor name; names the controller omitted are absent
pub type StatusSnapshot = HashMap<String, SensorStatus>;

pub trait BulkTransport: Send + Sync + 'static {
    /// one reachability round trip; true only for a 2xx with a well-formed body
    fn probe(&self) -> impl Future<Output = bool> + Send;

    fn fetch_snapshot(&self) -> impl Future<Output = MonitorResult<StatusSnapshot>> + Send;
}

/// reqwest-backed client for the controller's http api
#[derive(Clone)]
pub struct HttpBulkClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBulkClient {
    pub fn new(config: &BulkConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, path: &str) -> MonitorResult<serde_json::Value> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| MonitorError::TransientNetwork(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MonitorError::TransientNetwork(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| MonitorError::TransientNetwork(format!("GET {url}: bad body: {e}")))
    }
}

impl BulkTransport for HttpBulkClient {
    async fn probe(&self) -> bool {
        match self.get_json("status").await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("controller probe failed: {}", e);
                false
            }
        }
    }

    async fn fetch_snapshot(&self) -> MonitorResult<StatusSnapshot> {
        let body = self.get_json("sensors").await?;
        parse_snapshot(&body)
    }
}

/// decode the /sensors body
///
/// the top level must be an object. entries whose value is not
/// `{ "status": "low" | "high" }` are dropped individually so one odd sensor
/// cannot hide the rest.
pub fn parse_snapshot(body: &serde_json::Value) -> MonitorResult<StatusSnapshot> {
    let object = body.as_object().ok_or_else(|| {
        MonitorError::TransientNetwork("sensors body is not a json object".to_string())
    })?;

    let mut snapshot = StatusSnapshot::with_capacity(object.len());
    for (name, entry) in object {
        let reported = entry.get("status").and_then(|s| s.as_str());
        match reported.and_then(SensorStatus::from_reported) {
            Some(status) => {
                snapshot.insert(name.clone(), status);
            }
            None => tracing::debug!(sensor = %name, "ignoring unrecognised status entry: {}", entry),
        }
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_snapshot() {
        let body = json!({
            "R1": { "status": "low" },
            "R2": { "status": "high" },
            "X7": { "status": "low" },
            "R4": { "status": "sideways" },
            "R5": 12
        });
        let snapshot = parse_snapshot(&body).unwrap();
        assert_eq!(snapshot.get("R1"), Some(&SensorStatus::Low));
        assert_eq!(snapshot.get("R2"), Some(&SensorStatus::High));
        assert_eq!(snapshot.get("X7"), Some(&SensorStatus::Low));
        assert!(!snapshot.contains_key("R4"));
        assert!(!snapshot.contains_key("R5"));
    }

    #[test]
    fn test_non_object_body_is_malformed() {
        assert!(matches!(
            parse_snapshot(&json!(["R1", "low"])),
            Err(MonitorError::TransientNetwork(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_controller_is_not_reachable() {
        let client = HttpBulkClient::new(&BulkConfig {
            // discard port, nothing listens there
            base_url: "http://127.0.0.1:9/api".to_string(),
            request_timeout_ms: 200,
            ..BulkConfig::default()
        })
        .unwrap();
        assert!(!client.probe().await);
        assert!(client.fetch_snapshot().await.is_err());
    }
}
