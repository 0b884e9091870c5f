//! Alert manager
//!
//! A periodic scan turns pipeline state into alerts: a long-disconnected
//! collector warns, a failing aggregator is critical, an unhealthy fiat
//! source warns. Each alert is idempotent per id while active; when the
//! condition clears, a resolution notice is sent and the alert leaves the
//! active set. Delivery goes to a webhook sink and failures are logged,
//! never fatal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

use priceverse_core::{AlertsConfig, HealthStatus};
use priceverse_venues::CollectorStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub severity: AlertSeverity,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Everything the 30-second scan looks at
#[derive(Debug, Clone, Default)]
pub struct AlertScanInputs {
    pub collectors: Vec<CollectorStats>,
    pub aggregator_consecutive_errors: u32,
    pub fiat_status: Option<HealthStatus>,
}

/// Delivery seam; the production sink POSTs a webhook
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, payload: serde_json::Value);
}

pub struct WebhookSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, payload: serde_json::Value) {
        if let Err(e) = self.http.post(&self.url).json(&payload).send().await {
            warn!("[Alerts] webhook delivery failed: {}", e);
        }
    }
}

/// Log-only sink for deployments without a webhook
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn deliver(&self, payload: serde_json::Value) {
        info!("[Alerts] {}", payload);
    }
}

/// Captures payloads for tests
#[derive(Default)]
pub struct MemorySink {
    pub delivered: Mutex<Vec<serde_json::Value>>,
}

#[async_trait]
impl AlertSink for MemorySink {
    async fn deliver(&self, payload: serde_json::Value) {
        self.delivered.lock().push(payload);
    }
}

pub struct AlertManager {
    config: AlertsConfig,
    sink: Box<dyn AlertSink>,
    environment: String,
    active: Mutex<HashMap<String, Alert>>,
}

impl AlertManager {
    pub fn new(config: AlertsConfig, sink: Box<dyn AlertSink>, environment: impl Into<String>) -> Self {
        Self {
            config,
            sink,
            environment: environment.into(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.active.lock().keys().cloned().collect()
    }

    /// Evaluate the scan inputs, firing new alerts and resolving cleared ones
    pub async fn scan(&self, inputs: &AlertScanInputs) {
        if !self.config.enabled {
            return;
        }

        let disconnect_bound = self.config.thresholds.collector_disconnect_secs as i64;
        for stats in &inputs.collectors {
            let alert_id = format!("collector-disconnected-{}", stats.venue);
            let down_for = stats
                .disconnected_since
                .map(|since| Utc::now().signed_duration_since(since).num_seconds());
            match down_for {
                Some(secs) if !stats.connected && secs > disconnect_bound => {
                    self.fire(Alert {
                        id: alert_id,
                        severity: AlertSeverity::Warning,
                        alert_type: "collector_disconnected".to_string(),
                        message: format!("{} disconnected for {}s", stats.venue, secs),
                        timestamp: Utc::now(),
                        metadata: json!({"venue": stats.venue, "down_seconds": secs}),
                    })
                    .await;
                }
                _ => self.resolve(&alert_id).await,
            }
        }

        let error_bound = self.config.thresholds.aggregator_consecutive_errors;
        let aggregator_id = "aggregator-consecutive-errors".to_string();
        if inputs.aggregator_consecutive_errors >= error_bound {
            self.fire(Alert {
                id: aggregator_id,
                severity: AlertSeverity::Critical,
                alert_type: "aggregator_errors".to_string(),
                message: format!(
                    "stream aggregator at {} consecutive errors",
                    inputs.aggregator_consecutive_errors
                ),
                timestamp: Utc::now(),
                metadata: json!({"consecutive_errors": inputs.aggregator_consecutive_errors}),
            })
            .await;
        } else {
            self.resolve(&aggregator_id).await;
        }

        let fiat_id = "fiat-rate-unhealthy".to_string();
        if inputs.fiat_status == Some(HealthStatus::Unhealthy) {
            self.fire(Alert {
                id: fiat_id,
                severity: AlertSeverity::Warning,
                alert_type: "fiat_rate".to_string(),
                message: "fiat rate source unhealthy".to_string(),
                timestamp: Utc::now(),
                metadata: json!({}),
            })
            .await;
        } else {
            self.resolve(&fiat_id).await;
        }
    }

    /// Fire once per id; re-firing while active is a no-op
    async fn fire(&self, alert: Alert) {
        {
            let mut active = self.active.lock();
            if active.contains_key(&alert.id) {
                return;
            }
            active.insert(alert.id.clone(), alert.clone());
        }
        info!("[Alerts] firing {} ({:?})", alert.id, alert.severity);
        self.sink.deliver(self.payload(&alert, false)).await;
    }

    /// Send the resolution notice and drop the alert from the active set
    async fn resolve(&self, alert_id: &str) {
        let alert = self.active.lock().remove(alert_id);
        if let Some(alert) = alert {
            info!("[Alerts] resolved {}", alert_id);
            self.sink.deliver(self.payload(&alert, true)).await;
        }
    }

    fn payload(&self, alert: &Alert, resolved: bool) -> serde_json::Value {
        json!({
            "id": alert.id,
            "severity": alert.severity,
            "type": if resolved { "resolution" } else { alert.alert_type.as_str() },
            "message": if resolved {
                format!("resolved: {}", alert.message)
            } else {
                alert.message.clone()
            },
            "timestamp": Utc::now(),
            "metadata": alert.metadata,
            "service": "priceverse",
            "environment": self.environment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    fn collector_stats(venue: &str, connected: bool, down_secs: i64) -> CollectorStats {
        CollectorStats {
            venue: venue.to_string(),
            connected,
            trades_received: 0,
            error_count: 0,
            last_trade_wallclock: None,
            reconnect_attempts: 0,
            disconnected_since: (!connected)
                .then(|| Utc::now() - ChronoDuration::seconds(down_secs)),
        }
    }

    struct SharedSink(Arc<MemorySink>);

    #[async_trait]
    impl AlertSink for SharedSink {
        async fn deliver(&self, payload: serde_json::Value) {
            self.0.deliver(payload).await;
        }
    }

    fn manager(sink: Arc<MemorySink>) -> AlertManager {
        AlertManager::new(AlertsConfig::default(), Box::new(SharedSink(sink)), "test")
    }

    #[tokio::test]
    async fn test_disconnected_collector_fires_once() {
        let sink = Arc::new(MemorySink::default());
        let manager = manager(sink.clone());
        let inputs = AlertScanInputs {
            collectors: vec![collector_stats("binance", false, 400)],
            ..Default::default()
        };

        manager.scan(&inputs).await;
        manager.scan(&inputs).await;
        manager.scan(&inputs).await;

        let delivered = sink.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0]["severity"], "warning");
        assert_eq!(delivered[0]["service"], "priceverse");
        assert_eq!(delivered[0]["id"], "collector-disconnected-binance");
    }

    #[tokio::test]
    async fn test_resolution_sent_when_condition_clears() {
        let sink = Arc::new(MemorySink::default());
        let manager = manager(sink.clone());

        manager
            .scan(&AlertScanInputs {
                collectors: vec![collector_stats("kraken", false, 400)],
                ..Default::default()
            })
            .await;
        manager
            .scan(&AlertScanInputs {
                collectors: vec![collector_stats("kraken", true, 0)],
                ..Default::default()
            })
            .await;

        let delivered = sink.delivered.lock();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[1]["type"], "resolution");
        assert!(manager.active_ids().is_empty());
    }

    #[tokio::test]
    async fn test_aggregator_errors_critical() {
        let sink = Arc::new(MemorySink::default());
        let manager = manager(sink.clone());
        manager
            .scan(&AlertScanInputs {
                aggregator_consecutive_errors: 5,
                ..Default::default()
            })
            .await;
        let delivered = sink.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0]["severity"], "critical");
    }

    #[tokio::test]
    async fn test_short_disconnect_not_alerted() {
        let sink = Arc::new(MemorySink::default());
        let manager = manager(sink.clone());
        manager
            .scan(&AlertScanInputs {
                collectors: vec![collector_stats("okx", false, 60)],
                ..Default::default()
            })
            .await;
        assert!(sink.delivered.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fiat_unhealthy_warns() {
        let sink = Arc::new(MemorySink::default());
        let manager = manager(sink.clone());
        manager
            .scan(&AlertScanInputs {
                fiat_status: Some(HealthStatus::Unhealthy),
                ..Default::default()
            })
            .await;
        manager
            .scan(&AlertScanInputs {
                fiat_status: Some(HealthStatus::Healthy),
                ..Default::default()
            })
            .await;
        let delivered = sink.delivered.lock();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0]["type"], "fiat_rate");
        assert_eq!(delivered[1]["type"], "resolution");
    }
}
