//! HealthService@1.0.0

use serde_json::{json, Value};
use std::sync::Arc;

use priceverse_core::{CoreError, CoreResult, HealthStatus};
use priceverse_services::HealthProbe;

pub struct HealthService {
    probe: Arc<HealthProbe>,
}

impl HealthService {
    pub fn new(probe: Arc<HealthProbe>) -> Self {
        Self { probe }
    }

    pub async fn dispatch(&self, method: &str, _input: Value) -> CoreResult<Value> {
        match method {
            "check" => self.check().await,
            "live" => Ok(json!({"status": "up"})),
            "ready" => self.ready().await,
            other => Err(CoreError::invalid_params(format!(
                "unknown HealthService method: {other}"
            ))),
        }
    }

    pub async fn check(&self) -> CoreResult<Value> {
        let report = self.probe.check().await;
        serde_json::to_value(&report).map_err(|e| CoreError::internal(e.to_string()))
    }

    async fn ready(&self) -> CoreResult<Value> {
        let report = self.probe.check().await;
        match report.status {
            HealthStatus::Unhealthy => Ok(json!({
                "status": "down",
                "message": "one or more components are unhealthy",
            })),
            _ => Ok(json!({"status": "up", "message": "ready"})),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use priceverse_core::{CheckResult, ComponentHealth};
    use std::collections::BTreeMap;

    fn probe_with(status: HealthStatus) -> Arc<HealthProbe> {
        let probe = Arc::new(HealthProbe::new(None, None));
        probe.register("component", move || {
            let mut checks = BTreeMap::new();
            let check = match status {
                HealthStatus::Healthy => CheckResult::healthy(),
                HealthStatus::Degraded => CheckResult::degraded("warn"),
                HealthStatus::Unhealthy => CheckResult::unhealthy("fail"),
            };
            checks.insert("main".to_string(), check);
            ComponentHealth::from_checks(checks)
        });
        probe
    }

    #[tokio::test]
    async fn test_check_shape() {
        let service = HealthService::new(probe_with(HealthStatus::Healthy));
        let result = service.dispatch("check", Value::Null).await.unwrap();
        assert_eq!(result["status"], "healthy");
        assert!(result["checks"]["component"].is_object());
        assert!(result["version"].is_string());
    }

    #[tokio::test]
    async fn test_live_is_unconditional() {
        let service = HealthService::new(probe_with(HealthStatus::Unhealthy));
        let result = service.dispatch("live", Value::Null).await.unwrap();
        assert_eq!(result["status"], "up");
    }

    #[tokio::test]
    async fn test_ready_tracks_health() {
        let service = HealthService::new(probe_with(HealthStatus::Degraded));
        let result = service.dispatch("ready", Value::Null).await.unwrap();
        assert_eq!(result["status"], "up");

        let service = HealthService::new(probe_with(HealthStatus::Unhealthy));
        let result = service.dispatch("ready", Value::Null).await.unwrap();
        assert_eq!(result["status"], "down");
    }
}
