//! Health probe
//!
//! Samples every registered component plus the database and cache, folding
//! the reports with "unhealthy if any fail, else degraded if any warn".

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use priceverse_core::{CheckResult, ComponentHealth, HealthStatus};

use crate::price_bus::PriceBus;
use crate::repo::Database;

type HealthFn = Arc<dyn Fn() -> ComponentHealth + Send + Sync>;

/// Aggregated system report served by the health RPC
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "uptime")]
    pub uptime_secs: u64,
    pub version: String,
    pub checks: BTreeMap<String, CheckResult>,
    #[serde(rename = "latency")]
    pub latency_ms: u64,
}

pub struct HealthProbe {
    components: parking_lot::Mutex<Vec<(String, HealthFn)>>,
    db: Option<Arc<Database>>,
    bus: Option<Arc<dyn PriceBus>>,
    started_at: Instant,
}

impl HealthProbe {
    pub fn new(db: Option<Arc<Database>>, bus: Option<Arc<dyn PriceBus>>) -> Self {
        Self {
            components: parking_lot::Mutex::new(Vec::new()),
            db,
            bus,
            started_at: Instant::now(),
        }
    }

    /// Register a component sampler under a stable name
    pub fn register<F>(&self, name: &str, sample: F)
    where
        F: Fn() -> ComponentHealth + Send + Sync + 'static,
    {
        self.components
            .lock()
            .push((name.to_string(), Arc::new(sample)));
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Run every check and fold the worst status
    pub async fn check(&self) -> SystemHealth {
        let started = Instant::now();
        let mut checks: BTreeMap<String, CheckResult> = BTreeMap::new();

        let samplers: Vec<(String, HealthFn)> = self.components.lock().clone();
        for (name, sample) in samplers {
            checks.insert(name, flatten(sample()));
        }

        if let Some(db) = &self.db {
            let check = match db.ping() {
                Ok(latency_ms) => CheckResult::healthy().with_latency(latency_ms),
                Err(e) => CheckResult::unhealthy(e.to_string()),
            };
            checks.insert("database".to_string(), check);
        }

        if let Some(bus) = &self.bus {
            let probe_start = Instant::now();
            let check = match bus.ping().await {
                Ok(()) => CheckResult::healthy()
                    .with_latency(probe_start.elapsed().as_millis() as u64),
                Err(e) => CheckResult::unhealthy(e.to_string()),
            };
            checks.insert("cache".to_string(), check);
        }

        let status = HealthStatus::combine(checks.values().map(|c| c.status));
        SystemHealth {
            status,
            timestamp: Utc::now(),
            uptime_secs: self.uptime_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Collapse a component's named checks into one summary entry
fn flatten(report: ComponentHealth) -> CheckResult {
    let messages: Vec<String> = report
        .checks
        .values()
        .filter(|c| c.status != HealthStatus::Healthy)
        .filter_map(|c| c.message.clone())
        .collect();
    CheckResult {
        status: report.status,
        latency_ms: None,
        message: (!messages.is_empty()).then(|| messages.join("; ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn component(status: HealthStatus, message: &str) -> ComponentHealth {
        let mut checks = Map::new();
        let check = match status {
            HealthStatus::Healthy => CheckResult::healthy(),
            HealthStatus::Degraded => CheckResult::degraded(message),
            HealthStatus::Unhealthy => CheckResult::unhealthy(message),
        };
        checks.insert("main".to_string(), check);
        ComponentHealth::from_checks(checks)
    }

    #[tokio::test]
    async fn test_worst_status_wins() {
        let probe = HealthProbe::new(None, None);
        probe.register("a", || component(HealthStatus::Healthy, ""));
        probe.register("b", || component(HealthStatus::Degraded, "slow feed"));

        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.checks["b"].message.as_deref(), Some("slow feed"));

        probe.register("c", || component(HealthStatus::Unhealthy, "down"));
        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_database_check_included() {
        let db = Database::open_in_memory().unwrap();
        let probe = HealthProbe::new(Some(db), None);
        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.checks.contains_key("database"));
        assert!(report.checks["database"].latency_ms.is_some());
    }
}
