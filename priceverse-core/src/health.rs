//! Health reporting vocabulary
//!
//! Components report a status plus named checks; the probe folds them with
//! "unhealthy if any fail, else degraded if any warn, else healthy".

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Worst-of fold over component statuses
    pub fn combine<I: IntoIterator<Item = HealthStatus>>(statuses: I) -> HealthStatus {
        let mut worst = HealthStatus::Healthy;
        for status in statuses {
            worst = match (worst, status) {
                (_, HealthStatus::Unhealthy) | (HealthStatus::Unhealthy, _) => {
                    HealthStatus::Unhealthy
                }
                (_, HealthStatus::Degraded) | (HealthStatus::Degraded, _) => HealthStatus::Degraded,
                _ => HealthStatus::Healthy,
            };
        }
        worst
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// A single named check inside a component report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: HealthStatus,
    #[serde(rename = "latency", skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms: None,
            message: None,
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            latency_ms: None,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// A component's full health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, CheckResult>,
}

impl ComponentHealth {
    /// Build a report whose status is the worst of its checks
    pub fn from_checks(checks: BTreeMap<String, CheckResult>) -> Self {
        let status = HealthStatus::combine(checks.values().map(|c| c.status));
        Self { status, checks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_worst_of() {
        use HealthStatus::*;
        assert_eq!(HealthStatus::combine([Healthy, Healthy]), Healthy);
        assert_eq!(HealthStatus::combine([Healthy, Degraded]), Degraded);
        assert_eq!(HealthStatus::combine([Degraded, Unhealthy, Healthy]), Unhealthy);
        assert_eq!(HealthStatus::combine([]), Healthy);
    }

    #[test]
    fn test_from_checks() {
        let mut checks = BTreeMap::new();
        checks.insert("socket".to_string(), CheckResult::healthy());
        checks.insert("feed".to_string(), CheckResult::degraded("no trades for 90s"));
        let report = ComponentHealth::from_checks(checks);
        assert_eq!(report.status, HealthStatus::Degraded);
    }
}
