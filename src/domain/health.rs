//! Health report shared by stores and caches

use std::collections::BTreeMap;

use serde::Serialize;

/// Component health status
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Tagged health result: a status plus free-form details
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub details: BTreeMap<String, String>,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self::with_status(HealthStatus::Healthy)
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Degraded).with_detail("reason", reason.into())
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Unhealthy).with_detail("reason", reason.into())
    }

    fn with_status(status: HealthStatus) -> Self {
        Self {
            status,
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Folds a component report into this one under `name`; the worst status wins
    pub fn merge(mut self, name: &str, other: HealthReport) -> Self {
        self.status = self.status.max(other.status);
        self.details
            .insert(format!("{}.status", name), other.status.to_string());

        for (key, value) in other.details {
            self.details.insert(format!("{}.{}", name, key), value);
        }

        self
    }
}
