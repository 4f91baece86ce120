use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthStatus::Healthy => "Healthy",
            HealthStatus::Degraded => "Degraded",
            HealthStatus::Unhealthy => "Unhealthy",
        };
        f.write_str(label)
    }
}

/// Result of one health check. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub diagnostics: BTreeMap<String, Value>,
    pub failure_reasons: Vec<String>,
    pub computed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl HealthReport {
    /// Report for a check that could not run to completion.
    pub fn check_failed(reason: String, duration_ms: u64) -> Self {
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("check_error".to_string(), Value::String(reason.clone()));
        Self {
            status: HealthStatus::Unhealthy,
            diagnostics,
            failure_reasons: vec![reason],
            computed_at: Utc::now(),
            duration_ms,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// One-line summary for periodic logging.
    pub fn summary(&self) -> String {
        if self.failure_reasons.is_empty() {
            format!("{} ({}ms)", self.status, self.duration_ms)
        } else {
            format!(
                "{} ({}ms): {}",
                self.status,
                self.duration_ms,
                self.failure_reasons.join("; ")
            )
        }
    }
}
