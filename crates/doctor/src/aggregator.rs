use chrono::Utc;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error};
use tracewarden_watchman::{ServiceState, Watchdog};

use crate::probe::{self, DirectoryProbes};
use crate::report::{HealthReport, HealthStatus};
use crate::verdict::{self, HealthSignals, NOT_RUNNING};

/// Computes health reports for one watchdog, with an optional cache in front.
pub struct HealthAggregator {
    watchdog: Arc<Watchdog>,
    cache_for: Duration,
    cached: Mutex<Option<(Instant, HealthReport)>>,
}

impl HealthAggregator {
    pub fn new(watchdog: Arc<Watchdog>) -> Self {
        let cache_for = watchdog.config().health_cache_duration();
        Self::with_cache_duration(watchdog, cache_for)
    }

    pub fn with_cache_duration(watchdog: Arc<Watchdog>, cache_for: Duration) -> Self {
        Self {
            watchdog,
            cache_for,
            cached: Mutex::new(None),
        }
    }

    /// Fresh report. Never fails: a check that errors or panics yields an
    /// `Unhealthy` report describing why.
    pub async fn check_health(&self) -> HealthReport {
        let started = Instant::now();
        let watchdog = self.watchdog.clone();

        match tokio::spawn(async move { compute(&watchdog).await }).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "🩺 Health check failed");
                HealthReport::check_failed(format!("Health check failed: {e}"), elapsed_ms(started))
            }
        }
    }

    /// Last report if younger than the cache duration, otherwise a fresh one.
    pub async fn cached_health(&self) -> HealthReport {
        let mut cached = self.cached.lock().await;
        if let Some((at, report)) = cached.as_ref() {
            if at.elapsed() < self.cache_for {
                debug!("🩺 Serving cached health report");
                return report.clone();
            }
        }

        let report = self.check_health().await;
        *cached = Some((Instant::now(), report.clone()));
        report
    }
}

async fn compute(watchdog: &Watchdog) -> HealthReport {
    let started = Instant::now();
    let config = watchdog.config();

    if !config.enabled {
        let running = watchdog.state() == ServiceState::Disabled;
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("enabled".to_string(), Value::Bool(false));
        diagnostics.insert("is_running".to_string(), Value::Bool(running));
        let (status, failure_reasons) = if running {
            (HealthStatus::Healthy, Vec::new())
        } else {
            (HealthStatus::Unhealthy, vec![NOT_RUNNING.to_string()])
        };
        return HealthReport {
            status,
            diagnostics,
            failure_reasons,
            computed_at: Utc::now(),
            duration_ms: elapsed_ms(started),
        };
    }

    let probes = probe::probe_directories(config).await;
    let metrics = watchdog.metrics();
    let pool = watchdog.pool_stats();
    let now = Utc::now();

    let last_activity = [
        metrics.last_dispatched_at,
        metrics.last_processed_at,
        watchdog.started_at(),
    ]
    .into_iter()
    .flatten()
    .max();
    let idle_for = last_activity.and_then(|at| (now - at).to_std().ok());

    let signals = HealthSignals {
        is_running: watchdog.is_running(),
        queue_size: watchdog.queue_len(),
        queue_capacity: watchdog.queue_capacity(),
        active_tasks: pool.active,
        idle_for,
        processed: metrics.processed_files,
        succeeded: metrics.successful_processing,
        monitors: watchdog.monitor_counts(),
        input: probes.input.clone(),
        archive: probes.archive.clone(),
    };
    let (status, failure_reasons) = verdict::evaluate(&signals);

    let since_last_processed = metrics
        .last_processed_at
        .and_then(|at| (now - at).to_std().ok())
        .map(|d| d.as_secs());

    let mut diagnostics = BTreeMap::new();
    let mut put = |key: &str, value: Value| {
        diagnostics.insert(key.to_string(), value);
    };
    put("enabled", json!(true));
    put("is_running", json!(signals.is_running));
    put("state", json!(watchdog.state()));
    put("watchers_total", json!(signals.monitors.total));
    put("watchers_active", json!(signals.monitors.active));
    put("queue_size", json!(signals.queue_size));
    put("queue_capacity", json!(signals.queue_capacity));
    put("queue_utilization", json!(signals.queue_utilization()));
    put("workers_active", json!(pool.active));
    put("workers_available", json!(pool.available));
    put("workers_total", json!(pool.total));
    put("processed", json!(metrics.processed_files));
    put("succeeded", json!(metrics.successful_processing));
    put("failed", json!(metrics.failed_processing));
    put("exceptions", json!(metrics.processing_exceptions));
    put("success_rate", json!(metrics.success_rate()));
    put("dropped", json!(metrics.dropped_files));
    put("missing", json!(metrics.missing_files));
    put("dead_lettered", json!(metrics.dead_lettered_files));
    put("watcher_errors", json!(metrics.watcher_errors));
    put("filesystem_errors", json!(metrics.filesystem_errors));
    put("average_response_ms", json!(metrics.average_response_time_ms()));
    put("last_processed_at", json!(metrics.last_processed_at));
    put("seconds_since_last_processed", json!(since_last_processed));
    put_probes(&mut put, &probes);
    put("monitors", json!(watchdog.monitor_states()));

    HealthReport {
        status,
        diagnostics,
        failure_reasons,
        computed_at: now,
        duration_ms: elapsed_ms(started),
    }
}

fn put_probes(put: &mut impl FnMut(&str, Value), probes: &DirectoryProbes) {
    put("input_directory", json!(probes.input.path));
    put("input_readable", json!(probes.input.ok));
    put("archive_directory", json!(probes.archive.path));
    put("archive_writable", json!(probes.archive.ok));
    if let Some(error) = &probes.input.error {
        put("input_probe_error", json!(error));
    }
    if let Some(error) = &probes.archive.error {
        put("archive_probe_error", json!(error));
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
