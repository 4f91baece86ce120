//! Tri-state verdict over the raw health signals.
//!
//! Unhealthy conditions are checked first; degraded conditions only matter
//! when nothing is unhealthy, but every triggered reason is reported.

use std::time::Duration;
use tracewarden_watchman::MonitorCounts;

use crate::probe::ProbeResult;
use crate::report::HealthStatus;

pub const QUEUE_UNHEALTHY_RATIO: f64 = 0.90;
pub const QUEUE_DEGRADED_RATIO: f64 = 0.70;
pub const STALL_THRESHOLD: Duration = Duration::from_secs(5 * 60);
pub const MIN_SUCCESS_RATE: f64 = 0.50;
/// Success rate is ignored below this many processed files.
pub const MIN_SAMPLE: u64 = 10;

pub const NOT_RUNNING: &str = "Service is not running";

/// Everything the verdict depends on, gathered up front.
#[derive(Debug, Clone)]
pub struct HealthSignals {
    pub is_running: bool,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub active_tasks: usize,
    /// Time since the last dispatch, completion or service start, whichever is latest.
    pub idle_for: Option<Duration>,
    pub processed: u64,
    pub succeeded: u64,
    pub monitors: MonitorCounts,
    pub input: ProbeResult,
    pub archive: ProbeResult,
}

impl HealthSignals {
    pub fn queue_utilization(&self) -> f64 {
        if self.queue_capacity == 0 {
            return 1.0;
        }
        self.queue_size as f64 / self.queue_capacity as f64
    }

    pub fn success_rate(&self) -> Option<f64> {
        if self.processed == 0 {
            None
        } else {
            Some(self.succeeded as f64 / self.processed as f64)
        }
    }
}

pub fn evaluate(signals: &HealthSignals) -> (HealthStatus, Vec<String>) {
    if !signals.is_running {
        return (HealthStatus::Unhealthy, vec![NOT_RUNNING.to_string()]);
    }

    let mut unhealthy = Vec::new();
    let mut degraded = Vec::new();
    let utilization = signals.queue_utilization();

    if utilization > QUEUE_UNHEALTHY_RATIO {
        unhealthy.push(format!(
            "Queue utilization {:.0}% exceeds {:.0}% ({} of {})",
            utilization * 100.0,
            QUEUE_UNHEALTHY_RATIO * 100.0,
            signals.queue_size,
            signals.queue_capacity
        ));
    } else if utilization > QUEUE_DEGRADED_RATIO {
        degraded.push(format!(
            "Queue utilization {:.0}% exceeds {:.0}% ({} of {})",
            utilization * 100.0,
            QUEUE_DEGRADED_RATIO * 100.0,
            signals.queue_size,
            signals.queue_capacity
        ));
    }

    if signals.queue_size > 0 && signals.active_tasks == 0 {
        if let Some(idle) = signals.idle_for.filter(|idle| *idle > STALL_THRESHOLD) {
            unhealthy.push(format!(
                "Processing stalled: {} files queued with no active tasks for {}s",
                signals.queue_size,
                idle.as_secs()
            ));
        }
    }

    if !signals.input.exists {
        unhealthy.push(format!(
            "Input directory does not exist: {}",
            signals.input.path.display()
        ));
    } else if !signals.input.ok {
        unhealthy.push(format!(
            "Input directory is not readable: {} ({})",
            signals.input.path.display(),
            signals.input.error.as_deref().unwrap_or("unknown error")
        ));
    }

    if signals.processed >= MIN_SAMPLE {
        if let Some(rate) = signals.success_rate().filter(|rate| *rate < MIN_SUCCESS_RATE) {
            degraded.push(format!(
                "Success rate {:.0}% is below {:.0}% ({} of {} files)",
                rate * 100.0,
                MIN_SUCCESS_RATE * 100.0,
                signals.succeeded,
                signals.processed
            ));
        }
    }

    if !signals.archive.ok {
        degraded.push(format!(
            "Archive directory is not writable: {} ({})",
            signals.archive.path.display(),
            signals.archive.error.as_deref().unwrap_or("unknown error")
        ));
    }

    if signals.monitors.active < signals.monitors.total {
        degraded.push(format!(
            "Directory monitors inactive: {} of {} active",
            signals.monitors.active, signals.monitors.total
        ));
    }

    let status = if !unhealthy.is_empty() {
        HealthStatus::Unhealthy
    } else if !degraded.is_empty() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    unhealthy.extend(degraded);
    (status, unhealthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn probe(ok: bool, exists: bool) -> ProbeResult {
        ProbeResult {
            path: PathBuf::from("/inbox"),
            exists,
            ok,
            error: (!ok).then(|| "Permission denied".to_string()),
        }
    }

    fn healthy() -> HealthSignals {
        HealthSignals {
            is_running: true,
            queue_size: 0,
            queue_capacity: 100,
            active_tasks: 0,
            idle_for: Some(Duration::from_secs(10)),
            processed: 0,
            succeeded: 0,
            monitors: MonitorCounts { total: 1, active: 1 },
            input: probe(true, true),
            archive: probe(true, true),
        }
    }

    #[test]
    fn quiet_service_is_healthy() {
        assert_eq!(evaluate(&healthy()), (HealthStatus::Healthy, vec![]));
    }

    #[test]
    fn stopped_service_is_unhealthy_whatever_else_holds() {
        let variants = [
            healthy(),
            HealthSignals { queue_size: 100, ..healthy() },
            HealthSignals { processed: 50, succeeded: 1, ..healthy() },
            HealthSignals { input: probe(false, false), ..healthy() },
        ];
        for signals in variants {
            let signals = HealthSignals { is_running: false, ..signals };
            assert_eq!(
                evaluate(&signals),
                (HealthStatus::Unhealthy, vec![NOT_RUNNING.to_string()])
            );
        }
    }

    #[test]
    fn queue_thresholds() {
        let at = |size| evaluate(&HealthSignals { queue_size: size, active_tasks: 1, ..healthy() }).0;
        assert_eq!(at(70), HealthStatus::Healthy);
        assert_eq!(at(71), HealthStatus::Degraded);
        assert_eq!(at(90), HealthStatus::Degraded);
        assert_eq!(at(91), HealthStatus::Unhealthy);
    }

    #[test]
    fn stall_needs_waiting_files_idle_workers_and_time() {
        let stalled = HealthSignals {
            queue_size: 3,
            active_tasks: 0,
            idle_for: Some(Duration::from_secs(6 * 60)),
            ..healthy()
        };
        let (status, reasons) = evaluate(&stalled);
        assert_eq!(status, HealthStatus::Unhealthy);
        assert!(reasons[0].contains("stalled"), "{reasons:?}");

        let busy = HealthSignals { active_tasks: 1, ..stalled.clone() };
        assert_eq!(evaluate(&busy).0, HealthStatus::Healthy);

        let recent = HealthSignals { idle_for: Some(Duration::from_secs(60)), ..stalled };
        assert_eq!(evaluate(&recent).0, HealthStatus::Healthy);
    }

    #[test]
    fn low_success_rate_needs_a_sample() {
        let small = HealthSignals { processed: 9, succeeded: 0, ..healthy() };
        assert_eq!(evaluate(&small).0, HealthStatus::Healthy);

        let (status, reasons) = evaluate(&HealthSignals { processed: 10, succeeded: 3, ..healthy() });
        assert_eq!(status, HealthStatus::Degraded);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("Success rate 30%"), "{reasons:?}");

        let even = HealthSignals { processed: 10, succeeded: 5, ..healthy() };
        assert_eq!(evaluate(&even).0, HealthStatus::Healthy);
    }

    #[test]
    fn input_directory_problems_are_unhealthy() {
        let (status, reasons) = evaluate(&HealthSignals { input: probe(false, false), ..healthy() });
        assert_eq!(status, HealthStatus::Unhealthy);
        assert!(reasons[0].contains("does not exist"));

        let (status, reasons) = evaluate(&HealthSignals { input: probe(false, true), ..healthy() });
        assert_eq!(status, HealthStatus::Unhealthy);
        assert!(reasons[0].contains("not readable"));
    }

    #[test]
    fn unwritable_archive_and_dead_monitors_degrade() {
        let (status, reasons) = evaluate(&HealthSignals {
            archive: probe(false, true),
            monitors: MonitorCounts { total: 2, active: 1 },
            ..healthy()
        });
        assert_eq!(status, HealthStatus::Degraded);
        assert_eq!(reasons.len(), 2);
    }

    #[test]
    fn unhealthy_reasons_come_first() {
        let (status, reasons) = evaluate(&HealthSignals {
            queue_size: 95,
            active_tasks: 2,
            archive: probe(false, true),
            ..healthy()
        });
        assert_eq!(status, HealthStatus::Unhealthy);
        assert!(reasons[0].starts_with("Queue utilization"));
        assert!(reasons[1].starts_with("Archive directory"));
    }
}
