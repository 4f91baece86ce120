//! TRACEWARDEN DOCTOR
//! Health checks for a running watchdog: live directory probes, queue and
//! worker signals, and a Healthy / Degraded / Unhealthy verdict.

mod aggregator;
mod probe;
mod report;
mod verdict;

pub use aggregator::HealthAggregator;
pub use probe::{DirectoryProbes, ProbeResult, probe_directories, probe_read, probe_write};
pub use report::{HealthReport, HealthStatus};
pub use verdict::{
    HealthSignals, MIN_SAMPLE, MIN_SUCCESS_RATE, NOT_RUNNING, QUEUE_DEGRADED_RATIO,
    QUEUE_UNHEALTHY_RATIO, STALL_THRESHOLD, evaluate,
};
