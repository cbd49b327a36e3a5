use serde::{Deserialize, Serialize};

/// Progress snapshot reported to the host runtime every poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusReport {
    /// Total CPU seconds of the job so far, previous runs included.
    pub cpu_time: f64,
    /// CPU seconds recorded in the last persisted checkpoint.
    pub checkpoint_cpu_time: f64,
    /// Best estimate of job progress in `[0, 1]`.
    pub fraction_done: f64,
}

impl StatusReport {
    pub fn new(cpu_time: f64, checkpoint_cpu_time: f64, fraction_done: f64) -> Self {
        Self {
            cpu_time,
            checkpoint_cpu_time,
            fraction_done: fraction_done.clamp(0.0, 1.0),
        }
    }
}
