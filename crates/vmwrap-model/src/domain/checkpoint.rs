use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Minimal recovery state persisted between supervisor runs.
///
/// `completed_task_count` never decreases within one job; a value above the
/// job's task count means the record belongs to another job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub completed_task_count: usize,
    pub cumulative_cpu_seconds: f64,
}

impl CheckpointRecord {
    pub fn new(completed_task_count: usize, cumulative_cpu_seconds: f64) -> Self {
        Self {
            completed_task_count,
            cumulative_cpu_seconds,
        }
    }

    /// Record of a job that has not completed anything yet.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Returns `true` if every one of `total_tasks` tasks is done.
    pub fn is_complete(&self, total_tasks: usize) -> bool {
        self.completed_task_count == total_tasks
    }

    /// Returns `true` if this record can belong to a job of `total_tasks` tasks.
    pub fn fits(&self, total_tasks: usize) -> bool {
        self.completed_task_count <= total_tasks
    }
}

/// Line-oriented form: `"<completed> <cumulative_cpu>"`.
impl fmt::Display for CheckpointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.completed_task_count, self.cumulative_cpu_seconds
        )
    }
}

impl FromStr for CheckpointRecord {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let completed = parts
            .next()
            .ok_or_else(|| "empty checkpoint".to_string())?
            .parse::<usize>()
            .map_err(|e| format!("completed_task_count: {e}"))?;
        let cpu = parts
            .next()
            .ok_or_else(|| "missing cumulative_cpu_seconds".to_string())?
            .parse::<f64>()
            .map_err(|e| format!("cumulative_cpu_seconds: {e}"))?;
        if parts.next().is_some() {
            return Err("trailing data after checkpoint record".into());
        }
        if !cpu.is_finite() || cpu < 0.0 {
            return Err(format!("cumulative_cpu_seconds out of range: {cpu}"));
        }
        Ok(Self::new(completed, cpu))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_line_oriented() {
        assert_eq!(CheckpointRecord::new(2, 12.5).to_string(), "2 12.5");
        assert_eq!(CheckpointRecord::zero().to_string(), "0 0");
    }

    #[test]
    fn parse_accepts_trailing_newline() {
        let rec: CheckpointRecord = "3 41.25\n".parse().unwrap();
        assert_eq!(rec, CheckpointRecord::new(3, 41.25));
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "x 1.0", "1", "1 abc", "1 2 3", "-1 2", "1 -2", "1 NaN"] {
            assert!(bad.parse::<CheckpointRecord>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn fits_and_complete() {
        let rec = CheckpointRecord::new(3, 0.0);
        assert!(rec.fits(3));
        assert!(rec.is_complete(3));
        assert!(rec.fits(5));
        assert!(!rec.is_complete(5));
        assert!(!rec.fits(2));
    }
}
