use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric outcome handed to the host runtime when the supervisor finishes.
///
/// Each fatal error class has its own code so the scheduler can decide
/// whether retrying the job elsewhere is worthwhile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCode {
    Success,
    Descriptor,
    /// Backend could not be instantiated.
    Creation,
    /// Backend never became reachable.
    ConnectTimeout,
    /// Command could not be submitted to the guest in time.
    SubmitTimeout,
    /// Application exited non-zero.
    ChildFailure,
    Copy,
    CheckpointInconsistency,
    /// Helper processes never exposed the RPC endpoint.
    ManagerStartup,
    Internal,
    /// Host asked the job to stop (quit, abort or lost heartbeat).
    CleanStop,
}

impl ExitCode {
    pub const ALL: [ExitCode; 11] = [
        ExitCode::Success,
        ExitCode::Descriptor,
        ExitCode::Creation,
        ExitCode::ConnectTimeout,
        ExitCode::SubmitTimeout,
        ExitCode::ChildFailure,
        ExitCode::Copy,
        ExitCode::CheckpointInconsistency,
        ExitCode::ManagerStartup,
        ExitCode::Internal,
        ExitCode::CleanStop,
    ];

    pub fn code(&self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Descriptor => 2,
            ExitCode::Creation => 3,
            ExitCode::ConnectTimeout => 4,
            ExitCode::SubmitTimeout => 5,
            ExitCode::ChildFailure => 6,
            ExitCode::Copy => 7,
            ExitCode::CheckpointInconsistency => 8,
            ExitCode::ManagerStartup => 9,
            ExitCode::Internal => 10,
            ExitCode::CleanStop => 100,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    /// Returns `true` for outcomes that are not failures (success or clean stop).
    pub fn is_clean(&self) -> bool {
        matches!(self, ExitCode::Success | ExitCode::CleanStop)
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn codes_are_distinct() {
        let codes: HashSet<i32> = ExitCode::ALL.iter().map(|c| c.code()).collect();
        assert_eq!(codes.len(), ExitCode::ALL.len());
    }

    #[test]
    fn only_success_is_zero() {
        for c in ExitCode::ALL {
            assert_eq!(c.code() == 0, c.is_success());
        }
    }

    #[test]
    fn clean_stop_is_not_a_failure() {
        assert!(ExitCode::CleanStop.is_clean());
        assert!(!ExitCode::CleanStop.is_success());
        assert!(!ExitCode::ChildFailure.is_clean());
    }
}
