use std::time::Duration;

/// Timing of the supervisor poll loop.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interval between backend polls; also bounds stop-request latency.
    pub poll_period: Duration,
    /// Minimum interval between interim backend checkpoints.
    pub checkpoint_period: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_secs(1),
            checkpoint_period: Duration::from_secs(600),
        }
    }
}

/// Helper process supervision and cleanup ceilings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long helpers get to expose the RPC endpoint.
    pub startup_timeout: Duration,
    pub retry_interval: Duration,
    /// Ceiling for saving one VM during cleanup.
    pub save_timeout: Duration,
    /// Time helpers get to exit after SIGTERM before SIGKILL.
    pub shutdown_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(60),
            retry_interval: Duration::from_secs(1),
            save_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}
