use serde::{Deserialize, Serialize};

use crate::{ExitCode, TaskIndex};

/// Kind of a supervisor lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // run
    RunResuming,
    RunAlreadyComplete,
    RunFinished,

    // task
    TaskStarting,
    TaskRunning,
    TaskSuspended,
    TaskResumed,
    TaskReady,
    TaskCompleted,
    TaskFailed,

    // checkpoint
    CheckpointSaved,

    // host
    StopRequested,

    // manager
    HelperStarted,
    HelperStopped,
    CleanupStarted,
    CleanupFinished,
}

/// Structured event emitted by the supervisor and the manager lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorEvent {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskIndex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<ExitCode>,
}

impl SupervisorEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            task: None,
            reason: None,
            completed: None,
            cpu_seconds: None,
            exit_code: None,
        }
    }

    pub fn with_task(mut self, task: TaskIndex) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_completed(mut self, completed: usize) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn with_cpu(mut self, cpu_seconds: f64) -> Self {
        self.cpu_seconds = Some(cpu_seconds);
        self
    }

    pub fn with_exit_code(mut self, code: ExitCode) -> Self {
        self.exit_code = Some(code);
        self
    }
}
