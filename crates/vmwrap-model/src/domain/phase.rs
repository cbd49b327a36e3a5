use serde::{Deserialize, Serialize};

/// Lifecycle of a single task.
///
/// `Init → Starting → Running ⇄ Suspended → Ready → {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Init,
    Starting,
    Running,
    Suspended,
    /// Backend reported the application finished; outputs not yet retrieved.
    Ready,
    Completed,
    Failed,
}

impl TaskPhase {
    /// Returns `true` if the task will not transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Completed | TaskPhase::Failed)
    }

    /// Returns `true` if `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: TaskPhase) -> bool {
        use TaskPhase::*;
        match (self, next) {
            (Init, Starting) => true,
            (Starting, Running) | (Starting, Failed) => true,
            (Running, Suspended) | (Suspended, Running) => true,
            // The application may exit just before a pause lands.
            (Running, Ready) | (Suspended, Ready) => true,
            (Running, Failed) | (Suspended, Failed) => true,
            (Ready, Completed) | (Ready, Failed) => true,
            _ => false,
        }
    }
}

/// Lifecycle of the whole supervisor run.
///
/// `Resuming → Executing → Finalizing → {Done, Aborted, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Resuming,
    Executing,
    Finalizing,
    Done,
    /// Stopped cleanly on host request.
    Aborted,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Aborted | RunPhase::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskPhase::Completed.is_terminal());
        assert!(TaskPhase::Failed.is_terminal());
        assert!(!TaskPhase::Suspended.is_terminal());

        assert!(RunPhase::Done.is_terminal());
        assert!(RunPhase::Aborted.is_terminal());
        assert!(!RunPhase::Finalizing.is_terminal());
    }

    #[test]
    fn suspend_resume_cycle_is_legal() {
        assert!(TaskPhase::Running.can_transition_to(TaskPhase::Suspended));
        assert!(TaskPhase::Suspended.can_transition_to(TaskPhase::Running));
        assert!(TaskPhase::Suspended.can_transition_to(TaskPhase::Ready));
        assert!(!TaskPhase::Ready.can_transition_to(TaskPhase::Suspended));
        assert!(!TaskPhase::Completed.can_transition_to(TaskPhase::Running));
        assert!(!TaskPhase::Init.can_transition_to(TaskPhase::Running));
    }
}
