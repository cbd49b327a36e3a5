use thiserror::Error;
use vmwrap_exec::ExecError;
use vmwrap_model::{ExitCode, TaskIndex};

use crate::{bridge::BridgeError, descriptor::DescriptorError};

/// Step of a task at which the backend failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Poll,
    Finalize,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Start => "start",
            Stage::Poll => "poll",
            Stage::Finalize => "finalize",
        })
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("checkpoint records {completed} completed tasks but the job has {total}")]
    CheckpointInconsistency { completed: usize, total: usize },
    #[error("task {task} failed during {stage}: {source}")]
    Exec {
        task: TaskIndex,
        stage: Stage,
        #[source]
        source: ExecError,
    },
    #[error("checkpoint write failed: {0}")]
    Checkpoint(#[source] std::io::Error),
    #[error("helper startup failed: {0}")]
    ManagerStartup(String),
    #[error("host bridge: {0}")]
    Bridge(#[from] BridgeError),
    #[error("stopped on host request: {reason}")]
    Stopped { reason: &'static str },
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn exec(task: TaskIndex, stage: Stage, source: ExecError) -> Self {
        CoreError::Exec {
            task,
            stage,
            source,
        }
    }

    /// Outcome reported to the host runtime for this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CoreError::Descriptor(_) => ExitCode::Descriptor,
            CoreError::CheckpointInconsistency { .. } => ExitCode::CheckpointInconsistency,
            CoreError::Exec { stage, source, .. } => classify(*stage, source),
            CoreError::ManagerStartup(_) => ExitCode::ManagerStartup,
            CoreError::Stopped { .. } => ExitCode::CleanStop,
            CoreError::Checkpoint(_) | CoreError::Bridge(_) | CoreError::Internal(_) => {
                ExitCode::Internal
            }
        }
    }
}

/// Errors without a class of their own take the class of the failing stage.
fn classify(stage: Stage, e: &ExecError) -> ExitCode {
    match e {
        ExecError::Creation(_) => ExitCode::Creation,
        ExecError::ConnectTimeout { .. } => ExitCode::ConnectTimeout,
        ExecError::SubmitTimeout { .. } => ExitCode::SubmitTimeout,
        ExecError::ChildFailure { .. } => ExitCode::ChildFailure,
        ExecError::Copy { .. } => ExitCode::Copy,
        ExecError::Rpc(_) | ExecError::Io(_) | ExecError::NotStarted | ExecError::Unsupported(_) => {
            match stage {
                Stage::Start => ExitCode::Creation,
                Stage::Poll => ExitCode::ConnectTimeout,
                Stage::Finalize => ExitCode::Copy,
            }
        }
    }
}

/// Outcome of a supervisor run as the host runtime sees it.
pub fn exit_code_of<T>(res: &Result<T, CoreError>) -> ExitCode {
    match res {
        Ok(_) => ExitCode::Success,
        Err(e) => e.exit_code(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn exec_errors_keep_their_class() {
        let cases = [
            (ExecError::Creation("x".into()), ExitCode::Creation),
            (
                ExecError::ConnectTimeout {
                    what: "vm".into(),
                    waited: Duration::from_secs(1),
                },
                ExitCode::ConnectTimeout,
            ),
            (
                ExecError::SubmitTimeout {
                    waited: Duration::from_secs(1),
                    reason: "x".into(),
                },
                ExitCode::SubmitTimeout,
            ),
            (
                ExecError::ChildFailure {
                    code: 3,
                    stdout: String::new(),
                    stderr: String::new(),
                },
                ExitCode::ChildFailure,
            ),
            (
                ExecError::Copy {
                    path: "a".into(),
                    reason: "b".into(),
                },
                ExitCode::Copy,
            ),
        ];
        for (source, code) in cases {
            assert_eq!(CoreError::exec(0, Stage::Poll, source).exit_code(), code);
        }
    }

    #[test]
    fn generic_errors_take_the_stage_class() {
        let io = || ExecError::Io("boom".into());
        assert_eq!(CoreError::exec(1, Stage::Start, io()).exit_code(), ExitCode::Creation);
        assert_eq!(CoreError::exec(1, Stage::Poll, io()).exit_code(), ExitCode::ConnectTimeout);
        assert_eq!(CoreError::exec(1, Stage::Finalize, io()).exit_code(), ExitCode::Copy);
    }

    #[test]
    fn run_level_errors() {
        assert_eq!(
            CoreError::CheckpointInconsistency { completed: 4, total: 3 }.exit_code(),
            ExitCode::CheckpointInconsistency
        );
        assert_eq!(CoreError::Stopped { reason: "quit" }.exit_code(), ExitCode::CleanStop);
        assert_eq!(CoreError::ManagerStartup("x".into()).exit_code(), ExitCode::ManagerStartup);
        assert_eq!(CoreError::Internal("panic".into()).exit_code(), ExitCode::Internal);
        assert_eq!(exit_code_of::<()>(&Ok(())), ExitCode::Success);
    }
}
