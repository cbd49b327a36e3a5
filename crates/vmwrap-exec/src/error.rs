use std::time::Duration;

use thiserror::Error;
use vmwrap_rpc::RpcError;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("backend creation failed: {0}")]
    Creation(String),
    #[error("{what} not reachable after {waited:?}")]
    ConnectTimeout { what: String, waited: Duration },
    #[error("command submission timed out after {waited:?}: {reason}")]
    SubmitTimeout { waited: Duration, reason: String },
    #[error("application exited with code {code}")]
    ChildFailure {
        code: i32,
        stdout: String,
        stderr: String,
    },
    #[error("file transfer failed for {path}: {reason}")]
    Copy { path: String, reason: String },
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),
    #[error("backend not started")]
    NotStarted,
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("io error: {0}")]
    Io(String),
}

impl ExecError {
    pub(crate) fn copy(path: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        ExecError::Copy {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}
