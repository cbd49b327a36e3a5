//! Interface to the host runtime that scheduled the job.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use vmwrap_model::{ControlSignal, ExitCode, StatusReport};

mod file;
pub use file::{BridgeConfig, FileBridge, StatusFile};

#[cfg(any(test, feature = "testing"))]
mod memory;
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryBridge;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed control file {path}: {source}")]
    Control {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("status encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Host-side control and progress channel.
#[async_trait]
pub trait HostBridge: Send + Sync {
    /// Current control flags; read once per poll tick.
    async fn poll_status(&self) -> Result<ControlSignal, BridgeError>;

    async fn report_status(&self, report: &StatusReport) -> Result<(), BridgeError>;

    /// Publish the final outcome. Called once, right before [`HostBridge::finish`].
    async fn conclude(&self, code: ExitCode) -> Result<(), BridgeError>;

    /// Terminate the process with `code`.
    fn finish(&self, code: ExitCode) -> ! {
        std::process::exit(code.code())
    }
}
