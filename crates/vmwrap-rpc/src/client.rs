use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RpcError;

/// Command submitted to a guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Guest path fed to the command's stdin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
}

/// Result of a finished guest command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// Operations of the VM management RPC service.
///
/// Every call is a single bounded request; callers own the retry policy.
#[async_trait]
pub trait VmRpc: Send + Sync {
    /// Create VM `vm` from `image`.
    async fn create(&self, vm: &str, image: &str) -> Result<(), RpcError>;

    async fn start(&self, vm: &str) -> Result<(), RpcError>;

    async fn pause(&self, vm: &str) -> Result<(), RpcError>;

    async fn unpause(&self, vm: &str) -> Result<(), RpcError>;

    /// Restore the most recent snapshot. Returns `false` if `vm` has none.
    async fn restore_snapshot(&self, vm: &str) -> Result<bool, RpcError>;

    /// Take a live snapshot of a running VM.
    async fn save_snapshot(&self, vm: &str) -> Result<(), RpcError>;

    /// Save the VM state and stop it (not a destructive power-off).
    async fn save_state(&self, vm: &str) -> Result<(), RpcError>;

    /// Reachability probe. `None` probes the service itself, `Some(vm)` the guest agent.
    async fn ping(&self, vm: Option<&str>) -> Result<bool, RpcError>;

    /// Submit a command to the guest; returns its command id.
    async fn submit_command(&self, vm: &str, cmd: &CommandSpec) -> Result<String, RpcError>;

    async fn list_finished_commands(&self, vm: &str) -> Result<Vec<String>, RpcError>;

    async fn get_command_result(&self, vm: &str, id: &str) -> Result<CommandResult, RpcError>;

    /// Copy a host file into the guest.
    async fn copy_file_in(&self, vm: &str, host: &Path, guest: &str) -> Result<(), RpcError>;

    /// Copy a guest file out to the host.
    async fn copy_file_out(&self, vm: &str, guest: &str, host: &Path) -> Result<(), RpcError>;

    /// Names of VMs currently running.
    async fn list_running(&self) -> Result<Vec<String>, RpcError>;

    /// Names of VMs known to the service, running or not.
    async fn list_available(&self) -> Result<Vec<String>, RpcError>;
}
