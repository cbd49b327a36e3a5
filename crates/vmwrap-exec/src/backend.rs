use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::debug;
use vmwrap_model::{BackendKind, TaskDescriptor, TaskIndex};
use vmwrap_rpc::VmRpc;

use crate::{
    error::{ExecError, ExecResult},
    proc::NativeBackend,
    utils::limits::RlimitConfig,
    vm::VmBackend,
};

/// Settings shared by every backend instance of one run.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Host working directory; relative descriptor paths resolve against it.
    pub workdir: PathBuf,
    /// Ceiling for every wait on the VM service (readiness, submit, copy).
    pub max_wait_time: Duration,
    /// Fixed interval between retries of a bounded wait.
    pub retry_interval: Duration,
    /// Ceiling for kill / state-save on abnormal termination.
    pub kill_timeout: Duration,
    /// Guest directory receiving the application and input files.
    pub guest_workdir: String,
    /// Prefix of VM names; the task index and image complete the name.
    pub vm_name_prefix: String,
    /// POSIX limits applied to native processes.
    pub rlimits: RlimitConfig,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            max_wait_time: Duration::from_secs(300),
            retry_interval: Duration::from_secs(1),
            kill_timeout: Duration::from_secs(60),
            guest_workdir: "/root/shared".to_string(),
            vm_name_prefix: "vmwrap".to_string(),
            rlimits: RlimitConfig::default(),
        }
    }
}

/// Everything a backend needs besides its own descriptor.
#[derive(Clone)]
pub struct BackendContext {
    pub cfg: Arc<ExecConfig>,
    /// VM service client; required by VM tasks only.
    pub rpc: Option<Arc<dyn VmRpc>>,
}

impl BackendContext {
    pub fn new(cfg: ExecConfig) -> Self {
        Self {
            cfg: Arc::new(cfg),
            rpc: None,
        }
    }

    pub fn with_rpc(mut self, rpc: Arc<dyn VmRpc>) -> Self {
        self.rpc = Some(rpc);
        self
    }
}

/// Application exit observed by [`ExecutionBackend::poll`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    pub exit_code: i32,
    /// Captured output, when the backend captures it (VM tasks).
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl Completion {
    pub fn code(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    Ready(Completion),
}

/// Capability set every execution backend provides for one task.
///
/// An instance owns the runtime state of exactly one task and is dropped when
/// that task finishes. `kill` is best effort and never fails; everything else
/// reports errors for the supervisor to classify.
#[async_trait]
pub trait ExecutionBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Stage files and launch the application.
    async fn start(&mut self) -> ExecResult<()>;

    async fn poll(&mut self) -> ExecResult<PollStatus>;

    async fn pause(&mut self) -> ExecResult<()>;

    async fn resume(&mut self) -> ExecResult<()>;

    /// CPU seconds consumed by this task so far.
    async fn cpu_time(&mut self) -> f64;

    /// Take a backend-level checkpoint if `period` has elapsed since the last one.
    ///
    /// Returns whether a checkpoint was taken.
    async fn checkpoint_if_due(&mut self, period: Duration) -> ExecResult<bool>;

    /// Terminate abnormally, preserving as much state as the backend can.
    async fn kill(&mut self);

    /// Retrieve outputs and release the backend after a successful exit.
    async fn finalize(&mut self) -> ExecResult<()>;
}

/// Source of backend instances, one per task start.
pub trait BackendFactory: Send + Sync {
    fn build(&self, task: &TaskDescriptor, index: TaskIndex) -> ExecResult<Box<dyn ExecutionBackend>>;
}

impl BackendFactory for BackendContext {
    fn build(&self, task: &TaskDescriptor, index: TaskIndex) -> ExecResult<Box<dyn ExecutionBackend>> {
        backend_for(task, index, self)
    }
}

/// Build the backend variant recorded in the descriptor.
pub fn backend_for(
    task: &TaskDescriptor,
    index: TaskIndex,
    ctx: &BackendContext,
) -> ExecResult<Box<dyn ExecutionBackend>> {
    debug!(target: "vmwrap.exec", index, kind = %task.backend, "building backend");
    match task.backend {
        BackendKind::Native => Ok(Box::new(NativeBackend::new(
            task.clone(),
            index,
            Arc::clone(&ctx.cfg),
        ))),
        BackendKind::Vm => {
            let rpc = ctx.rpc.clone().ok_or_else(|| {
                ExecError::Creation("vm task requires a VM service client".into())
            })?;
            Ok(Box::new(VmBackend::new(
                task.clone(),
                index,
                Arc::clone(&ctx.cfg),
                rpc,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use vmwrap_rpc::testing::FakeVmRpc;

    use super::*;

    #[test]
    fn variant_follows_descriptor() {
        let ctx = BackendContext::new(ExecConfig::default()).with_rpc(Arc::new(FakeVmRpc::new()));

        let native = backend_for(&TaskDescriptor::native("app"), 0, &ctx).unwrap();
        assert_eq!(native.kind(), BackendKind::Native);

        let vm = backend_for(&TaskDescriptor::vm("img", "/app"), 1, &ctx).unwrap();
        assert_eq!(vm.kind(), BackendKind::Vm);
    }

    #[test]
    fn vm_without_rpc_is_creation_error() {
        let ctx = BackendContext::new(ExecConfig::default());
        let res = backend_for(&TaskDescriptor::vm("img", "/app"), 0, &ctx);
        assert!(matches!(res, Err(ExecError::Creation(_))));
    }
}
