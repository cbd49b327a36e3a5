use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tracing::{debug, info, instrument, trace, warn};
use vmwrap_model::{BackendKind, TaskDescriptor, TaskIndex};
use vmwrap_rpc::{CommandSpec, RpcError, VmRpc};

use crate::{
    backend::{Completion, ExecConfig, ExecutionBackend, PollStatus},
    error::{ExecError, ExecResult},
    util::{guest_path, resolve},
    wait::{retry_until, wait_until},
};

mod name;
pub use name::{job_vm_names, vm_name};

/// Runs a task inside a managed VM through the VM service.
///
/// The VM is named after the task index and image so a restarted supervisor
/// finds the same VM (and its snapshots) again.
pub struct VmBackend {
    task: TaskDescriptor,
    index: TaskIndex,
    cfg: Arc<ExecConfig>,
    rpc: Arc<dyn VmRpc>,
    vm: String,
    /// Set once `start` was issued; cleared after the final state-save.
    powered: bool,
    command_id: Option<String>,
    paused_since: Option<Instant>,
    paused_total: Duration,
    run_started: Option<Instant>,
    finished_at: Option<Instant>,
    last_checkpoint: Instant,
    poll_failing_since: Option<Instant>,
    completion: Option<Completion>,
}

impl VmBackend {
    pub fn new(
        task: TaskDescriptor,
        index: TaskIndex,
        cfg: Arc<ExecConfig>,
        rpc: Arc<dyn VmRpc>,
    ) -> ExecResult<Self> {
        let image = task
            .vm_image
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ExecError::Creation(format!("task {index}: missing vm image")))?;
        let vm = vm_name(&cfg.vm_name_prefix, index, image);
        Ok(Self {
            task,
            index,
            cfg,
            rpc,
            vm,
            powered: false,
            command_id: None,
            paused_since: None,
            paused_total: Duration::ZERO,
            run_started: None,
            finished_at: None,
            last_checkpoint: Instant::now(),
            poll_failing_since: None,
            completion: None,
        })
    }

    /// Name of the VM this backend drives.
    pub fn vm(&self) -> &str {
        &self.vm
    }

    fn host_path(&self, p: &Path) -> PathBuf {
        resolve(&self.cfg.workdir, p)
    }

    fn image(&self) -> &str {
        self.task.vm_image.as_deref().unwrap_or_default()
    }

    async fn ensure_vm(&self) -> ExecResult<()> {
        let available = self
            .rpc
            .list_available()
            .await
            .map_err(|e| ExecError::Creation(format!("list vms: {e}")))?;
        if !available.iter().any(|v| v == &self.vm) {
            info!(target: "vmwrap.exec.vm", vm = %self.vm, image = self.image(), "creating vm");
            self.rpc
                .create(&self.vm, self.image())
                .await
                .map_err(|e| ExecError::Creation(format!("create {}: {e}", self.vm)))?;
        }
        Ok(())
    }

    async fn wait_reachable(&self, what: &str) -> ExecResult<()> {
        let rpc = &self.rpc;
        let vm = self.vm.as_str();
        wait_until(self.cfg.max_wait_time, self.cfg.retry_interval, || async move {
            matches!(rpc.ping(Some(vm)).await, Ok(true))
        })
        .await
        .map(|waited| trace!(target: "vmwrap.exec.vm", vm, ?waited, "reachable"))
        .map_err(|waited| ExecError::ConnectTimeout {
            what: format!("{what} {vm}"),
            waited,
        })
    }

    async fn copy_in(&self, host: &Path) -> ExecResult<String> {
        let guest = guest_path(&self.cfg.guest_workdir, host)?;
        self.rpc
            .copy_file_in(&self.vm, host, &guest)
            .await
            .map_err(|e| ExecError::copy(host.display(), e))?;
        trace!(target: "vmwrap.exec.vm", vm = %self.vm, host = %host.display(), %guest, "copied in");
        Ok(guest)
    }

    /// Stage app, inputs and stdin, returning the command to run.
    async fn stage(&self) -> ExecResult<CommandSpec> {
        let program = if self.task.copy_app {
            let app = self.host_path(&self.task.app_path);
            self.copy_in(&app).await?
        } else {
            self.task.app_path.to_string_lossy().into_owned()
        };
        for input in &self.task.input_files {
            let host = self.host_path(input);
            self.copy_in(&host).await?;
        }
        let stdin = match &self.task.stdin {
            Some(p) => Some(self.copy_in(&self.host_path(p)).await?),
            None => None,
        };
        Ok(CommandSpec {
            program,
            args: self.task.args(),
            stdin,
        })
    }

    async fn submit(&self, cmd: &CommandSpec) -> ExecResult<String> {
        let rpc = &self.rpc;
        let vm = self.vm.as_str();
        retry_until(self.cfg.max_wait_time, self.cfg.retry_interval, || {
            rpc.submit_command(vm, cmd)
        })
        .await
        .map_err(|t| ExecError::SubmitTimeout {
            waited: t.waited,
            reason: t.last.to_string(),
        })
    }

    /// Copy one guest file out, waiting for connectivity between attempts.
    ///
    /// The file lands in a temporary sibling first and is renamed into place,
    /// so a re-executed task overwrites a previous copy atomically.
    async fn retrieve(&self, output: &Path) -> ExecResult<()> {
        let host = self.host_path(output);
        let guest = guest_path(&self.cfg.guest_workdir, output)?;
        let staging = staging_path(&host)?;

        let started = Instant::now();
        loop {
            match self.rpc.copy_file_out(&self.vm, &guest, &staging).await {
                Ok(()) => break,
                Err(e) if e.is_connectivity() && started.elapsed() < self.cfg.max_wait_time => {
                    warn!(target: "vmwrap.exec.vm", vm = %self.vm, %guest, error = %e, "copy out failed; waiting for connectivity");
                    let remaining = self.cfg.max_wait_time.saturating_sub(started.elapsed());
                    let rpc = &self.rpc;
                    let vm = self.vm.as_str();
                    let _ = wait_until(remaining, self.cfg.retry_interval, || async move {
                        matches!(rpc.ping(Some(vm)).await, Ok(true))
                    })
                    .await;
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&staging).await;
                    return Err(ExecError::copy(&guest, e));
                }
            }
        }
        tokio::fs::rename(&staging, &host)
            .await
            .map_err(|e| ExecError::copy(host.display(), e))?;
        debug!(target: "vmwrap.exec.vm", vm = %self.vm, %guest, host = %host.display(), "retrieved output");
        Ok(())
    }

    async fn write_captured(&self, target: &Option<PathBuf>, content: &str) {
        let Some(p) = target else { return };
        let p = self.host_path(p);
        if let Err(e) = tokio::fs::write(&p, content).await {
            warn!(target: "vmwrap.exec.vm", path = %p.display(), error = %e, "failed to write captured output");
        }
    }

    async fn save_state(&mut self, why: &'static str) {
        if !self.powered {
            return;
        }
        match tokio::time::timeout(self.cfg.kill_timeout, self.rpc.save_state(&self.vm)).await {
            Ok(Ok(())) => {
                debug!(target: "vmwrap.exec.vm", vm = %self.vm, why, "state saved");
                self.powered = false;
            }
            Ok(Err(e)) => warn!(target: "vmwrap.exec.vm", vm = %self.vm, why, error = %e, "state save failed"),
            Err(_) => warn!(target: "vmwrap.exec.vm", vm = %self.vm, why, "state save timed out"),
        }
    }

    /// Tolerate lost connectivity while polling, up to `max_wait_time`.
    fn poll_failed(&mut self, e: RpcError) -> ExecResult<PollStatus> {
        if !e.is_connectivity() {
            return Err(e.into());
        }
        let since = *self.poll_failing_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= self.cfg.max_wait_time {
            return Err(ExecError::ConnectTimeout {
                what: format!("vm service while polling {}", self.vm),
                waited: since.elapsed(),
            });
        }
        warn!(target: "vmwrap.exec.vm", vm = %self.vm, error = %e, "poll failed; retrying next tick");
        Ok(PollStatus::Running)
    }
}

fn staging_path(host: &Path) -> ExecResult<PathBuf> {
    let name = host
        .file_name()
        .ok_or_else(|| ExecError::copy(host.display(), "path has no file name"))?;
    Ok(host.with_file_name(format!(
        ".{}.{}.part",
        name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    )))
}

#[async_trait]
impl ExecutionBackend for VmBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vm
    }

    #[instrument(level = "debug", skip(self), fields(vm = %self.vm, index = self.index))]
    async fn start(&mut self) -> ExecResult<()> {
        self.ensure_vm().await?;

        let restored = self
            .rpc
            .restore_snapshot(&self.vm)
            .await
            .map_err(|e| ExecError::Creation(format!("restore snapshot: {e}")))?;
        if restored {
            info!(target: "vmwrap.exec.vm", vm = %self.vm, "restored latest snapshot");
        }

        self.rpc
            .start(&self.vm)
            .await
            .map_err(|e| ExecError::Creation(format!("start {}: {e}", self.vm)))?;
        self.powered = true;

        self.wait_reachable("guest agent of").await?;

        let cmd = self.stage().await?;
        let id = self.submit(&cmd).await?;
        debug!(target: "vmwrap.exec.vm", vm = %self.vm, id, program = %cmd.program, "command submitted");

        self.command_id = Some(id);
        self.run_started = Some(Instant::now());
        self.last_checkpoint = Instant::now();
        Ok(())
    }

    async fn poll(&mut self) -> ExecResult<PollStatus> {
        if let Some(done) = &self.completion {
            return Ok(PollStatus::Ready(done.clone()));
        }
        let id = self.command_id.clone().ok_or(ExecError::NotStarted)?;

        let finished = match self.rpc.list_finished_commands(&self.vm).await {
            Ok(finished) => finished,
            Err(e) => return self.poll_failed(e),
        };
        if !finished.iter().any(|f| f == &id) {
            self.poll_failing_since = None;
            return Ok(PollStatus::Running);
        }

        let result = match self.rpc.get_command_result(&self.vm, &id).await {
            Ok(result) => result,
            Err(e) => return self.poll_failed(e),
        };
        self.poll_failing_since = None;

        self.write_captured(&self.task.stdout, &result.stdout).await;
        self.write_captured(&self.task.stderr, &result.stderr).await;
        debug!(target: "vmwrap.exec.vm", vm = %self.vm, id, code = result.exit_code, "command finished");

        let done = Completion {
            exit_code: result.exit_code,
            stdout: Some(result.stdout),
            stderr: Some(result.stderr),
        };
        self.completion = Some(done.clone());
        self.finished_at = Some(Instant::now());
        Ok(PollStatus::Ready(done))
    }

    async fn pause(&mut self) -> ExecResult<()> {
        self.rpc.pause(&self.vm).await?;
        self.paused_since.get_or_insert_with(Instant::now);
        Ok(())
    }

    async fn resume(&mut self) -> ExecResult<()> {
        self.rpc.unpause(&self.vm).await?;
        if let Some(since) = self.paused_since.take() {
            self.paused_total += since.elapsed();
        }
        Ok(())
    }

    /// Unpaused running time of the guest command, frozen once it finished.
    ///
    /// 0 while paused so a frozen VM is never contacted.
    async fn cpu_time(&mut self) -> f64 {
        if self.paused_since.is_some() {
            return 0.0;
        }
        let Some(started) = self.run_started else {
            return 0.0;
        };
        let end = self.finished_at.unwrap_or_else(Instant::now);
        end.saturating_duration_since(started)
            .saturating_sub(self.paused_total)
            .as_secs_f64()
    }

    async fn checkpoint_if_due(&mut self, period: Duration) -> ExecResult<bool> {
        if self.paused_since.is_some() || self.completion.is_some() || !self.powered {
            return Ok(false);
        }
        if self.last_checkpoint.elapsed() < period {
            return Ok(false);
        }
        self.last_checkpoint = Instant::now();
        match self.rpc.save_snapshot(&self.vm).await {
            Ok(()) => {
                debug!(target: "vmwrap.exec.vm", vm = %self.vm, "snapshot taken");
                Ok(true)
            }
            Err(e) => {
                warn!(target: "vmwrap.exec.vm", vm = %self.vm, error = %e, "snapshot failed");
                Ok(false)
            }
        }
    }

    async fn kill(&mut self) {
        self.save_state("kill").await;
    }

    #[instrument(level = "debug", skip(self), fields(vm = %self.vm, index = self.index))]
    async fn finalize(&mut self) -> ExecResult<()> {
        for output in &self.task.output_files {
            self.retrieve(output).await?;
        }
        self.save_state("finalize").await;
        Ok(())
    }
}
