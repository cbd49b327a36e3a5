use std::{
    path::PathBuf,
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::process::Child;
use tracing::{debug, trace, warn};
use vmwrap_model::{BackendKind, TaskDescriptor, TaskIndex};

use crate::{
    backend::{Completion, ExecConfig, ExecutionBackend, PollStatus},
    error::{ExecError, ExecResult},
    util::{cmd_program, resolve},
    utils::limits::attach_rlimits,
};

mod cpu;
pub use cpu::process_cpu_seconds;

/// Environment variable carrying the checkpoint marker path to the application.
pub const CHECKPOINT_MARKER_ENV: &str = "VMWRAP_CHECKPOINT_MARKER";

/// Runs a task as a native process on the host.
///
/// The inner application checkpoints itself through the marker path, so this
/// backend never reports a checkpoint of its own.
pub struct NativeBackend {
    task: TaskDescriptor,
    index: TaskIndex,
    cfg: Arc<ExecConfig>,
    child: Option<Child>,
    pid: Option<u32>,
    started_at: Option<Instant>,
    paused_since: Option<Instant>,
    paused_total: Duration,
    cpu_seconds: f64,
    exit_code: Option<i32>,
}

impl NativeBackend {
    pub fn new(task: TaskDescriptor, index: TaskIndex, cfg: Arc<ExecConfig>) -> Self {
        Self {
            task,
            index,
            cfg,
            child: None,
            pid: None,
            started_at: None,
            paused_since: None,
            paused_total: Duration::ZERO,
            cpu_seconds: 0.0,
            exit_code: None,
        }
    }

    fn path(&self, p: &std::path::Path) -> PathBuf {
        resolve(&self.cfg.workdir, p)
    }

    /// Application path, copied into the working directory first when requested.
    async fn prepare_app(&self) -> ExecResult<PathBuf> {
        let app = self.path(&self.task.app_path);
        if !self.task.copy_app {
            return Ok(app);
        }
        let name = app
            .file_name()
            .ok_or_else(|| ExecError::Creation(format!("bad app path {}", app.display())))?;
        let dest = self.cfg.workdir.join(name);
        if dest != app {
            tokio::fs::copy(&app, &dest)
                .await
                .map_err(|e| ExecError::copy(app.display(), e))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))
                    .await
                    .map_err(|e| ExecError::copy(dest.display(), e))?;
            }
        }
        Ok(dest)
    }

    fn open_stdio(&self) -> ExecResult<(Stdio, Stdio, Stdio)> {
        let stdin = match &self.task.stdin {
            Some(p) => {
                let p = self.path(p);
                Stdio::from(
                    std::fs::File::open(&p).map_err(|e| ExecError::copy(p.display(), e))?,
                )
            }
            None => Stdio::null(),
        };
        let out = |p: &Option<PathBuf>| -> ExecResult<Stdio> {
            match p {
                Some(p) => {
                    let p = self.path(p);
                    Ok(Stdio::from(
                        std::fs::File::create(&p).map_err(|e| ExecError::copy(p.display(), e))?,
                    ))
                }
                None => Ok(Stdio::null()),
            }
        };
        Ok((stdin, out(&self.task.stdout)?, out(&self.task.stderr)?))
    }

    fn running_time(&self) -> f64 {
        let Some(started) = self.started_at else {
            return 0.0;
        };
        let paused = self.paused_total + self.paused_since.map(|p| p.elapsed()).unwrap_or_default();
        started.elapsed().saturating_sub(paused).as_secs_f64()
    }

    fn sample_cpu(&mut self) {
        let sample = match self.pid {
            Some(pid) => process_cpu_seconds(pid).unwrap_or_else(|| self.running_time()),
            None => return,
        };
        if sample > self.cpu_seconds {
            self.cpu_seconds = sample;
        }
    }

    #[cfg(unix)]
    fn signal(&self, signal: JobSignal) -> ExecResult<()> {
        let pid = self.pid.ok_or(ExecError::NotStarted)?;
        let signal = match signal {
            JobSignal::Stop => libc::SIGSTOP,
            JobSignal::Continue => libc::SIGCONT,
        };
        crate::util::send_signal(pid, signal).map_err(ExecError::from)
    }

    #[cfg(not(unix))]
    fn signal(&self, _signal: JobSignal) -> ExecResult<()> {
        Err(ExecError::Unsupported("suspending native processes"))
    }
}

#[derive(Debug, Clone, Copy)]
enum JobSignal {
    Stop,
    Continue,
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Exit code, or `128 + signal` for a signal-terminated process.
        fn exit_code_of(status: std::process::ExitStatus) -> i32 {
            use std::os::unix::process::ExitStatusExt;
            status.code().unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
        }
    } else {
        fn exit_code_of(status: std::process::ExitStatus) -> i32 {
            status.code().unwrap_or(-1)
        }
    }
}

/// Spawn, retrying briefly on `ETXTBSY`: a freshly copied app can still be
/// open for writing in a concurrently forked child.
async fn spawn(cmd: &mut tokio::process::Command) -> std::io::Result<Child> {
    let mut attempts = 0;
    loop {
        match cmd.spawn() {
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) && attempts < 10 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            other => return other,
        }
    }
}

#[async_trait]
impl ExecutionBackend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    async fn start(&mut self) -> ExecResult<()> {
        for input in &self.task.input_files {
            let p = self.path(input);
            if tokio::fs::metadata(&p).await.is_err() {
                return Err(ExecError::copy(p.display(), "input file missing"));
            }
        }
        let app = self.prepare_app().await?;
        let (stdin, stdout, stderr) = self.open_stdio()?;
        let args = self.task.args();

        trace!(target: "vmwrap.exec.proc", index = self.index, program = %app.display(), ?args, "spawn");

        let mut cmd = cmd_program(&app, &args);
        cmd.current_dir(&self.cfg.workdir)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);
        if let Some(marker) = &self.task.checkpoint_marker {
            cmd.env(CHECKPOINT_MARKER_ENV, self.path(marker));
        }
        attach_rlimits(&mut cmd, &self.cfg.rlimits);

        let child = spawn(&mut cmd)
            .await
            .map_err(|e| ExecError::Creation(format!("spawn {}: {e}", app.display())))?;
        self.pid = child.id();
        self.child = Some(child);
        self.started_at = Some(Instant::now());
        debug!(target: "vmwrap.exec.proc", index = self.index, pid = ?self.pid, "started");
        Ok(())
    }

    async fn poll(&mut self) -> ExecResult<PollStatus> {
        if let Some(code) = self.exit_code {
            return Ok(PollStatus::Ready(Completion::code(code)));
        }
        self.sample_cpu();
        let child = self.child.as_mut().ok_or(ExecError::NotStarted)?;
        let Some(status) = child.try_wait()? else {
            return Ok(PollStatus::Running);
        };

        let code = exit_code_of(status);
        debug!(target: "vmwrap.exec.proc", index = self.index, code, "exited");
        self.exit_code = Some(code);
        self.child = None;
        Ok(PollStatus::Ready(Completion::code(code)))
    }

    async fn pause(&mut self) -> ExecResult<()> {
        self.sample_cpu();
        self.signal(JobSignal::Stop)?;
        self.paused_since.get_or_insert_with(Instant::now);
        Ok(())
    }

    async fn resume(&mut self) -> ExecResult<()> {
        self.signal(JobSignal::Continue)?;
        if let Some(since) = self.paused_since.take() {
            self.paused_total += since.elapsed();
        }
        Ok(())
    }

    async fn cpu_time(&mut self) -> f64 {
        if self.exit_code.is_none() {
            self.sample_cpu();
        }
        self.cpu_seconds
    }

    async fn checkpoint_if_due(&mut self, _period: Duration) -> ExecResult<bool> {
        Ok(false)
    }

    async fn kill(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.sample_cpu();
        if let Err(e) = child.start_kill() {
            warn!(target: "vmwrap.exec.proc", index = self.index, error = %e, "kill failed");
        }
        match tokio::time::timeout(self.cfg.kill_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(target: "vmwrap.exec.proc", index = self.index, ?status, "killed");
            }
            Ok(Err(e)) => {
                warn!(target: "vmwrap.exec.proc", index = self.index, error = %e, "wait after kill failed");
            }
            Err(_) => {
                warn!(target: "vmwrap.exec.proc", index = self.index, "process did not exit within kill timeout");
            }
        }
    }

    async fn finalize(&mut self) -> ExecResult<()> {
        for output in &self.task.output_files {
            let p = self.path(output);
            if tokio::fs::metadata(&p).await.is_err() {
                warn!(target: "vmwrap.exec.proc", index = self.index, path = %p.display(), "declared output missing");
            }
        }
        Ok(())
    }
}
