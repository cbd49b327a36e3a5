//! Helper processes around VM jobs and the cleanup that must follow every run.

use std::{
    any::Any,
    future::Future,
    process::Stdio,
    sync::Arc,
    time::Instant,
};

use tokio::{process::Child, time::timeout};
use tokio_util::{sync::CancellationToken, task::AbortOnDropHandle};
use tracing::{debug, info, instrument, warn};
use vmwrap_model::{EventKind, HelperSpec, SupervisorEvent};
use vmwrap_observe::Subscribe;
use vmwrap_rpc::VmRpc;

use crate::{config::ManagerConfig, error::CoreError};

mod helper;
use helper::stop_helper;

/// Owns the helper processes and guarantees cleanup around a supervisor run.
///
/// Use [`ManagerLifecycle::scoped`] to run the supervisor; cleanup then runs
/// exactly once whatever way the run ends. Dropping the lifecycle without
/// cleanup kills the helpers.
pub struct ManagerLifecycle {
    cfg: ManagerConfig,
    rpc: Option<Arc<dyn VmRpc>>,
    /// VMs this job may have started; cleanup never touches any other.
    owned_vms: Vec<String>,
    helpers: Vec<(String, Child)>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    shutdown: CancellationToken,
    cleaned: bool,
}

impl ManagerLifecycle {
    /// Lifecycle for jobs without VM tasks: no helpers, no VMs to save.
    pub fn inactive(cfg: ManagerConfig) -> Self {
        Self {
            cfg,
            rpc: None,
            owned_vms: Vec::new(),
            helpers: Vec::new(),
            subscribers: Vec::new(),
            shutdown: CancellationToken::new(),
            cleaned: false,
        }
    }

    /// Spawn `helpers` and wait until the VM service answers a ping.
    ///
    /// `owned_vms` names the VMs this job may drive; cleanup state-saves only
    /// those, since the service can be shared with other jobs. On failure
    /// everything already spawned is stopped before returning.
    #[instrument(level = "info", skip_all, fields(helpers = helpers.len(), vms = owned_vms.len()))]
    pub async fn start(
        helpers: &[HelperSpec],
        rpc: Arc<dyn VmRpc>,
        owned_vms: Vec<String>,
        cfg: ManagerConfig,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Result<Self, CoreError> {
        let mut this = Self::inactive(cfg).with_subscribers(subscribers);
        this.rpc = Some(rpc);
        this.owned_vms = owned_vms;
        if let Err(e) = this.launch(helpers).await {
            this.cleanup().await;
            return Err(e);
        }
        Ok(this)
    }

    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Token that, once cancelled, stops the scoped run and triggers cleanup.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Process ids of helpers still owned by the lifecycle.
    pub fn helper_pids(&self) -> Vec<u32> {
        self.helpers.iter().filter_map(|(_, c)| c.id()).collect()
    }

    fn emit(&self, event: SupervisorEvent) {
        for s in &self.subscribers {
            s.on_event(&event);
        }
    }

    async fn launch(&mut self, helpers: &[HelperSpec]) -> Result<(), CoreError> {
        for spec in helpers {
            let child = tokio::process::Command::new(&spec.program)
                .args(&spec.args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| CoreError::ManagerStartup(format!("spawn {}: {e}", spec.program)))?;
            debug!(target: "vmwrap.core.manager", program = %spec.program, pid = ?child.id(), "helper spawned");
            self.emit(SupervisorEvent::new(EventKind::HelperStarted).with_reason(spec.program.clone()));
            self.helpers.push((spec.program.clone(), child));
        }
        self.wait_ready().await
    }

    async fn wait_ready(&mut self) -> Result<(), CoreError> {
        let Some(rpc) = self.rpc.clone() else {
            return Ok(());
        };
        let started = Instant::now();
        loop {
            for (program, child) in &mut self.helpers {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(CoreError::ManagerStartup(format!(
                        "helper {program} exited early: {status}"
                    )));
                }
            }
            match rpc.ping(None).await {
                Ok(true) => {
                    info!(target: "vmwrap.core.manager", waited = ?started.elapsed(), "vm service ready");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => debug!(target: "vmwrap.core.manager", error = %e, "vm service ping failed"),
            }
            if started.elapsed() + self.cfg.retry_interval > self.cfg.startup_timeout {
                return Err(CoreError::ManagerStartup(format!(
                    "vm service not ready after {:?}",
                    started.elapsed()
                )));
            }
            tokio::time::sleep(self.cfg.retry_interval).await;
        }
    }

    /// Run `fut` on its own task, then clean up.
    ///
    /// A panic in `fut` becomes [`CoreError::Internal`]; cancelling the
    /// shutdown token aborts `fut` and yields [`CoreError::Stopped`].
    pub async fn scoped<F, T>(&mut self, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let mut handle = AbortOnDropHandle::new(tokio::spawn(fut));
        let res = tokio::select! {
            biased;
            joined = &mut handle => match joined {
                Ok(res) => res,
                Err(e) if e.is_panic() => Err(CoreError::Internal(format!(
                    "supervisor panicked: {}",
                    panic_message(e.into_panic())
                ))),
                Err(e) => Err(CoreError::Internal(format!("supervisor task ended: {e}"))),
            },
            _ = self.shutdown.cancelled() => {
                warn!(target: "vmwrap.core.manager", "shutdown requested; aborting run");
                handle.abort();
                let _ = (&mut handle).await;
                Err(CoreError::Stopped { reason: "shutdown requested" })
            }
        };
        self.cleanup().await;
        res
    }

    /// Save this job's running VMs, then stop the helpers. Runs at most once.
    pub async fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        self.emit(SupervisorEvent::new(EventKind::CleanupStarted));

        if let Some(rpc) = self.rpc.clone() {
            self.save_running(rpc.as_ref()).await;
        }

        let grace = self.cfg.shutdown_timeout;
        for (program, mut child) in std::mem::take(&mut self.helpers) {
            stop_helper(&program, &mut child, grace).await;
            self.emit(SupervisorEvent::new(EventKind::HelperStopped).with_reason(program));
        }

        self.emit(SupervisorEvent::new(EventKind::CleanupFinished));
    }

    async fn save_running(&self, rpc: &dyn VmRpc) {
        if self.owned_vms.is_empty() {
            return;
        }
        let ceiling = self.cfg.save_timeout;
        let vms = match timeout(ceiling, rpc.list_running()).await {
            Ok(Ok(vms)) => vms,
            Ok(Err(e)) => {
                warn!(target: "vmwrap.core.manager", error = %e, "cannot list running vms");
                return;
            }
            Err(_) => {
                warn!(target: "vmwrap.core.manager", ?ceiling, "listing running vms timed out");
                return;
            }
        };
        for vm in vms.into_iter().filter(|vm| self.owned_vms.contains(vm)) {
            match timeout(ceiling, rpc.save_state(&vm)).await {
                Ok(Ok(())) => debug!(target: "vmwrap.core.manager", %vm, "vm saved"),
                Ok(Err(e)) => warn!(target: "vmwrap.core.manager", %vm, error = %e, "vm save failed"),
                Err(_) => warn!(target: "vmwrap.core.manager", %vm, ?ceiling, "vm save timed out"),
            }
        }
    }
}

impl Drop for ManagerLifecycle {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        if !self.helpers.is_empty() {
            warn!(target: "vmwrap.core.manager", helpers = self.helpers.len(), "dropped without cleanup; killing helpers");
        }
        for (_, child) in &mut self.helpers {
            let _ = child.start_kill();
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
