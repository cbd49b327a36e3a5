use std::sync::Arc;

use tracing::{error, info, warn};
use vmwrap_core::{
    CheckpointStore, CoreError, FileBridge, HostBridge, ManagerLifecycle, Supervisor, descriptor,
    exit_code_of,
};
use vmwrap_exec::{BackendContext, BackendFactory, job_vm_names};
use vmwrap_model::ExitCode;
use vmwrap_observe::{Journal, Subscribe, logger_init};
use vmwrap_rpc::{HttpVmRpc, VmRpc};

mod config;
use config::AgentConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AgentConfig::from_env()?;
    logger_init(&cfg.logger)?;
    info!(job = %cfg.job_path.display(), workdir = %cfg.exec.workdir.display(), "vmwrapd starting");

    let bridge = Arc::new(FileBridge::new(cfg.bridge.clone()));
    let code = run(&cfg, Arc::clone(&bridge)).await;

    if let Err(e) = bridge.conclude(code).await {
        warn!(error = %e, "final status not written");
    }
    info!(%code, exit = code.code(), "vmwrapd finished");
    bridge.finish(code)
}

async fn run(cfg: &AgentConfig, bridge: Arc<FileBridge>) -> ExitCode {
    let job = match descriptor::load(&cfg.job_path) {
        Ok(job) => Arc::new(job),
        Err(e) => {
            error!(error = %e, "cannot load job");
            return CoreError::from(e).exit_code();
        }
    };
    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(Journal::new())];
    let store = CheckpointStore::new(&cfg.checkpoint_path);

    // Helpers are only worth starting for VM tasks that still have to run.
    let resume_at = store.read().completed_task_count;
    let mut ctx = BackendContext::new(cfg.exec.clone());
    let mut lifecycle = if job.needs_manager_from(resume_at) {
        let rpc: Arc<dyn VmRpc> = match HttpVmRpc::new(cfg.rpc.clone()) {
            Ok(rpc) => Arc::new(rpc),
            Err(e) => {
                error!(error = %e, "cannot build vm service client");
                return ExitCode::ManagerStartup;
            }
        };
        ctx = ctx.with_rpc(Arc::clone(&rpc));
        let owned = job_vm_names(&cfg.exec.vm_name_prefix, &job);
        match ManagerLifecycle::start(&job.helpers, rpc, owned, cfg.manager.clone(), subscribers.clone()).await {
            Ok(lifecycle) => lifecycle,
            Err(e) => {
                error!(error = %e, "helpers did not come up");
                return e.exit_code();
            }
        }
    } else {
        if job.needs_manager() {
            info!(resume_at, "no vm task left to run; helpers not started");
        }
        ManagerLifecycle::inactive(cfg.manager.clone()).with_subscribers(subscribers.clone())
    };

    let token = lifecycle.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    let supervisor = Supervisor::new(
        job,
        store,
        bridge as Arc<dyn HostBridge>,
        Arc::new(ctx) as Arc<dyn BackendFactory>,
    )
    .with_config(cfg.supervisor.clone())
    .with_subscribers(subscribers);

    let res = lifecycle.scoped(supervisor.run()).await;
    match &res {
        Ok(summary) => info!(
            completed = summary.completed,
            resumed_from = summary.resumed_from,
            cpu_seconds = summary.cpu_seconds,
            "job complete"
        ),
        Err(e) => error!(error = %e, "job did not complete"),
    }
    exit_code_of(&res)
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use tempfile::TempDir;
    use vmwrap_core::BridgeConfig;
    use vmwrap_model::{HelperSpec, JobDescriptor, TaskDescriptor};

    use super::*;

    /// Agent config rooted in `dir` for a job whose helper binary does not exist.
    fn agent(dir: &Path, checkpoint: &str) -> (AgentConfig, Arc<FileBridge>) {
        let mut job = JobDescriptor::new(vec![TaskDescriptor::vm("img", "/opt/app")]);
        job.helpers.push(HelperSpec {
            program: "/nonexistent/vm-service".into(),
            args: Vec::new(),
        });
        std::fs::write(dir.join("job.json"), serde_json::to_string(&job).unwrap()).unwrap();
        std::fs::write(dir.join("checkpoint"), checkpoint).unwrap();

        let mut cfg = AgentConfig::default();
        cfg.job_path = dir.join("job.json");
        cfg.checkpoint_path = dir.join("checkpoint");
        cfg.exec.workdir = dir.to_path_buf();
        cfg.rpc.endpoint = "http://127.0.0.1:9".into();
        cfg.manager.startup_timeout = Duration::from_millis(200);
        cfg.manager.retry_interval = Duration::from_millis(10);
        cfg.bridge = BridgeConfig {
            control_path: dir.join("control.json"),
            status_path: dir.join("status.json"),
            heartbeat_timeout: None,
        };
        let bridge = Arc::new(FileBridge::new(cfg.bridge.clone()));
        (cfg, bridge)
    }

    #[tokio::test]
    async fn finished_vm_job_succeeds_without_helpers() {
        let dir = TempDir::new().unwrap();
        let (cfg, bridge) = agent(dir.path(), "1 5.0\n");

        assert_eq!(run(&cfg, bridge).await, ExitCode::Success);
        assert_eq!(std::fs::read_to_string(&cfg.checkpoint_path).unwrap(), "1 5.0\n");
    }

    #[tokio::test]
    async fn pending_vm_task_still_requires_helpers() {
        let dir = TempDir::new().unwrap();
        let (cfg, bridge) = agent(dir.path(), "0 0\n");

        assert_eq!(run(&cfg, bridge).await, ExitCode::ManagerStartup);
    }

    #[tokio::test]
    async fn missing_job_is_descriptor_error() {
        let dir = TempDir::new().unwrap();
        let (mut cfg, bridge) = agent(dir.path(), "0 0\n");
        cfg.job_path = dir.path().join("absent.json");

        assert_eq!(run(&cfg, bridge).await, ExitCode::Descriptor);
    }
}
