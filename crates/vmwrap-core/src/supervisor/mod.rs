use std::sync::Arc;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, instrument, trace, warn};
use vmwrap_exec::{BackendFactory, Completion, ExecError, ExecutionBackend, PollStatus};
use vmwrap_model::{
    CheckpointRecord, EventKind, JobDescriptor, RunPhase, StatusReport, SupervisorEvent, TaskIndex,
    TaskPhase,
};
use vmwrap_observe::Subscribe;

use crate::{
    bridge::HostBridge,
    checkpoint::CheckpointStore,
    config::SupervisorConfig,
    error::{CoreError, Stage},
};


/// Result of a run that reached the end of the job.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Completed-task count found in the checkpoint at startup.
    pub resumed_from: usize,
    pub completed: usize,
    /// Total CPU seconds of the job, previous runs included.
    pub cpu_seconds: f64,
}

/// CPU accounting carried across the tasks of one run.
struct Totals {
    /// CPU seconds of all fully completed tasks.
    cumulative: f64,
    /// CPU seconds recorded by the last checkpoint write.
    checkpoint: f64,
}

/// Per-task loop state.
struct TaskRun {
    index: TaskIndex,
    phase: TaskPhase,
    /// Progress floor: weight share of the tasks before this one.
    floor: f64,
    suspended: bool,
    /// Last CPU value read from the backend; never decreases.
    cpu: f64,
}

impl TaskRun {
    fn advance(&mut self, next: TaskPhase) {
        if !self.phase.can_transition_to(next) {
            warn!(target: "vmwrap.core.supervisor", task = self.index, from = ?self.phase, to = ?next, "unexpected task transition");
        }
        trace!(target: "vmwrap.core.supervisor", task = self.index, from = ?self.phase, to = ?next, "task transition");
        self.phase = next;
    }
}

/// Runs the job's tasks in order, one backend at a time, resuming from the
/// checkpoint store.
pub struct Supervisor {
    job: Arc<JobDescriptor>,
    store: CheckpointStore,
    bridge: Arc<dyn HostBridge>,
    backends: Arc<dyn BackendFactory>,
    cfg: SupervisorConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl Supervisor {
    pub fn new(
        job: Arc<JobDescriptor>,
        store: CheckpointStore,
        bridge: Arc<dyn HostBridge>,
        backends: Arc<dyn BackendFactory>,
    ) -> Self {
        Self {
            job,
            store,
            bridge,
            backends,
            cfg: SupervisorConfig::default(),
            subscribers: Vec::new(),
        }
    }

    pub fn with_config(mut self, cfg: SupervisorConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    fn emit(&self, event: SupervisorEvent) {
        for s in &self.subscribers {
            s.on_event(&event);
        }
    }

    async fn report(&self, report: StatusReport) {
        if let Err(e) = self.bridge.report_status(&report).await {
            warn!(target: "vmwrap.core.supervisor", error = %e, "status report failed");
        }
    }

    /// Run the job to completion or to the first failure.
    #[instrument(level = "info", skip(self), fields(tasks = self.job.len()))]
    pub async fn run(self) -> Result<RunSummary, CoreError> {
        let res = self.execute().await;
        let (phase, event) = match &res {
            Ok(summary) => (
                RunPhase::Done,
                SupervisorEvent::new(EventKind::RunFinished)
                    .with_completed(summary.completed)
                    .with_cpu(summary.cpu_seconds),
            ),
            Err(e) => (
                if matches!(e, CoreError::Stopped { .. }) {
                    RunPhase::Aborted
                } else {
                    RunPhase::Failed
                },
                SupervisorEvent::new(EventKind::RunFinished)
                    .with_reason(e.to_string())
                    .with_exit_code(e.exit_code()),
            ),
        };
        info!(target: "vmwrap.core.supervisor", ?phase, "run ended");
        self.emit(event);
        res
    }

    async fn execute(&self) -> Result<RunSummary, CoreError> {
        let total = self.job.len();
        let record = self.store.read();
        if !record.fits(total) {
            return Err(CoreError::CheckpointInconsistency {
                completed: record.completed_task_count,
                total,
            });
        }

        let resumed_from = record.completed_task_count;
        let mut totals = Totals {
            cumulative: record.cumulative_cpu_seconds,
            checkpoint: record.cumulative_cpu_seconds,
        };

        if record.is_complete(total) {
            self.emit(
                SupervisorEvent::new(EventKind::RunAlreadyComplete)
                    .with_completed(total)
                    .with_cpu(totals.cumulative),
            );
            self.report(StatusReport::new(totals.cumulative, totals.checkpoint, 1.0))
                .await;
            return Ok(RunSummary {
                resumed_from,
                completed: total,
                cpu_seconds: totals.cumulative,
            });
        }

        self.emit(
            SupervisorEvent::new(EventKind::RunResuming)
                .with_completed(resumed_from)
                .with_cpu(totals.cumulative),
        );
        debug!(target: "vmwrap.core.supervisor", phase = ?RunPhase::Executing, resumed_from, total, "executing");

        for index in resumed_from..total {
            self.run_task(index, &mut totals).await?;
        }

        debug!(target: "vmwrap.core.supervisor", phase = ?RunPhase::Finalizing, "all tasks completed");
        self.report(StatusReport::new(totals.cumulative, totals.checkpoint, 1.0))
            .await;
        Ok(RunSummary {
            resumed_from,
            completed: total,
            cpu_seconds: totals.cumulative,
        })
    }

    #[instrument(level = "debug", skip(self, totals))]
    async fn run_task(&self, index: TaskIndex, totals: &mut Totals) -> Result<(), CoreError> {
        let task = &self.job.tasks[index];
        let mut run = TaskRun {
            index,
            phase: TaskPhase::Init,
            floor: self.job.fraction_before(index),
            suspended: false,
            cpu: 0.0,
        };

        run.advance(TaskPhase::Starting);
        self.emit(SupervisorEvent::new(EventKind::TaskStarting).with_task(index));
        self.report(StatusReport::new(totals.cumulative, totals.checkpoint, run.floor))
            .await;

        let mut backend = match self.backends.build(task, index) {
            Ok(b) => b,
            Err(e) => return Err(self.task_failed(&mut run, CoreError::exec(index, Stage::Start, e))),
        };

        let outcome = match backend.start().await {
            Ok(()) => {
                run.advance(TaskPhase::Running);
                self.emit(SupervisorEvent::new(EventKind::TaskRunning).with_task(index));
                self.supervise(backend.as_mut(), &mut run, totals).await
            }
            Err(e) => Err(CoreError::exec(index, Stage::Start, e)),
        };
        let completion = match outcome {
            Ok(c) => c,
            Err(e) => {
                backend.kill().await;
                return Err(self.task_failed(&mut run, e));
            }
        };

        run.advance(TaskPhase::Ready);
        self.emit(SupervisorEvent::new(EventKind::TaskReady).with_task(index));
        debug!(target: "vmwrap.core.supervisor", task = index, exit_code = completion.exit_code, "application finished");

        if let Err(e) = backend.finalize().await {
            backend.kill().await;
            return Err(self.task_failed(&mut run, CoreError::exec(index, Stage::Finalize, e)));
        }
        let cpu = backend.cpu_time().await.max(run.cpu);
        drop(backend);

        totals.cumulative += cpu;
        totals.checkpoint = totals.cumulative;
        if let Err(e) = self
            .store
            .write(&CheckpointRecord::new(index + 1, totals.cumulative))
        {
            return Err(self.task_failed(&mut run, CoreError::Checkpoint(e)));
        }

        run.advance(TaskPhase::Completed);
        self.emit(
            SupervisorEvent::new(EventKind::TaskCompleted)
                .with_task(index)
                .with_completed(index + 1)
                .with_cpu(totals.cumulative),
        );
        self.report(StatusReport::new(
            totals.cumulative,
            totals.checkpoint,
            self.job.fraction_before(index + 1),
        ))
        .await;
        Ok(())
    }

    /// Poll loop of one started task. Returns once the application exited 0.
    async fn supervise(
        &self,
        backend: &mut dyn ExecutionBackend,
        run: &mut TaskRun,
        totals: &mut Totals,
    ) -> Result<Completion, CoreError> {
        let index = run.index;
        let poll_err = |e: ExecError| CoreError::exec(index, Stage::Poll, e);

        let mut ticker = interval(self.cfg.poll_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match backend.poll().await.map_err(poll_err)? {
                PollStatus::Ready(c) if c.exit_code != 0 => {
                    return Err(poll_err(ExecError::ChildFailure {
                        code: c.exit_code,
                        stdout: c.stdout.unwrap_or_default(),
                        stderr: c.stderr.unwrap_or_default(),
                    }));
                }
                PollStatus::Ready(c) => return Ok(c),
                PollStatus::Running => {}
            }

            let signal = self.bridge.poll_status().await?;
            if let Some(reason) = signal.stop_reason() {
                self.emit(
                    SupervisorEvent::new(EventKind::StopRequested)
                        .with_task(index)
                        .with_reason(reason),
                );
                return Err(CoreError::Stopped { reason });
            }

            if signal.suspended && !run.suspended {
                backend.pause().await.map_err(poll_err)?;
                run.suspended = true;
                run.advance(TaskPhase::Suspended);
                self.emit(SupervisorEvent::new(EventKind::TaskSuspended).with_task(index));
            } else if !signal.suspended && run.suspended {
                backend.resume().await.map_err(poll_err)?;
                run.suspended = false;
                run.advance(TaskPhase::Running);
                self.emit(SupervisorEvent::new(EventKind::TaskResumed).with_task(index));
            }

            if !run.suspended {
                run.cpu = run.cpu.max(backend.cpu_time().await);
                if backend
                    .checkpoint_if_due(self.cfg.checkpoint_period)
                    .await
                    .map_err(poll_err)?
                {
                    let cpu = totals.cumulative + run.cpu;
                    self.store
                        .write(&CheckpointRecord::new(index, cpu))
                        .map_err(CoreError::Checkpoint)?;
                    totals.checkpoint = cpu;
                    self.emit(
                        SupervisorEvent::new(EventKind::CheckpointSaved)
                            .with_task(index)
                            .with_completed(index)
                            .with_cpu(cpu),
                    );
                }
            }

            self.report(StatusReport::new(
                totals.cumulative + run.cpu,
                totals.checkpoint,
                run.floor,
            ))
            .await;
        }
    }

    fn task_failed(&self, run: &mut TaskRun, err: CoreError) -> CoreError {
        run.advance(TaskPhase::Failed);
        if !matches!(err, CoreError::Stopped { .. }) {
            self.emit(
                SupervisorEvent::new(EventKind::TaskFailed)
                    .with_task(run.index)
                    .with_reason(err.to_string())
                    .with_exit_code(err.exit_code()),
            );
        }
        err
    }
}
