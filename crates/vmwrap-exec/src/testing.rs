//! Scripted backends for exercising the supervisor without processes or VMs.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use vmwrap_model::{BackendKind, TaskDescriptor, TaskIndex};

use crate::{
    backend::{BackendFactory, Completion, ExecutionBackend, PollStatus},
    error::{ExecError, ExecResult},
};

/// Failure a scripted backend injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `start` fails with a creation error.
    Creation,
    /// `start` fails with a connectivity timeout.
    ConnectTimeout,
    /// `start` fails with a submission timeout.
    SubmitTimeout,
    /// `poll` fails with a connectivity timeout.
    PollLost,
    /// `finalize` fails with a copy error.
    Copy,
    /// `poll` panics.
    Panic,
}

/// Behaviour of one scripted task.
#[derive(Debug, Clone)]
pub struct TaskScript {
    /// Polls reporting `Running` before the task becomes ready.
    pub polls_to_finish: u32,
    pub exit_code: i32,
    /// CPU seconds added per unpaused poll.
    pub cpu_per_poll: f64,
    pub fault: Option<Fault>,
}

impl Default for TaskScript {
    fn default() -> Self {
        Self {
            polls_to_finish: 1,
            exit_code: 0,
            cpu_per_poll: 0.5,
            fault: None,
        }
    }
}

impl TaskScript {
    pub fn finishing_after(polls: u32) -> Self {
        Self {
            polls_to_finish: polls,
            ..Self::default()
        }
    }

    /// Never becomes ready on its own.
    pub fn endless() -> Self {
        Self::finishing_after(u32::MAX)
    }

    pub fn exiting_with(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn with_cpu_per_poll(mut self, cpu: f64) -> Self {
        self.cpu_per_poll = cpu;
        self
    }
}

/// Builds [`ScriptedBackend`]s and records every call they receive.
///
/// Calls are logged as `op:index`, e.g. `start:0` or `finalize:2`.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    scripts: HashMap<TaskIndex, TaskScript>,
    default: TaskScript,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, index: TaskIndex, script: TaskScript) -> Self {
        self.scripts.insert(index, script);
        self
    }

    /// Script used for tasks without their own entry.
    pub fn default_script(mut self, script: TaskScript) -> Self {
        self.default = script;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(':').next() == Some(op))
            .count()
    }

    /// Indices of tasks in the order they were started.
    pub fn started(&self) -> Vec<TaskIndex> {
        self.calls()
            .iter()
            .filter_map(|c| c.strip_prefix("start:"))
            .filter_map(|i| i.parse().ok())
            .collect()
    }
}

impl BackendFactory for ScriptedFactory {
    fn build(&self, task: &TaskDescriptor, index: TaskIndex) -> ExecResult<Box<dyn ExecutionBackend>> {
        let script = self.scripts.get(&index).unwrap_or(&self.default).clone();
        Ok(Box::new(ScriptedBackend {
            kind: task.backend,
            index,
            script,
            polls: 0,
            cpu: 0.0,
            paused: false,
            last_checkpoint: Instant::now(),
            log: Arc::clone(&self.log),
        }))
    }
}

pub struct ScriptedBackend {
    kind: BackendKind,
    index: TaskIndex,
    script: TaskScript,
    polls: u32,
    cpu: f64,
    paused: bool,
    last_checkpoint: Instant,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedBackend {
    fn record(&self, op: &str) {
        self.log.lock().unwrap().push(format!("{op}:{}", self.index));
    }

    fn faulted(&self, fault: Fault) -> bool {
        self.script.fault == Some(fault)
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn start(&mut self) -> ExecResult<()> {
        self.record("start");
        match self.script.fault {
            Some(Fault::Creation) => Err(ExecError::Creation("scripted".into())),
            Some(Fault::ConnectTimeout) => Err(ExecError::ConnectTimeout {
                what: "scripted vm".into(),
                waited: Duration::from_secs(1),
            }),
            Some(Fault::SubmitTimeout) => Err(ExecError::SubmitTimeout {
                waited: Duration::from_secs(1),
                reason: "scripted".into(),
            }),
            _ => Ok(()),
        }
    }

    async fn poll(&mut self) -> ExecResult<PollStatus> {
        self.record("poll");
        if self.faulted(Fault::Panic) {
            panic!("scripted panic in task {}", self.index);
        }
        if self.faulted(Fault::PollLost) {
            return Err(ExecError::ConnectTimeout {
                what: "scripted vm".into(),
                waited: Duration::from_secs(1),
            });
        }
        if !self.paused {
            self.cpu += self.script.cpu_per_poll;
        }
        if self.polls >= self.script.polls_to_finish {
            return Ok(PollStatus::Ready(Completion::code(self.script.exit_code)));
        }
        self.polls += 1;
        Ok(PollStatus::Running)
    }

    async fn pause(&mut self) -> ExecResult<()> {
        self.record("pause");
        self.paused = true;
        Ok(())
    }

    async fn resume(&mut self) -> ExecResult<()> {
        self.record("resume");
        self.paused = false;
        Ok(())
    }

    async fn cpu_time(&mut self) -> f64 {
        self.cpu
    }

    /// VM tasks checkpoint whenever `period` elapsed; native tasks never do.
    async fn checkpoint_if_due(&mut self, period: Duration) -> ExecResult<bool> {
        if self.kind != BackendKind::Vm || self.paused || self.last_checkpoint.elapsed() < period {
            return Ok(false);
        }
        self.last_checkpoint = Instant::now();
        self.record("checkpoint");
        Ok(true)
    }

    async fn kill(&mut self) {
        self.record("kill");
    }

    async fn finalize(&mut self) -> ExecResult<()> {
        self.record("finalize");
        if self.faulted(Fault::Copy) {
            return Err(ExecError::copy("scripted.out", "scripted"));
        }
        Ok(())
    }
}
