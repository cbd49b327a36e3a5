use std::borrow::Borrow;

use tracing::{debug, error, info, trace, warn};
use vmwrap_model::{EventKind, SupervisorEvent};

pub trait View {
    fn task(&self) -> i64;
    fn as_reason(&self) -> &str;
    fn completed(&self) -> usize;
    fn cpu_seconds(&self) -> f64;
    fn exit_code(&self) -> i32;
    fn kind(&self) -> EventKind;
    fn has_reason(&self) -> bool;
}

impl<T> View for T
where
    T: Borrow<SupervisorEvent>,
{
    /// Task index, or `-1` for run-level events.
    #[inline]
    fn task(&self) -> i64 {
        self.borrow().task.map(|t| t as i64).unwrap_or(-1)
    }
    #[inline]
    fn as_reason(&self) -> &str {
        self.borrow().reason.as_deref().unwrap_or("unknown")
    }
    #[inline]
    fn completed(&self) -> usize {
        self.borrow().completed.unwrap_or(0)
    }
    #[inline]
    fn cpu_seconds(&self) -> f64 {
        self.borrow().cpu_seconds.unwrap_or(0.0)
    }
    #[inline]
    fn exit_code(&self) -> i32 {
        self.borrow().exit_code.map(|c| c.code()).unwrap_or(0)
    }
    #[inline]
    fn kind(&self) -> EventKind {
        self.borrow().kind
    }
    #[inline]
    fn has_reason(&self) -> bool {
        self.borrow().reason.is_some()
    }
}

#[inline]
pub fn message_for(kind: EventKind) -> &'static str {
    match kind {
        // run
        EventKind::RunResuming => "resuming job from checkpoint",
        EventKind::RunAlreadyComplete => "checkpoint shows every task complete; nothing to do",
        EventKind::RunFinished => "run finished",

        // task
        EventKind::TaskStarting => "task is starting",
        EventKind::TaskRunning => "task is running",
        EventKind::TaskSuspended => "task suspended on host request",
        EventKind::TaskResumed => "task resumed on host request",
        EventKind::TaskReady => "task finished; retrieving outputs",
        EventKind::TaskCompleted => "task completed and checkpointed",
        EventKind::TaskFailed => "task failed",

        // checkpoint
        EventKind::CheckpointSaved => "checkpoint saved",

        // host
        EventKind::StopRequested => "host requested stop; killing active backend",

        // manager
        EventKind::HelperStarted => "helper process started",
        EventKind::HelperStopped => "helper process stopped",
        EventKind::CleanupStarted => "cleanup started",
        EventKind::CleanupFinished => "cleanup finished",
    }
}

#[inline]
pub fn log_event<E: View>(e: E) {
    let msg = message_for(e.kind());

    match e.kind() {
        // run
        EventKind::RunResuming => info!(
            target: "vmwrap.events",
            completed = e.completed(),
            cpu_seconds = e.cpu_seconds(),
            "{msg}"
        ),
        EventKind::RunAlreadyComplete => info!(target: "vmwrap.events", completed = e.completed(), "{msg}"),
        EventKind::RunFinished => {
            if e.exit_code() == 0 {
                info!(target: "vmwrap.events", exit_code = e.exit_code(), "{msg}")
            } else if e.has_reason() {
                error!(target: "vmwrap.events", exit_code = e.exit_code(), reason = e.as_reason(), "{msg}")
            } else {
                warn!(target: "vmwrap.events", exit_code = e.exit_code(), "{msg}")
            }
        }

        // task
        EventKind::TaskStarting => info!(target: "vmwrap.events", task = e.task(), "{msg}"),
        EventKind::TaskRunning => debug!(target: "vmwrap.events", task = e.task(), "{msg}"),
        EventKind::TaskSuspended => info!(target: "vmwrap.events", task = e.task(), "{msg}"),
        EventKind::TaskResumed => info!(target: "vmwrap.events", task = e.task(), "{msg}"),
        EventKind::TaskReady => debug!(target: "vmwrap.events", task = e.task(), "{msg}"),
        EventKind::TaskCompleted => info!(
            target: "vmwrap.events",
            task = e.task(),
            completed = e.completed(),
            cpu_seconds = e.cpu_seconds(),
            "{msg}"
        ),
        EventKind::TaskFailed => error!(
            target: "vmwrap.events",
            task = e.task(),
            reason = e.as_reason(),
            "{msg}"
        ),

        // checkpoint
        EventKind::CheckpointSaved => debug!(
            target: "vmwrap.events",
            completed = e.completed(),
            cpu_seconds = e.cpu_seconds(),
            "{msg}"
        ),

        // host
        EventKind::StopRequested => warn!(
            target: "vmwrap.events",
            task = e.task(),
            reason = e.as_reason(),
            "{msg}"
        ),

        // manager
        EventKind::HelperStarted => debug!(target: "vmwrap.events", reason = e.as_reason(), "{msg}"),
        EventKind::HelperStopped => debug!(target: "vmwrap.events", reason = e.as_reason(), "{msg}"),
        EventKind::CleanupStarted => trace!(target: "vmwrap.events", "{msg}"),
        EventKind::CleanupFinished => {
            if e.has_reason() {
                warn!(target: "vmwrap.events", reason = e.as_reason(), "{msg}")
            } else {
                debug!(target: "vmwrap.events", "{msg}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use vmwrap_model::ExitCode;

    use super::*;

    #[test]
    fn run_level_events_have_no_task() {
        let ev = SupervisorEvent::new(EventKind::RunFinished).with_exit_code(ExitCode::CleanStop);
        assert_eq!(ev.task(), -1);
        assert_eq!(ev.exit_code(), 100);
        assert_eq!(ev.as_reason(), "unknown");
    }

    #[test]
    fn view_reads_through_references() {
        let ev = SupervisorEvent::new(EventKind::TaskCompleted)
            .with_task(2)
            .with_completed(3)
            .with_cpu(1.5);
        let r = &ev;
        assert_eq!(r.task(), 2);
        assert_eq!(r.completed(), 3);
        assert_eq!(r.cpu_seconds(), 1.5);
        log_event(r);
    }
}
