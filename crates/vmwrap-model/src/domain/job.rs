use serde::{Deserialize, Serialize};

use crate::{TaskDescriptor, ValidationError};

/// Long-lived helper process exposing the VM management RPC endpoint.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HelperSpec {
    /// Program to execute.
    pub program: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Whole job: ordered tasks plus the helpers VM tasks depend on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDescriptor {
    /// Helper processes started before the first VM task.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub helpers: Vec<HelperSpec>,
    /// Tasks, executed strictly in this order.
    pub tasks: Vec<TaskDescriptor>,
}

impl JobDescriptor {
    pub fn new(tasks: Vec<TaskDescriptor>) -> Self {
        Self {
            helpers: Vec::new(),
            tasks,
        }
    }

    /// Number of tasks in the job.
    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Sum of all task weights.
    pub fn total_weight(&self) -> f64 {
        self.tasks.iter().map(|t| t.weight).sum()
    }

    /// Completion fraction once the first `completed` tasks are done.
    ///
    /// Clamped to `[0, 1]`; an empty job counts as complete.
    pub fn fraction_before(&self, completed: usize) -> f64 {
        let total = self.total_weight();
        if total <= 0.0 {
            return 1.0;
        }
        let done: f64 = self.tasks.iter().take(completed).map(|t| t.weight).sum();
        (done / total).clamp(0.0, 1.0)
    }

    /// Returns `true` if any task runs inside a VM.
    pub fn needs_manager(&self) -> bool {
        self.needs_manager_from(0)
    }

    /// Returns `true` if a task at or after `completed` runs inside a VM.
    pub fn needs_manager_from(&self, completed: usize) -> bool {
        self.tasks
            .iter()
            .skip(completed)
            .any(|t| t.backend.needs_manager())
    }

    /// Validate every task and helper.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tasks.is_empty() {
            return Err(ValidationError::NoTasks);
        }
        for (index, task) in self.tasks.iter().enumerate() {
            task.validate(index)?;
        }
        for (index, helper) in self.helpers.iter().enumerate() {
            if helper.program.trim().is_empty() {
                return Err(ValidationError::EmptyHelper { index });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weighted(ws: &[f64]) -> JobDescriptor {
        JobDescriptor::new(
            ws.iter()
                .map(|w| TaskDescriptor::native("app").with_weight(*w))
                .collect(),
        )
    }

    #[test]
    fn fraction_uses_strictly_earlier_weights() {
        let job = weighted(&[1.0, 1.0, 2.0]);
        assert_eq!(job.total_weight(), 4.0);
        assert_eq!(job.fraction_before(0), 0.0);
        assert_eq!(job.fraction_before(1), 0.25);
        assert_eq!(job.fraction_before(2), 0.5);
        assert_eq!(job.fraction_before(3), 1.0);
        assert_eq!(job.fraction_before(10), 1.0);
    }

    #[test]
    fn empty_job_is_invalid() {
        assert_eq!(weighted(&[]).validate(), Err(ValidationError::NoTasks));
    }

    #[test]
    fn needs_manager_only_with_vm_tasks() {
        let mut job = weighted(&[1.0]);
        assert!(!job.needs_manager());
        job.tasks.push(TaskDescriptor::vm("img", "/app"));
        assert!(job.needs_manager());
    }

    #[test]
    fn finished_vm_tasks_no_longer_need_manager() {
        let mut job = JobDescriptor::new(vec![TaskDescriptor::vm("img", "/app")]);
        job.tasks.push(TaskDescriptor::native("post"));

        assert!(job.needs_manager_from(0));
        assert!(!job.needs_manager_from(1));
        assert!(!job.needs_manager_from(2));
        assert!(!job.needs_manager_from(7));
    }

    #[test]
    fn empty_helper_program_is_invalid() {
        let mut job = weighted(&[1.0]);
        job.helpers.push(HelperSpec {
            program: " ".into(),
            args: vec![],
        });
        assert_eq!(job.validate(), Err(ValidationError::EmptyHelper { index: 0 }));
    }
}
