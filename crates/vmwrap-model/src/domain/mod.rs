mod task_descriptor;
pub use task_descriptor::TaskDescriptor;

mod job;
pub use job::{HelperSpec, JobDescriptor};

mod validation;
pub use validation::ValidationError;

mod checkpoint;
pub use checkpoint::CheckpointRecord;

mod control;
pub use control::ControlSignal;

mod phase;
pub use phase::{RunPhase, TaskPhase};

mod exit_code;
pub use exit_code::ExitCode;

mod status;
pub use status::StatusReport;

mod event;
pub use event::{EventKind, SupervisorEvent};

/// Zero-based position of a task inside the job descriptor.
pub type TaskIndex = usize;
