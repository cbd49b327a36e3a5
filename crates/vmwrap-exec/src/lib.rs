mod error;
pub use error::{ExecError, ExecResult};

mod backend;
pub use backend::{BackendContext, BackendFactory, Completion, ExecConfig, ExecutionBackend, PollStatus, backend_for};

pub mod proc;
pub use proc::NativeBackend;

pub mod vm;
pub use vm::{VmBackend, job_vm_names};

pub mod wait;

mod util;

pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::{BackendContext, BackendFactory, ExecConfig, ExecutionBackend, PollStatus, backend_for};
}
