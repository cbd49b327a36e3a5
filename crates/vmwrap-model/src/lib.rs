//! Shared data model for the vmwrap task supervisor.
//!
//! Everything here is plain data: descriptors loaded once at startup, the
//! persisted checkpoint record, host control signals and the numeric outcomes
//! reported back to the host runtime.

mod kind;
pub use kind::BackendKind;

mod domain;
pub use domain::*;
