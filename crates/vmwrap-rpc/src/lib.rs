//! Client side of the VM management RPC service.
//!
//! The service runs on the host (started by the manager helpers) and owns the
//! hypervisor; this crate only speaks its protocol.

mod client;
pub use client::{CommandResult, CommandSpec, VmRpc};

mod http;
pub use http::HttpVmRpc;

mod config;
pub use config::RpcConfig;

mod errors;
pub use errors::RpcError;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
