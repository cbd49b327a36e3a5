pub mod bridge;
pub use bridge::{BridgeConfig, BridgeError, FileBridge, HostBridge};
#[cfg(any(test, feature = "testing"))]
pub use bridge::MemoryBridge;

pub mod checkpoint;
pub use checkpoint::CheckpointStore;

mod config;
pub use config::{ManagerConfig, SupervisorConfig};

pub mod descriptor;
pub use descriptor::DescriptorError;

pub mod error;
pub use error::{CoreError, Stage, exit_code_of};

mod fsutil;

pub mod manager;
pub use manager::ManagerLifecycle;

pub mod supervisor;
pub use supervisor::{RunSummary, Supervisor};
