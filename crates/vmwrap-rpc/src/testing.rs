//! In-memory [`VmRpc`] used by tests across the workspace.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{CommandResult, CommandSpec, RpcError, VmRpc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeVmState {
    Stopped,
    Running,
    Paused,
    Saved,
}

#[derive(Debug)]
struct FakeVm {
    image: String,
    state: FakeVmState,
    snapshots: u32,
    guest_files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct Inner {
    vms: BTreeMap<String, FakeVm>,
    calls: Vec<String>,
    next_id: u64,
    /// Command id -> polls remaining before it finishes.
    pending: HashMap<String, u32>,
    results: HashMap<String, CommandResult>,
    submitted: Vec<CommandSpec>,
    failing: HashSet<&'static str>,
    /// Number of upcoming `ping` calls that report unreachable.
    unreachable_pings: u32,
    service_down: bool,
    copy_out_failures: u32,
    polls_to_finish: u32,
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// Scriptable fake of the VM management service.
///
/// `copy_file_out` writes `guest_files[guest]` to the host path; copy-in
/// reads the host file into the guest map.
#[derive(Debug, Default)]
pub struct FakeVmRpc {
    inner: Mutex<Inner>,
}

impl FakeVmRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `op` fail with a rejection.
    pub fn fail_on(self, op: &'static str) -> Self {
        self.inner.lock().unwrap().failing.insert(op);
        self
    }

    /// The next `n` guest pings report unreachable.
    pub fn unreachable_pings(self, n: u32) -> Self {
        self.inner.lock().unwrap().unreachable_pings = n;
        self
    }

    /// Service-level pings never succeed.
    pub fn service_down(self) -> Self {
        self.inner.lock().unwrap().service_down = true;
        self
    }

    /// The next `n` copy-out calls fail with a connectivity error.
    pub fn copy_out_failures(self, n: u32) -> Self {
        self.inner.lock().unwrap().copy_out_failures = n;
        self
    }

    /// Commands finish after `polls` calls to `list_finished_commands`.
    pub fn finish_after(self, polls: u32) -> Self {
        self.inner.lock().unwrap().polls_to_finish = polls;
        self
    }

    /// Exit code and output reported for finished commands.
    pub fn command_outcome(self, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.exit_code = exit_code;
            inner.stdout = stdout.to_string();
            inner.stderr = stderr.to_string();
        }
        self
    }

    /// Pre-register a VM, e.g. to simulate a leftover from an earlier run.
    pub fn with_vm(self, vm: &str, state: FakeVmState, snapshots: u32) -> Self {
        self.inner.lock().unwrap().vms.insert(
            vm.to_string(),
            FakeVm {
                image: "preexisting".into(),
                state,
                snapshots,
                guest_files: BTreeMap::new(),
            },
        );
        self
    }

    /// Place a file in a VM's guest filesystem (the VM is created if unknown).
    pub fn put_guest_file(&self, vm: &str, guest: &str, content: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.vms.entry(vm.to_string()).or_insert_with(|| FakeVm {
            image: "preexisting".into(),
            state: FakeVmState::Stopped,
            snapshots: 0,
            guest_files: BTreeMap::new(),
        });
        entry.guest_files.insert(guest.to_string(), content.to_vec());
    }

    pub fn set_failing(&self, op: &'static str, failing: bool) {
        let mut inner = self.inner.lock().unwrap();
        if failing {
            inner.failing.insert(op);
        } else {
            inner.failing.remove(op);
        }
    }

    /// Every call in order, formatted as `op` or `op:vm`.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.split(':').next() == Some(op))
            .count()
    }

    pub fn state(&self, vm: &str) -> Option<FakeVmState> {
        self.inner.lock().unwrap().vms.get(vm).map(|v| v.state)
    }

    pub fn image(&self, vm: &str) -> Option<String> {
        self.inner.lock().unwrap().vms.get(vm).map(|v| v.image.clone())
    }

    pub fn snapshots(&self, vm: &str) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .vms
            .get(vm)
            .map(|v| v.snapshots)
            .unwrap_or(0)
    }

    pub fn guest_file(&self, vm: &str, guest: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .vms
            .get(vm)
            .and_then(|v| v.guest_files.get(guest).cloned())
    }

    pub fn submitted(&self) -> Vec<CommandSpec> {
        self.inner.lock().unwrap().submitted.clone()
    }

    /// VMs still in the running (or paused) state.
    pub fn running(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .vms
            .iter()
            .filter(|(_, v)| matches!(v.state, FakeVmState::Running | FakeVmState::Paused))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn enter(&self, op: &'static str, vm: Option<&str>) -> Result<std::sync::MutexGuard<'_, Inner>, RpcError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(match vm {
            Some(vm) => format!("{op}:{vm}"),
            None => op.to_string(),
        });
        if inner.failing.contains(op) {
            return Err(RpcError::Rejected {
                op,
                message: "injected failure".into(),
            });
        }
        Ok(inner)
    }
}

fn vm_mut<'a>(inner: &'a mut Inner, op: &'static str, vm: &str) -> Result<&'a mut FakeVm, RpcError> {
    inner.vms.get_mut(vm).ok_or_else(|| RpcError::Rejected {
        op,
        message: format!("unknown vm {vm}"),
    })
}

#[async_trait]
impl VmRpc for FakeVmRpc {
    async fn create(&self, vm: &str, image: &str) -> Result<(), RpcError> {
        let mut inner = self.enter("create", Some(vm))?;
        inner.vms.insert(
            vm.to_string(),
            FakeVm {
                image: image.to_string(),
                state: FakeVmState::Stopped,
                snapshots: 0,
                guest_files: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn start(&self, vm: &str) -> Result<(), RpcError> {
        let mut inner = self.enter("start", Some(vm))?;
        vm_mut(&mut inner, "start", vm)?.state = FakeVmState::Running;
        Ok(())
    }

    async fn pause(&self, vm: &str) -> Result<(), RpcError> {
        let mut inner = self.enter("pause", Some(vm))?;
        vm_mut(&mut inner, "pause", vm)?.state = FakeVmState::Paused;
        Ok(())
    }

    async fn unpause(&self, vm: &str) -> Result<(), RpcError> {
        let mut inner = self.enter("unpause", Some(vm))?;
        vm_mut(&mut inner, "unpause", vm)?.state = FakeVmState::Running;
        Ok(())
    }

    async fn restore_snapshot(&self, vm: &str) -> Result<bool, RpcError> {
        let mut inner = self.enter("restore_snapshot", Some(vm))?;
        Ok(vm_mut(&mut inner, "restore_snapshot", vm)?.snapshots > 0)
    }

    async fn save_snapshot(&self, vm: &str) -> Result<(), RpcError> {
        let mut inner = self.enter("save_snapshot", Some(vm))?;
        vm_mut(&mut inner, "save_snapshot", vm)?.snapshots += 1;
        Ok(())
    }

    async fn save_state(&self, vm: &str) -> Result<(), RpcError> {
        let mut inner = self.enter("save_state", Some(vm))?;
        vm_mut(&mut inner, "save_state", vm)?.state = FakeVmState::Saved;
        Ok(())
    }

    async fn ping(&self, vm: Option<&str>) -> Result<bool, RpcError> {
        let mut inner = self.enter("ping", vm)?;
        match vm {
            None => Ok(!inner.service_down),
            Some(vm) => {
                if inner.unreachable_pings > 0 {
                    inner.unreachable_pings -= 1;
                    return Ok(false);
                }
                Ok(inner
                    .vms
                    .get(vm)
                    .is_some_and(|v| v.state == FakeVmState::Running))
            }
        }
    }

    async fn submit_command(&self, vm: &str, cmd: &CommandSpec) -> Result<String, RpcError> {
        let mut inner = self.enter("submit_command", Some(vm))?;
        vm_mut(&mut inner, "submit_command", vm)?;
        inner.next_id += 1;
        let id = format!("cmd-{}", inner.next_id);
        let polls = inner.polls_to_finish;
        inner.pending.insert(id.clone(), polls);
        inner.submitted.push(cmd.clone());
        Ok(id)
    }

    async fn list_finished_commands(&self, vm: &str) -> Result<Vec<String>, RpcError> {
        let mut inner = self.enter("list_finished_commands", Some(vm))?;
        let mut finished = Vec::new();
        let mut done = Vec::new();
        for (id, left) in inner.pending.iter_mut() {
            if *left == 0 {
                done.push(id.clone());
            } else {
                *left -= 1;
            }
        }
        for id in done {
            inner.pending.remove(&id);
            let result = CommandResult {
                exit_code: inner.exit_code,
                stdout: inner.stdout.clone(),
                stderr: inner.stderr.clone(),
            };
            inner.results.insert(id, result);
        }
        finished.extend(inner.results.keys().cloned());
        finished.sort();
        Ok(finished)
    }

    async fn get_command_result(&self, vm: &str, id: &str) -> Result<CommandResult, RpcError> {
        let inner = self.enter("get_command_result", Some(vm))?;
        inner
            .results
            .get(id)
            .cloned()
            .ok_or_else(|| RpcError::Rejected {
                op: "get_command_result",
                message: format!("unknown command {id}"),
            })
    }

    async fn copy_file_in(&self, vm: &str, host: &Path, guest: &str) -> Result<(), RpcError> {
        let mut inner = self.enter("copy_file_in", Some(vm))?;
        let content = std::fs::read(host).map_err(|e| RpcError::Rejected {
            op: "copy_file_in",
            message: format!("{}: {e}", host.display()),
        })?;
        vm_mut(&mut inner, "copy_file_in", vm)?
            .guest_files
            .insert(guest.to_string(), content);
        Ok(())
    }

    async fn copy_file_out(&self, vm: &str, guest: &str, host: &Path) -> Result<(), RpcError> {
        let mut inner = self.enter("copy_file_out", Some(vm))?;
        if inner.copy_out_failures > 0 {
            inner.copy_out_failures -= 1;
            return Err(RpcError::Unreachable("injected connectivity loss".into()));
        }
        let content = vm_mut(&mut inner, "copy_file_out", vm)?
            .guest_files
            .get(guest)
            .cloned()
            .ok_or_else(|| RpcError::Rejected {
                op: "copy_file_out",
                message: format!("no such guest file {guest}"),
            })?;
        let host: PathBuf = host.to_path_buf();
        std::fs::write(&host, content).map_err(|e| RpcError::Rejected {
            op: "copy_file_out",
            message: format!("{}: {e}", host.display()),
        })
    }

    async fn list_running(&self) -> Result<Vec<String>, RpcError> {
        drop(self.enter("list_running", None)?);
        Ok(self.running())
    }

    async fn list_available(&self) -> Result<Vec<String>, RpcError> {
        let inner = self.enter("list_available", None)?;
        Ok(inner.vms.keys().cloned().collect())
    }
}
