use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

/// Ask a helper to exit, escalating to a hard kill after `grace`.
pub(super) async fn stop_helper(program: &str, child: &mut Child, grace: Duration) {
    if let Ok(Some(status)) = child.try_wait() {
        debug!(target: "vmwrap.core.manager", program, %status, "helper already exited");
        return;
    }
    terminate(program, child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(target: "vmwrap.core.manager", program, %status, "helper stopped"),
        Ok(Err(e)) => warn!(target: "vmwrap.core.manager", program, error = %e, "waiting for helper failed"),
        Err(_) => {
            warn!(target: "vmwrap.core.manager", program, ?grace, "helper ignored SIGTERM; killing");
            if let Err(e) = child.kill().await {
                warn!(target: "vmwrap.core.manager", program, error = %e, "helper kill failed");
            }
        }
    }
}

#[cfg(unix)]
fn terminate(program: &str, child: &mut Child) {
    let Some(pid) = child.id() else { return };
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        warn!(target: "vmwrap.core.manager", program, pid, error = %std::io::Error::last_os_error(), "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn terminate(program: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(target: "vmwrap.core.manager", program, error = %e, "helper kill failed");
    }
}
