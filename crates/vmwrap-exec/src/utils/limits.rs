//! POSIX rlimits for native task processes.
//!
//! On Unix the limits are installed in a `pre_exec` hook, i.e. in the child
//! after `fork()` and before `execve()`, so the application never runs
//! unrestricted. Elsewhere a non-empty configuration is logged and ignored.
use tokio::process::Command;

/// One `(resource, value)` pair to apply.
type Limit = (libc::c_int, u64);

/// Declarative rlimits for a native task.
///
/// `None` leaves the inherited limit unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RlimitConfig {
    /// `RLIMIT_NOFILE`.
    pub max_open_files: Option<u64>,
    /// `RLIMIT_FSIZE`; the kernel sends `SIGXFSZ` past it.
    pub max_file_size_bytes: Option<u64>,
    /// `RLIMIT_AS`.
    pub max_address_space_bytes: Option<u64>,
    /// `RLIMIT_CPU`; the kernel sends `SIGXCPU` past it.
    pub max_cpu_seconds: Option<u64>,
    /// `RLIMIT_CORE = 0` when set.
    pub disable_core_dumps: bool,
}

impl RlimitConfig {
    /// Returns `true` if no explicit limits are configured.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.limits().is_empty()
    }

    fn limits(&self) -> Vec<Limit> {
        let mut out = Vec::new();
        #[cfg(unix)]
        {
            if let Some(v) = self.max_open_files {
                out.push((libc::RLIMIT_NOFILE as libc::c_int, v));
            }
            if let Some(v) = self.max_file_size_bytes {
                out.push((libc::RLIMIT_FSIZE as libc::c_int, v));
            }
            if let Some(v) = self.max_address_space_bytes {
                out.push((libc::RLIMIT_AS as libc::c_int, v));
            }
            if let Some(v) = self.max_cpu_seconds {
                out.push((libc::RLIMIT_CPU as libc::c_int, v));
            }
            if self.disable_core_dumps {
                out.push((libc::RLIMIT_CORE as libc::c_int, 0));
            }
        }
        #[cfg(not(unix))]
        {
            if self.max_open_files.is_some()
                || self.max_file_size_bytes.is_some()
                || self.max_address_space_bytes.is_some()
                || self.max_cpu_seconds.is_some()
                || self.disable_core_dumps
            {
                out.push((0, 0));
            }
        }
        out
    }
}

/// Attach the configured limits to `cmd`.
pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
    let limits = config.limits();
    if limits.is_empty() {
        return;
    }

    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            unix_impl::attach(cmd, limits);
        } else {
            let _ = cmd;
            tracing::warn!(
                target: "vmwrap.exec.limits",
                ?config,
                "rlimits requested on a non-Unix OS; limits will be ignored"
            );
        }
    }
}

#[cfg(unix)]
mod unix_impl {
    use std::io;

    use tokio::process::Command;

    use super::Limit;

    pub fn attach(cmd: &mut Command, limits: Vec<Limit>) {
        unsafe {
            cmd.pre_exec(move || {
                for (resource, value) in &limits {
                    apply_rlimit(*resource, *value)?;
                }
                Ok(())
            });
        }
    }

    fn apply_rlimit(resource: libc::c_int, value: u64) -> io::Result<()> {
        let rlim = libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        };

        // glibc declares the resource as an enum-typed integer.
        let rc = unsafe { libc::setrlimit(resource as _, &rlim) };
        if rc != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}
