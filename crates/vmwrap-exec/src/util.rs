use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::{ExecError, ExecResult};

pub fn cmd_program(program: &Path, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args.iter().map(|s| s.as_str()));
    cmd
}

/// Resolve a descriptor path against the working directory.
pub fn resolve(workdir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workdir.join(path)
    }
}

/// File name component, used to place host files into a flat guest directory.
pub fn file_name(path: &Path) -> ExecResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ExecError::copy(path.display(), "path has no file name"))
}

/// Guest path of `host` inside `guest_dir`.
pub fn guest_path(guest_dir: &str, host: &Path) -> ExecResult<String> {
    Ok(format!("{}/{}", guest_dir.trim_end_matches('/'), file_name(host)?))
}

#[cfg(target_family = "unix")]
pub fn send_signal(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_join_workdir() {
        let wd = Path::new("/slots/3");
        assert_eq!(resolve(wd, Path::new("in.dat")), PathBuf::from("/slots/3/in.dat"));
        assert_eq!(resolve(wd, Path::new("/abs/in.dat")), PathBuf::from("/abs/in.dat"));
    }

    #[test]
    fn guest_path_is_flat() {
        assert_eq!(
            guest_path("/root/shared/", Path::new("data/in.dat")).unwrap(),
            "/root/shared/in.dat"
        );
        assert!(matches!(
            guest_path("/root/shared", Path::new("/")),
            Err(ExecError::Copy { .. })
        ));
    }
}
