//! Process CPU accounting.

/// CPU seconds (user + system) consumed by `pid` and its descendants, if the
/// platform exposes it.
///
/// Apps are often wrapper scripts, so the whole tree counts: live descendants
/// are found by scanning `/proc`, and descendants already reaped show up in
/// their parent's `cutime`/`cstime`. A descendant re-parented away from the
/// tree drops out, so callers keep the maximum seen.
#[cfg(target_os = "linux")]
pub fn process_cpu_seconds(pid: u32) -> Option<f64> {
    let root = read_stat(pid)?;
    let table = process_table();

    let mut ticks = root.ticks();
    let mut pending = vec![pid];
    while let Some(parent) = pending.pop() {
        for (child, stat) in table.iter().filter(|(_, s)| s.ppid == parent) {
            ticks += stat.ticks();
            pending.push(*child);
        }
    }
    Some(ticks as f64 / clock_ticks())
}

#[cfg(not(target_os = "linux"))]
pub fn process_cpu_seconds(_pid: u32) -> Option<f64> {
    None
}

#[cfg(target_os = "linux")]
fn clock_ticks() -> f64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as f64 } else { 100.0 }
}

#[cfg(target_os = "linux")]
fn read_stat(pid: u32) -> Option<ProcStat> {
    parse_stat(&std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?)
}

/// Every readable process on the host; entries vanishing mid-scan are skipped.
#[cfg(target_os = "linux")]
fn process_table() -> Vec<(u32, ProcStat)> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(|pid| Some((pid, read_stat(pid)?)))
        .collect()
}

/// The `/proc/<pid>/stat` fields used for accounting, in clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcStat {
    ppid: u32,
    utime: u64,
    stime: u64,
    /// Reaped children, already summed by the kernel.
    cutime: u64,
    cstime: u64,
}

impl ProcStat {
    fn ticks(&self) -> u64 {
        self.utime + self.stime + self.cutime + self.cstime
    }
}

/// Parse a `/proc/<pid>/stat` line.
///
/// The command name may contain spaces and parentheses, so fields are counted
/// from the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat(stat: &str) -> Option<ProcStat> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().take(15).collect();
    if fields.len() < 15 {
        return None;
    }
    // fields[0] is `state` (field 3); utime is field 14.
    let signed = |s: &str| s.parse::<i64>().ok().map(|v| v.max(0) as u64);
    Some(ProcStat {
        ppid: fields[1].parse().ok()?,
        utime: fields[11].parse().ok()?,
        stime: fields[12].parse().ok()?,
        cutime: signed(fields[13])?,
        cstime: signed(fields[14])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_own_and_reaped_child_times() {
        let stat = "4242 (my app (v2)) S 1 4242 4242 0 -1 4194304 150 0 0 0 250 50 30 20 20 0 1 0 100 0 0";
        let parsed = parse_stat(stat).unwrap();
        assert_eq!(parsed.ppid, 1);
        assert_eq!((parsed.utime, parsed.stime), (250, 50));
        assert_eq!(parsed.ticks(), 350);
    }

    #[test]
    fn truncated_stat_is_none() {
        assert_eq!(parse_stat("12 (x) S 1 2"), None);
        assert_eq!(parse_stat("garbage"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn own_process_is_readable() {
        assert!(process_cpu_seconds(std::process::id()).is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn work_in_grandchildren_is_counted() {
        use std::os::unix::process::CommandExt;

        // The outer shell only waits; all the work happens one level down.
        let mut outer = std::process::Command::new("sh")
            .args(["-c", "sh -c 'while :; do :; done' & wait"])
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = outer.id();
        std::thread::sleep(std::time::Duration::from_millis(800));

        let cpu = process_cpu_seconds(pid).unwrap();

        unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
        let _ = outer.wait();
        assert!(cpu >= 0.2, "tree cpu {cpu}");
    }
}
