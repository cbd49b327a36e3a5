use std::{
    io,
    path::PathBuf,
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use vmwrap_model::{ControlSignal, ExitCode, StatusReport};

use crate::{
    bridge::{BridgeError, HostBridge},
    fsutil::atomic_write,
};

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// JSON [`ControlSignal`] written by the host; absent means no request.
    pub control_path: PathBuf,
    /// Status file rewritten on every report.
    pub status_path: PathBuf,
    /// Control file older than this counts as a lost heartbeat.
    pub heartbeat_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            control_path: PathBuf::from("vmwrap_control.json"),
            status_path: PathBuf::from("vmwrap_status.json"),
            heartbeat_timeout: None,
        }
    }
}

/// Content of the status file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusFile {
    pub cpu_time: f64,
    pub checkpoint_cpu_time: f64,
    pub fraction_done: f64,
    pub hostname: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    /// Set once by the final report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// [`HostBridge`] speaking through files in the slot directory.
pub struct FileBridge {
    cfg: BridgeConfig,
    hostname: String,
    last: Mutex<StatusReport>,
}

impl FileBridge {
    pub fn new(cfg: BridgeConfig) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            cfg,
            hostname,
            last: Mutex::new(StatusReport::default()),
        }
    }

    fn io_err(&self, path: &std::path::Path, source: io::Error) -> BridgeError {
        BridgeError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn write_status(&self, report: &StatusReport, exit_code: Option<i32>) -> Result<(), BridgeError> {
        let status = StatusFile {
            cpu_time: report.cpu_time,
            checkpoint_cpu_time: report.checkpoint_cpu_time,
            fraction_done: report.fraction_done,
            hostname: self.hostname.clone(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            exit_code,
        };
        let body = serde_json::to_vec_pretty(&status)?;
        atomic_write(&self.cfg.status_path, &body).map_err(|e| self.io_err(&self.cfg.status_path, e))
    }

    fn heartbeat_lost(&self, modified: io::Result<SystemTime>) -> bool {
        let Some(timeout) = self.cfg.heartbeat_timeout else {
            return false;
        };
        match modified.map(|m| m.elapsed()) {
            Ok(Ok(age)) => age > timeout,
            // mtime in the future: the host just wrote it
            Ok(Err(_)) => false,
            Err(e) => {
                warn!(target: "vmwrap.core.bridge", error = %e, "control file mtime unavailable");
                false
            }
        }
    }
}

#[async_trait]
impl HostBridge for FileBridge {
    async fn poll_status(&self) -> Result<ControlSignal, BridgeError> {
        let path = &self.cfg.control_path;
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ControlSignal::default()),
            Err(e) => return Err(self.io_err(path, e)),
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| self.io_err(path, e))?;

        let mut signal = if raw.trim().is_empty() {
            ControlSignal::default()
        } else {
            serde_json::from_str(&raw).map_err(|source| BridgeError::Control {
                path: path.clone(),
                source,
            })?
        };
        if self.heartbeat_lost(meta.modified()) {
            signal.no_heartbeat = true;
        }
        trace!(target: "vmwrap.core.bridge", ?signal, "control polled");
        Ok(signal)
    }

    async fn report_status(&self, report: &StatusReport) -> Result<(), BridgeError> {
        if let Ok(mut last) = self.last.lock() {
            *last = *report;
        }
        self.write_status(report, None)
    }

    async fn conclude(&self, code: ExitCode) -> Result<(), BridgeError> {
        let mut report = self.last.lock().map(|l| *l).unwrap_or_default();
        if code.is_success() {
            report.fraction_done = 1.0;
        }
        debug!(target: "vmwrap.core.bridge", %code, "reporting final status");
        self.write_status(&report, Some(code.code()))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn bridge(dir: &TempDir, heartbeat: Option<Duration>) -> FileBridge {
        FileBridge::new(BridgeConfig {
            control_path: dir.path().join("control.json"),
            status_path: dir.path().join("status.json"),
            heartbeat_timeout: heartbeat,
        })
    }

    fn read_status(dir: &TempDir) -> StatusFile {
        serde_json::from_slice(&fs::read(dir.path().join("status.json")).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn absent_or_empty_control_file_is_quiet() {
        let dir = TempDir::new().unwrap();
        let b = bridge(&dir, None);
        assert_eq!(b.poll_status().await.unwrap(), ControlSignal::default());

        fs::write(dir.path().join("control.json"), "  \n").unwrap();
        assert_eq!(b.poll_status().await.unwrap(), ControlSignal::default());
    }

    #[tokio::test]
    async fn control_flags_are_read() {
        let dir = TempDir::new().unwrap();
        let b = bridge(&dir, Some(Duration::from_secs(3600)));
        fs::write(dir.path().join("control.json"), r#"{"suspended": true}"#).unwrap();

        let s = b.poll_status().await.unwrap();
        assert!(s.suspended);
        assert!(!s.wants_stop());
    }

    #[tokio::test]
    async fn stale_control_file_means_no_heartbeat() {
        let dir = TempDir::new().unwrap();
        let b = bridge(&dir, Some(Duration::from_millis(20)));
        fs::write(dir.path().join("control.json"), "{}").unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let s = b.poll_status().await.unwrap();
        assert!(s.no_heartbeat);
        assert_eq!(s.stop_reason(), Some("no heartbeat"));
    }

    #[tokio::test]
    async fn malformed_control_file_is_error() {
        let dir = TempDir::new().unwrap();
        let b = bridge(&dir, None);
        fs::write(dir.path().join("control.json"), "{not json").unwrap();
        assert!(matches!(b.poll_status().await, Err(BridgeError::Control { .. })));
    }

    #[tokio::test]
    async fn status_is_rewritten_and_concluded() {
        let dir = TempDir::new().unwrap();
        let b = bridge(&dir, None);

        b.report_status(&StatusReport::new(4.0, 2.0, 0.25)).await.unwrap();
        let s = read_status(&dir);
        assert_eq!(s.cpu_time, 4.0);
        assert_eq!(s.fraction_done, 0.25);
        assert!(s.exit_code.is_none());
        assert!(!s.hostname.is_empty());

        b.conclude(ExitCode::Success).await.unwrap();
        let s = read_status(&dir);
        assert_eq!(s.exit_code, Some(0));
        assert_eq!(s.fraction_done, 1.0);
        assert_eq!(s.checkpoint_cpu_time, 2.0);
    }

    #[tokio::test]
    async fn failed_conclusion_keeps_last_fraction() {
        let dir = TempDir::new().unwrap();
        let b = bridge(&dir, None);
        b.report_status(&StatusReport::new(1.0, 0.0, 0.5)).await.unwrap();
        b.conclude(ExitCode::ChildFailure).await.unwrap();

        let s = read_status(&dir);
        assert_eq!(s.exit_code, Some(6));
        assert_eq!(s.fraction_done, 0.5);
    }
}
