use std::{path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;
use vmwrap_core::{BridgeConfig, ManagerConfig, SupervisorConfig};
use vmwrap_exec::{ExecConfig, utils::limits::RlimitConfig};
use vmwrap_observe::{LoggerConfig, LoggerFormat};
use vmwrap_rpc::RpcConfig;

#[derive(Debug, Error)]
#[error("{key}={value:?}: {reason}")]
pub struct ConfigError {
    key: &'static str,
    value: String,
    reason: String,
}

/// Everything `vmwrapd` needs, read from `VMWRAP_*` environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub job_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub bridge: BridgeConfig,
    pub exec: ExecConfig,
    pub rpc: RpcConfig,
    pub supervisor: SupervisorConfig,
    pub manager: ManagerConfig,
    pub logger: LoggerConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            job_path: PathBuf::from("job.json"),
            checkpoint_path: PathBuf::from("vmwrap_checkpoint"),
            bridge: BridgeConfig::default(),
            exec: ExecConfig::default(),
            rpc: RpcConfig::default(),
            supervisor: SupervisorConfig::default(),
            manager: ManagerConfig::default(),
            logger: LoggerConfig::default(),
        }
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        value.trim().parse().map(Some).map_err(|e: T::Err| ConfigError {
            key,
            value,
            reason: e.to_string(),
        })
    }

    fn secs(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        let secs: Option<f64> = self.parse(key)?;
        secs.map(|s| {
            Duration::try_from_secs_f64(s).map_err(|e| ConfigError {
                key,
                value: s.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
    }

    fn flag(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError {
                key,
                value,
                reason: "expected a boolean".into(),
            }),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary variable source; unset or blank keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars { lookup };
        let mut cfg = Self::default();

        if let Some(v) = vars.get("VMWRAP_JOB") {
            cfg.job_path = v.into();
        }
        if let Some(v) = vars.get("VMWRAP_CHECKPOINT") {
            cfg.checkpoint_path = v.into();
        }
        if let Some(v) = vars.get("VMWRAP_CONTROL_FILE") {
            cfg.bridge.control_path = v.into();
        }
        if let Some(v) = vars.get("VMWRAP_STATUS_FILE") {
            cfg.bridge.status_path = v.into();
        }
        cfg.bridge.heartbeat_timeout = vars.secs("VMWRAP_HEARTBEAT_TIMEOUT_SECS")?;

        if let Some(v) = vars.get("VMWRAP_WORKDIR") {
            cfg.exec.workdir = v.into();
        }
        if let Some(v) = vars.get("VMWRAP_GUEST_WORKDIR") {
            cfg.exec.guest_workdir = v;
        }
        if let Some(v) = vars.get("VMWRAP_VM_PREFIX") {
            cfg.exec.vm_name_prefix = v;
        }
        if let Some(d) = vars.secs("VMWRAP_MAX_WAIT_SECS")? {
            cfg.exec.max_wait_time = d;
        }
        if let Some(d) = vars.secs("VMWRAP_RETRY_INTERVAL_SECS")? {
            cfg.exec.retry_interval = d;
            cfg.manager.retry_interval = d;
        }
        if let Some(d) = vars.secs("VMWRAP_KILL_TIMEOUT_SECS")? {
            cfg.exec.kill_timeout = d;
            cfg.manager.save_timeout = d;
        }
        cfg.exec.rlimits = RlimitConfig {
            max_open_files: vars.parse("VMWRAP_RLIMIT_NOFILE")?,
            max_file_size_bytes: vars.parse("VMWRAP_RLIMIT_FSIZE")?,
            max_address_space_bytes: vars.parse("VMWRAP_RLIMIT_AS")?,
            max_cpu_seconds: vars.parse("VMWRAP_RLIMIT_CPU")?,
            disable_core_dumps: vars.flag("VMWRAP_DISABLE_CORE_DUMPS")?.unwrap_or(false),
        };

        if let Some(v) = vars.get("VMWRAP_RPC_ENDPOINT") {
            cfg.rpc.endpoint = v;
        }
        if let Some(d) = vars.secs("VMWRAP_RPC_TIMEOUT_SECS")? {
            cfg.rpc.request_timeout = d;
        }

        if let Some(d) = vars.secs("VMWRAP_POLL_PERIOD_SECS")? {
            cfg.supervisor.poll_period = d;
        }
        if let Some(d) = vars.secs("VMWRAP_CHECKPOINT_PERIOD_SECS")? {
            cfg.supervisor.checkpoint_period = d;
        }
        if let Some(d) = vars.secs("VMWRAP_STARTUP_TIMEOUT_SECS")? {
            cfg.manager.startup_timeout = d;
        }
        if let Some(d) = vars.secs("VMWRAP_SHUTDOWN_TIMEOUT_SECS")? {
            cfg.manager.shutdown_timeout = d;
        }

        if let Some(v) = vars.get("VMWRAP_LOG_LEVEL") {
            cfg.logger.level = v;
        }
        if let Some(v) = vars.get("VMWRAP_LOG_FORMAT") {
            cfg.logger.format = v.parse::<LoggerFormat>().map_err(|e| ConfigError {
                key: "VMWRAP_LOG_FORMAT",
                value: v.clone(),
                reason: e.to_string(),
            })?;
        }
        if let Some(color) = vars.flag("VMWRAP_LOG_COLOR")? {
            cfg.logger.use_color = color;
        }

        if cfg.supervisor.poll_period.is_zero() {
            return Err(ConfigError {
                key: "VMWRAP_POLL_PERIOD_SECS",
                value: "0".into(),
                reason: "poll period must be positive".into(),
            });
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from(pairs: &[(&str, &str)]) -> Result<AgentConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = from(&[]).unwrap();
        assert_eq!(cfg.job_path, PathBuf::from("job.json"));
        assert_eq!(cfg.supervisor.poll_period, Duration::from_secs(1));
        assert!(cfg.bridge.heartbeat_timeout.is_none());
        assert!(cfg.exec.rlimits.is_empty());
    }

    #[test]
    fn variables_override_defaults() {
        let cfg = from(&[
            ("VMWRAP_JOB", "/slot/job.json"),
            ("VMWRAP_RPC_ENDPOINT", "http://10.0.0.2:9000"),
            ("VMWRAP_POLL_PERIOD_SECS", "0.25"),
            ("VMWRAP_MAX_WAIT_SECS", "90"),
            ("VMWRAP_HEARTBEAT_TIMEOUT_SECS", "30"),
            ("VMWRAP_RLIMIT_CPU", "3600"),
            ("VMWRAP_DISABLE_CORE_DUMPS", "yes"),
            ("VMWRAP_LOG_FORMAT", "json"),
            ("VMWRAP_LOG_LEVEL", "vmwrap=debug"),
            ("VMWRAP_CHECKPOINT", "  "),
        ])
        .unwrap();

        assert_eq!(cfg.job_path, PathBuf::from("/slot/job.json"));
        assert_eq!(cfg.rpc.endpoint, "http://10.0.0.2:9000");
        assert_eq!(cfg.supervisor.poll_period, Duration::from_millis(250));
        assert_eq!(cfg.exec.max_wait_time, Duration::from_secs(90));
        assert_eq!(cfg.bridge.heartbeat_timeout, Some(Duration::from_secs(30)));
        assert_eq!(cfg.exec.rlimits.max_cpu_seconds, Some(3600));
        assert!(cfg.exec.rlimits.disable_core_dumps);
        assert!(matches!(cfg.logger.format, LoggerFormat::Json));
        assert_eq!(cfg.logger.level, "vmwrap=debug");
        // Blank values keep the default.
        assert_eq!(cfg.checkpoint_path, PathBuf::from("vmwrap_checkpoint"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        for (key, value) in [
            ("VMWRAP_POLL_PERIOD_SECS", "soon"),
            ("VMWRAP_POLL_PERIOD_SECS", "0"),
            ("VMWRAP_MAX_WAIT_SECS", "-3"),
            ("VMWRAP_RLIMIT_NOFILE", "many"),
            ("VMWRAP_DISABLE_CORE_DUMPS", "maybe"),
            ("VMWRAP_LOG_FORMAT", "xml"),
        ] {
            let err = from(&[(key, value)]).unwrap_err();
            assert!(err.to_string().contains(key), "{err}");
        }
    }
}
