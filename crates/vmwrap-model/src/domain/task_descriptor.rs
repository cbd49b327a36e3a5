use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{BackendKind, ValidationError};

fn default_weight() -> f64 {
    1.0
}

/// Immutable description of one task of the job.
///
/// Created once by the descriptor loader and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDescriptor {
    /// Execution backend for this task.
    #[serde(default)]
    pub backend: BackendKind,
    /// VM image reference; required when `backend` is [`BackendKind::Vm`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_image: Option<String>,
    /// Application to execute (host path for native tasks, guest path for VM tasks unless copied in).
    pub app_path: PathBuf,
    /// Copy the application into the working directory (native) or the guest (VM) before running.
    #[serde(default)]
    pub copy_app: bool,
    /// Files staged before the application starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_files: Vec<PathBuf>,
    /// Files retrieved once the application finishes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<PathBuf>,
    /// Marker file the inner application may use for its own checkpoints.
    ///
    /// The supervisor passes it through and never interprets its content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_marker: Option<PathBuf>,
    /// Extra command-line text, split on whitespace into arguments.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command_line: String,
    /// Relative contribution of this task to the overall completion fraction.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl TaskDescriptor {
    /// Minimal native task running `app_path` with weight 1.
    pub fn native(app_path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Native,
            vm_image: None,
            app_path: app_path.into(),
            copy_app: false,
            input_files: Vec::new(),
            output_files: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            checkpoint_marker: None,
            command_line: String::new(),
            weight: default_weight(),
        }
    }

    /// Minimal VM task running `app_path` inside `image` with weight 1.
    pub fn vm(image: impl Into<String>, app_path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Vm,
            vm_image: Some(image.into()),
            ..Self::native(app_path)
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = command_line.into();
        self
    }

    /// Arguments derived from `command_line`.
    pub fn args(&self) -> Vec<String> {
        self.command_line
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Check the invariants the loader relies on.
    pub fn validate(&self, index: usize) -> Result<(), ValidationError> {
        if self.app_path.as_os_str().is_empty() {
            return Err(ValidationError::MissingField {
                index,
                field: "app_path",
            });
        }
        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(ValidationError::InvalidWeight {
                index,
                weight: self.weight,
            });
        }
        if self.backend == BackendKind::Vm
            && self.vm_image.as_deref().is_none_or(|s| s.trim().is_empty())
        {
            return Err(ValidationError::MissingField {
                index,
                field: "vm_image",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_uses_defaults() {
        let t: TaskDescriptor = serde_json::from_str(r#"{"app_path": "bin/worker"}"#).unwrap();
        assert_eq!(t.backend, BackendKind::Native);
        assert_eq!(t.weight, 1.0);
        assert!(!t.copy_app);
        assert!(t.input_files.is_empty());
        assert!(t.validate(0).is_ok());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let res = serde_json::from_str::<TaskDescriptor>(r#"{"app_path": "a", "priority": 3}"#);
        assert!(res.is_err());
    }

    #[test]
    fn vm_task_requires_image() {
        let mut t = TaskDescriptor::vm("img", "/opt/app");
        assert!(t.validate(0).is_ok());

        t.vm_image = Some("  ".into());
        assert_eq!(
            t.validate(4),
            Err(ValidationError::MissingField {
                index: 4,
                field: "vm_image"
            })
        );
    }

    #[test]
    fn weight_must_be_positive_and_finite() {
        for w in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let t = TaskDescriptor::native("app").with_weight(w);
            assert!(matches!(
                t.validate(1),
                Err(ValidationError::InvalidWeight { index: 1, .. })
            ));
        }
    }

    #[test]
    fn args_split_on_whitespace() {
        let t = TaskDescriptor::native("app").with_command_line("  --steps 10\t-v ");
        assert_eq!(t.args(), vec!["--steps", "10", "-v"]);
    }
}
