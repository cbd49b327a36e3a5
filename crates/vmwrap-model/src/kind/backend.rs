use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Execution backend selected for a task.
///
/// The variant is fixed when the descriptor is loaded; nothing at runtime
/// probes an object for the operations it happens to support.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Run the application as a native process on the host.
    #[default]
    Native,
    /// Run the application inside a managed virtual machine reached through the VM RPC service.
    Vm,
}

impl BackendKind {
    /// Returns a short symbolic identifier for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendKind::Native => "native",
            BackendKind::Vm => "vm",
        }
    }

    /// Returns `true` if tasks of this kind need the VM manager helpers.
    pub fn needs_manager(&self) -> bool {
        matches!(self, BackendKind::Vm)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(BackendKind::Native),
            "vm" => Ok(BackendKind::Vm),
            other => Err(format!("unknown backend kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("VM".parse::<BackendKind>().unwrap(), BackendKind::Vm);
        assert_eq!(" native ".parse::<BackendKind>().unwrap(), BackendKind::Native);
        assert!("docker".parse::<BackendKind>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&BackendKind::Vm).unwrap();
        assert_eq!(json, r#""vm""#);

        let back: BackendKind = serde_json::from_str(r#""native""#).unwrap();
        assert_eq!(back, BackendKind::Native);
    }

    #[test]
    fn only_vm_needs_manager() {
        assert!(BackendKind::Vm.needs_manager());
        assert!(!BackendKind::Native.needs_manager());
    }
}
