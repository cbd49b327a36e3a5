use serde::{Deserialize, Serialize};

/// Control flags published by the host runtime, read once per poll tick.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSignal {
    pub suspended: bool,
    pub no_heartbeat: bool,
    pub quit_requested: bool,
    pub abort_requested: bool,
}

impl ControlSignal {
    /// Returns `true` if the host wants the job to stop now.
    pub fn wants_stop(&self) -> bool {
        self.quit_requested || self.abort_requested || self.no_heartbeat
    }

    /// Short label for the stop reason, if any.
    pub fn stop_reason(&self) -> Option<&'static str> {
        if self.abort_requested {
            Some("abort requested")
        } else if self.quit_requested {
            Some("quit requested")
        } else if self.no_heartbeat {
            Some("no heartbeat")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_quiet() {
        let s = ControlSignal::default();
        assert!(!s.wants_stop());
        assert_eq!(s.stop_reason(), None);
    }

    #[test]
    fn any_stop_flag_wants_stop() {
        for s in [
            ControlSignal { quit_requested: true, ..Default::default() },
            ControlSignal { abort_requested: true, ..Default::default() },
            ControlSignal { no_heartbeat: true, ..Default::default() },
        ] {
            assert!(s.wants_stop());
            assert!(s.stop_reason().is_some());
        }
        let suspended = ControlSignal { suspended: true, ..Default::default() };
        assert!(!suspended.wants_stop());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: ControlSignal = serde_json::from_str(r#"{"suspended": true}"#).unwrap();
        assert!(s.suspended);
        assert!(!s.abort_requested);
    }
}
