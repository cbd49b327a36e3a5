use std::{collections::VecDeque, sync::Mutex};

use async_trait::async_trait;
use vmwrap_model::{ControlSignal, ExitCode, StatusReport};

use crate::bridge::{BridgeError, HostBridge};

#[derive(Default)]
struct State {
    /// Signals handed out by the next polls, in order.
    queued: VecDeque<ControlSignal>,
    current: ControlSignal,
    polls: usize,
    reports: Vec<StatusReport>,
    concluded: Option<ExitCode>,
    fail_polls: bool,
}

/// In-memory [`HostBridge`] recording every report.
///
/// Each poll pops the next queued signal and makes it current; with an empty
/// queue the current signal repeats.
#[derive(Default)]
pub struct MemoryBridge {
    state: Mutex<State>,
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `signal` for a later poll.
    pub fn then(self, signal: ControlSignal) -> Self {
        self.state.lock().unwrap().queued.push_back(signal);
        self
    }

    /// Queue `n` quiet polls.
    pub fn quiet(self, n: usize) -> Self {
        for _ in 0..n {
            self.state.lock().unwrap().queued.push_back(ControlSignal::default());
        }
        self
    }

    /// Replace the current signal immediately.
    pub fn set(&self, signal: ControlSignal) {
        let mut s = self.state.lock().unwrap();
        s.queued.clear();
        s.current = signal;
    }

    pub fn fail_polls(self) -> Self {
        self.state.lock().unwrap().fail_polls = true;
        self
    }

    pub fn polls(&self) -> usize {
        self.state.lock().unwrap().polls
    }

    pub fn reports(&self) -> Vec<StatusReport> {
        self.state.lock().unwrap().reports.clone()
    }

    pub fn last_report(&self) -> Option<StatusReport> {
        self.state.lock().unwrap().reports.last().copied()
    }

    pub fn concluded(&self) -> Option<ExitCode> {
        self.state.lock().unwrap().concluded
    }
}

#[async_trait]
impl HostBridge for MemoryBridge {
    async fn poll_status(&self) -> Result<ControlSignal, BridgeError> {
        let mut s = self.state.lock().unwrap();
        s.polls += 1;
        if s.fail_polls {
            return Err(BridgeError::Io {
                path: "memory".into(),
                source: std::io::Error::other("injected bridge failure"),
            });
        }
        if let Some(next) = s.queued.pop_front() {
            s.current = next;
        }
        Ok(s.current)
    }

    async fn report_status(&self, report: &StatusReport) -> Result<(), BridgeError> {
        self.state.lock().unwrap().reports.push(*report);
        Ok(())
    }

    async fn conclude(&self, code: ExitCode) -> Result<(), BridgeError> {
        self.state.lock().unwrap().concluded = Some(code);
        Ok(())
    }
}
