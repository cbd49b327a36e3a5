use vmwrap_model::SupervisorEvent;

use crate::subscriber::{Subscribe, view::log_event};

/// Subscriber writing every event to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct Journal;

impl Journal {
    pub fn new() -> Self {
        Self
    }
}

impl Subscribe for Journal {
    fn on_event(&self, event: &SupervisorEvent) {
        log_event(event);
    }

    fn name(&self) -> &'static str {
        "journal"
    }
}
