mod journal;
pub use journal::Journal;

mod view;
pub use view::{View, log_event, message_for};

use vmwrap_model::SupervisorEvent;

/// Receiver of supervisor lifecycle events.
///
/// Called inline from the supervisor loop, so implementations must not block.
pub trait Subscribe: Send + Sync {
    fn on_event(&self, event: &SupervisorEvent);

    fn name(&self) -> &'static str;
}
