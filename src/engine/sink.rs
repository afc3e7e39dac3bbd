use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::engine::state::UpdateEvent;

/// Receiver side of the update pipeline, registered once by the front end.
///
/// Called from worker tasks, possibly from the fetch and the download worker
/// at the same time. Implementations must not block for long.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UpdateEvent);
}

impl EventSink for mpsc::UnboundedSender<UpdateEvent> {
    fn emit(&self, event: UpdateEvent) {
        // A closed receiver means the front end is gone; nothing left to tell.
        let _ = self.send(event);
    }
}

/// Sink that keeps every event in memory, in delivery order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<UpdateEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UpdateEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: UpdateEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
