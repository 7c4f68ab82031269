// Notification hub - publishes pilot and recorder events to any number of listeners

use crate::models::motion::PilotEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast channel for [`PilotEvent`]s.
///
/// Publishing never blocks: a subscriber that falls more than `capacity` events
/// behind observes `RecvError::Lagged` and skips ahead. Publishing with no
/// subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PilotEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: PilotEvent) {
        if self.sender.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PilotEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Drain everything currently buffered for `rx` without waiting
pub fn drain_events(rx: &mut broadcast::Receiver<PilotEvent>) -> Vec<PilotEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
