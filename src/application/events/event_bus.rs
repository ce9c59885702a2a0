//! Broadcast bus for [`SessionEvent`]s

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use super::{EventMessage, SessionEvent};

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of session events to every live subscriber.
///
/// Publishing never blocks; slow subscribers lose the oldest events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventMessage>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event`; returns how many subscribers received it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        let event_type = event.event_type();
        let session_id = event.session_id();
        match self.sender.send(EventMessage::new(event)) {
            Ok(count) => {
                trace!(event_type, %session_id, subscribers = count, "Session event published");
                count
            }
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> EventSubscriber {
        let receiver = self.sender.subscribe();
        debug!(total = self.sender.receiver_count(), "New session event subscriber");
        EventSubscriber { receiver }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventSubscriber {
    receiver: broadcast::Receiver<EventMessage>,
}

impl EventSubscriber {
    /// Next event, skipping over any that were dropped while lagging.
    /// `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Session event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub type SharedEventBus = Arc<EventBus>;

pub fn create_event_bus() -> SharedEventBus {
    Arc::new(EventBus::new())
}
