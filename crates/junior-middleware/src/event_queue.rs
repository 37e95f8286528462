//! Bounded event queue between transport background tasks and the session
//! loop.
//!
//! Producers (BLE notification pump, disconnect watcher, the simulator) hold
//! cloned [`EventSender`]s and never block: when the queue is full the newest
//! event is dropped with a warning.  Telemetry is last-value-wins, so a dropped
//! sample is superseded by the next one.  The single [`EventReceiver`] is
//! drained once per tick by the loop.

use junior_types::{Event, EventPayload, JuniorError};
use tokio::sync::mpsc;
use tracing::warn;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Create a connected sender/receiver pair.
///
/// `capacity` is clamped to at least 1.
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, EventReceiver { rx })
}

/// Cloneable producer half.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    /// Enqueue `event` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`JuniorError::Channel`] when the queue is full (the event is
    /// dropped) or the receiver is gone.
    pub fn publish(&self, event: Event) -> Result<(), JuniorError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(ev) => {
                warn!(source = %ev.source, "event queue full; dropping newest event");
                JuniorError::Channel("event queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                JuniorError::Channel("event queue closed".to_string())
            }
        })
    }

    /// Wrap `payload` in an [`Event`] stamped with `source` and enqueue it.
    pub fn post(&self, source: &str, payload: EventPayload) -> Result<(), JuniorError> {
        self.publish(Event::new(source, payload))
    }

    /// `true` once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the session loop.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventReceiver {
    /// Take everything currently queued, oldest first, without waiting.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for the next event; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
