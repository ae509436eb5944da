//! Slider move event fan-out
//!
//! Each subscriber gets its own bounded queue. Publishing never waits: if a
//! subscriber's queue is full the event is dropped for that subscriber, so a
//! slow consumer can never stall the serial read path. Delivery is lossy by
//! contract; the tracker re-sends a slider as soon as it moves again.

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::slider::SliderMoveEvent;

/// Default per-subscriber queue depth
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 100;

/// Broadcast hub for slider move events
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<mpsc::Sender<SliderMoveEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber with the default queue depth
    pub fn subscribe(&self) -> mpsc::Receiver<SliderMoveEvent> {
        self.subscribe_with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> mpsc::Receiver<SliderMoveEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers.write().push(tx);
        debug!(subscribers = self.subscriber_count(), "New slider event subscriber");
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver a frame's events to every subscriber, in order
    ///
    /// Returns the number of (event, subscriber) deliveries that were dropped.
    pub fn publish(&self, events: &[SliderMoveEvent]) -> usize {
        if events.is_empty() {
            return 0;
        }

        let mut dropped = 0;
        let mut closed = false;

        {
            let subscribers = self.subscribers.read();
            for tx in subscribers.iter() {
                for event in events {
                    match tx.try_send(*event) {
                        Ok(()) => {}
                        Err(TrySendError::Full(event)) => {
                            dropped += 1;
                            trace!(slider_id = event.slider_id, "Subscriber queue full, dropping event");
                        }
                        Err(TrySendError::Closed(_)) => {
                            closed = true;
                            break;
                        }
                    }
                }
            }
        }

        if closed {
            self.subscribers.write().retain(|tx| !tx.is_closed());
            debug!(subscribers = self.subscriber_count(), "Pruned closed slider event subscribers");
        }

        if dropped > 0 {
            debug!(dropped, "Dropped slider events for slow subscribers");
        }

        dropped
    }
}
