//! Engine event stream.
//!
//! Components publish state transitions (proxy disabled/reactivated, rate
//! adjustments, cooldowns, detected blocks) on an [`EventBus`]. Consumers such
//! as the CLI subscribe to render them; publishing never blocks and silently
//! drops events when nobody listens.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::trace;

/// Default number of buffered events per subscriber.
const DEFAULT_CAPACITY: usize = 256;

/// A state transition published by an engine component.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A proxy crossed its failure threshold and left the rotation.
    ProxyDisabled {
        /// `host:port` of the proxy.
        proxy: String,
        /// Consecutive failures at the time of disabling.
        consecutive_failures: u32,
    },
    /// A disabled proxy passed a health probe and rejoined the rotation.
    ProxyReactivated {
        /// `host:port` of the proxy.
        proxy: String,
    },
    /// The adaptive loop changed the refill rate.
    RateAdjusted {
        /// Rate before the change (tokens/second).
        from: f64,
        /// Rate after the change (tokens/second).
        to: f64,
        /// Error rate observed over the window.
        error_rate: f64,
    },
    /// Too many consecutive denials; all admissions are rejected for a while.
    CooldownStarted {
        /// Length of the cooldown window.
        duration: Duration,
    },
    /// The cooldown window elapsed.
    CooldownEnded,
    /// A response was classified as an anti-automation block.
    BlockDetected {
        /// URL of the blocked response.
        url: String,
        /// Combined detection confidence.
        confidence: f64,
    },
}

/// Broadcast channel for [`EngineEvent`]s.
///
/// Cloning is cheap; all clones publish to the same subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Never blocks; dropped when there are no subscribers.
    pub fn emit(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            trace!("no event subscribers");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.emit(EngineEvent::CooldownEnded);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_from_clones() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let clone = bus.clone();

        clone.emit(EngineEvent::ProxyReactivated {
            proxy: "10.0.0.1:8080".to_string(),
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::ProxyReactivated {
                proxy: "10.0.0.1:8080".to_string()
            }
        );
    }
}
