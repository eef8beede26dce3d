//! Typed, topic-based publish/subscribe bus for mission announcements.
//!
//! Uses [`tokio::sync::broadcast`] channels so every subscriber receives
//! every message without a slow subscriber blocking the mission worker.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Telemetry`] | Battery readings |
//! | [`Topic::Mission`] | State changes and finished hops |
//! | [`Topic::Alerts`] | Obstacles and emergency diversions |

use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;
use waypost_types::{Event, EventPayload, PatrolError};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Telemetry,
    Mission,
    Alerts,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    telemetry: broadcast::Sender<Event>,
    mission: broadcast::Sender<Event>,
    alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given per-topic channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (telemetry, _) = broadcast::channel(capacity);
        let (mission, _) = broadcast::channel(capacity);
        let (alerts, _) = broadcast::channel(capacity);
        Self {
            telemetry,
            mission,
            alerts,
        }
    }

    /// Publish `event` to `topic`.
    ///
    /// Returns the number of receivers handed the event, or
    /// [`PatrolError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, PatrolError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| PatrolError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Wrap `payload` in an [`Event`] stamped now and publish it.
    ///
    /// Best-effort: having no subscribers is not an error for announcers, so
    /// the result is discarded.
    pub fn announce(&self, topic: Topic, source: &str, payload: EventPayload) {
        let event = Event {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.to_string(),
            payload,
        };
        let _ = self.publish_to(topic, event);
    }

    /// Subscribe to a single topic.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::Mission => &self.mission,
            Topic::Alerts => &self.alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`].
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// `Lagged(n)` means `n` events were dropped for this subscriber; the
    /// caller decides whether to continue.  `Closed` means the bus is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypost_types::{BatteryReading, MissionState};

    fn battery_event() -> Event {
        Event {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: "test".to_string(),
            payload: EventPayload::Battery(BatteryReading::assumed_full()),
        }
    }

    #[test]
    fn publish_without_subscribers_is_an_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::Telemetry, battery_event());
        assert!(matches!(result, Err(PatrolError::Channel(_))));
    }

    #[test]
    fn announce_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.announce(
            Topic::Mission,
            "test",
            EventPayload::StateChanged { state: MissionState::Idle, cycle: 0 },
        );
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut first = bus.subscribe_to(Topic::Telemetry);
        let mut second = bus.subscribe_to(Topic::Telemetry);

        let event = battery_event();
        assert_eq!(bus.publish_to(Topic::Telemetry, event.clone())?, 2);

        assert_eq!(first.recv().await?.id, event.id);
        assert_eq!(second.recv().await?.id, event.id);
        assert_eq!(first.topic(), Topic::Telemetry);
        Ok(())
    }

    #[tokio::test]
    async fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::Alerts);
        let _telemetry = bus.subscribe_to(Topic::Telemetry);

        bus.publish_to(Topic::Telemetry, battery_event())?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), alerts.recv()).await;
        assert!(result.is_err(), "Alerts subscriber must not see Telemetry traffic");
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(8);
        let mut slow = bus.subscribe_to(Topic::Mission);
        for _ in 0..100 {
            let _ = bus.publish_to(Topic::Mission, battery_event());
        }
        let result = slow.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }
}
