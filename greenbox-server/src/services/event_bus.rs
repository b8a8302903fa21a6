use std::collections::HashMap;
use std::sync::Arc;

use greenbox_api::models::{ActuatorCommand, DeviceId, GreenhouseId, MetricName};
use greenbox_control::{BandState, Transition};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{RwLock, broadcast};

pub const ACTUATOR_TOPIC: &str = "actuator";
pub const TELEMETRY_TOPIC: &str = "telemetry";
pub const DISPATCH_TOPIC: &str = "dispatch";
pub const DEVICE_TOPIC: &str = "device";
pub const TICK_TOPIC: &str = "tick";
pub const ALERT_TOPIC: &str = "alert";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ControlEvent {
    ActuatorTransition {
        greenhouse_id: GreenhouseId,
        role: String,
        transition: Transition,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    TelemetryProjected {
        greenhouse_id: GreenhouseId,
        device_id: DeviceId,
        metric: MetricName,
        value: f64,
        clamped: bool,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    CommandDispatched(ActuatorCommand),
    DispatchFailed {
        greenhouse_id: GreenhouseId,
        device_id: DeviceId,
        error: String,
        consecutive_failures: u32,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    DeviceOffline {
        greenhouse_id: GreenhouseId,
        device_id: DeviceId,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    DeviceRecovered {
        greenhouse_id: GreenhouseId,
        device_id: DeviceId,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    TickSkipped {
        greenhouse_id: GreenhouseId,
        reason: String,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    /// A thresholded metric moved between low, ok and high.
    ThresholdAlert {
        greenhouse_id: GreenhouseId,
        metric: MetricName,
        value: f64,
        previous: BandState,
        state: BandState,
        /// Whether any actuator can correct the metric
        actuated: bool,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
}

impl ControlEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            ControlEvent::ActuatorTransition { .. } => ACTUATOR_TOPIC,
            ControlEvent::TelemetryProjected { .. } => TELEMETRY_TOPIC,
            ControlEvent::CommandDispatched(_) | ControlEvent::DispatchFailed { .. } => DISPATCH_TOPIC,
            ControlEvent::DeviceOffline { .. } | ControlEvent::DeviceRecovered { .. } => DEVICE_TOPIC,
            ControlEvent::TickSkipped { .. } => TICK_TOPIC,
            ControlEvent::ThresholdAlert { .. } => ALERT_TOPIC,
        }
    }
}

pub struct EventBus {
    publishers: Arc<RwLock<HashMap<String, broadcast::Sender<ControlEvent>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            publishers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<ControlEvent> {
        let mut publishers = self.publishers.write().await;
        publishers
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }

    pub async fn publish(
        &self,
        topic: &str,
        event: ControlEvent,
    ) -> Result<usize, broadcast::error::SendError<ControlEvent>> {
        self.sender(topic).await.send(event)
    }

    /// Publishes on the event's own topic; nobody listening is not an error.
    pub async fn emit(&self, event: ControlEvent) {
        let topic = event.topic();
        if self.publish(topic, event).await.is_err() {
            tracing::trace!(topic, "control event dropped, no subscribers");
        }
    }

    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<ControlEvent> {
        self.sender(topic).await.subscribe()
    }

    pub async fn has_subscribers(&self, topic: &str) -> bool {
        let publishers = self.publishers.read().await;
        if let Some(sender) = publishers.get(topic) {
            sender.receiver_count() > 0
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skipped(greenhouse_id: &str) -> ControlEvent {
        ControlEvent::TickSkipped {
            greenhouse_id: greenhouse_id.to_string(),
            reason: "test".to_string(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let event_bus = EventBus::new();

        let mut receiver1 = event_bus.subscribe(TICK_TOPIC).await;
        let mut receiver2 = event_bus.subscribe(TICK_TOPIC).await;

        let receiver_count = event_bus.publish(TICK_TOPIC, skipped("gh_001")).await.unwrap();
        assert_eq!(receiver_count, 2);

        assert!(matches!(receiver1.recv().await, Ok(ControlEvent::TickSkipped { .. })));
        assert!(matches!(receiver2.recv().await, Ok(ControlEvent::TickSkipped { .. })));
    }

    #[tokio::test]
    async fn test_emit_routes_by_topic() {
        let event_bus = EventBus::new();

        let mut ticks = event_bus.subscribe(TICK_TOPIC).await;
        let mut devices = event_bus.subscribe(DEVICE_TOPIC).await;

        event_bus.emit(skipped("gh_001")).await;
        event_bus
            .emit(ControlEvent::DeviceOffline {
                greenhouse_id: "gh_001".to_string(),
                device_id: "fan_001".to_string(),
                timestamp: OffsetDateTime::now_utc(),
            })
            .await;

        assert!(matches!(ticks.recv().await, Ok(ControlEvent::TickSkipped { .. })));
        assert!(matches!(devices.recv().await, Ok(ControlEvent::DeviceOffline { .. })));
        assert!(ticks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let event_bus = EventBus::new();

        assert!(!event_bus.has_subscribers(TICK_TOPIC).await);
        event_bus.emit(skipped("gh_001")).await;

        let _receiver = event_bus.subscribe(TICK_TOPIC).await;
        assert!(event_bus.has_subscribers(TICK_TOPIC).await);
    }
}
