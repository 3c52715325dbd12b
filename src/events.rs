//! Events emitted by the control loop
//!
//! Every cycle ends in exactly one event: `data` on success, `error` on
//! failure. Consumers (actuator driver, record log, remote observers)
//! subscribe to the [`EventBus`] and never see each other.

use crate::control::hysteresis::Rule;
use crate::control::tokens::TokenSet;
use crate::error::StructuredError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use tokio::sync::broadcast;
use tracing::debug;

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

fn iso_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Payload of a successful cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEvent {
    #[serde(serialize_with = "iso_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub tokens: TokenSet,
    pub expected_t: f64,
    pub should_start_boiling: bool,
    /// Decision rule that fired, for diagnostics
    pub rule: Rule,
}

/// Payload of a failed cycle
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    #[serde(serialize_with = "iso_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub error: StructuredError,
}

/// Event published at the end of every cycle
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ControlEvent {
    Data(DataEvent),
    Error(ErrorEvent),
}

impl ControlEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ControlEvent::Data(data) => data.timestamp,
            ControlEvent::Error(error) => error.timestamp,
        }
    }

    pub fn as_data(&self) -> Option<&DataEvent> {
        match self {
            ControlEvent::Data(data) => Some(data),
            ControlEvent::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ControlEvent::Error(_))
    }
}

/// Fan-out of control events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ControlEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, returning how many subscribers received it
    pub fn publish(&self, event: ControlEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No subscribers for control event");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoilerError;
    use chrono::TimeZone;

    fn sample_data() -> DataEvent {
        DataEvent {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 6, 30, 0).unwrap(),
            tokens: TokenSet::default(),
            expected_t: 41.5,
            should_start_boiling: true,
            rule: Rule::DeficitBeyondTolerance,
        }
    }

    #[test]
    fn test_data_event_wire_format() {
        let json = serde_json::to_value(ControlEvent::Data(sample_data())).unwrap();

        assert_eq!(json["event"], "data");
        assert_eq!(json["timestamp"], "2024-01-15T06:30:00.000Z");
        assert_eq!(json["expectedT"], 41.5);
        assert_eq!(json["shouldStartBoiling"], true);
        assert_eq!(json["rule"], "deficit_beyond_tolerance");
        assert!(json["tokens"].is_object());
    }

    #[test]
    fn test_error_event_wire_format() {
        let error = BoilerError::sensor_read("28-a", "timeout").to_structured_error(None);
        let event = ControlEvent::Error(ErrorEvent {
            timestamp: Utc::now(),
            error,
        });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "error");
        assert_eq!(json["error"]["code_number"], 1001);
        assert_eq!(json["error"]["category"], "sensor");
        assert!(event.is_error());
        assert!(event.as_data().is_none());
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_events() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.publish(ControlEvent::Data(sample_data())), 2);

        assert_eq!(first.recv().await.unwrap().as_data(), Some(&sample_data()));
        assert_eq!(second.recv().await.unwrap().as_data(), Some(&sample_data()));
    }

    #[test]
    fn test_publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(ControlEvent::Data(sample_data())), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
