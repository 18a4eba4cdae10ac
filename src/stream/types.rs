//! Broker-agnostic message types and the consumer/producer capabilities
//! the worker depends on.

use crate::error::StreamError;
use crate::stream::cancel::CancelToken;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A message read from a topic.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: u64,
    /// Partition key (device id for both topics)
    pub key: String,
    /// JSON-encoded value
    pub payload: Vec<u8>,
    /// Broker append time
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Decode the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// A keyed value waiting to be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub key: String,
    pub payload: Vec<u8>,
}

impl OutgoingMessage {
    /// Serialize `value` as the JSON payload.
    pub fn json<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            key: key.into(),
            payload: serde_json::to_vec(value)?,
        })
    }
}

/// Broker acknowledgement of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub topic: String,
    pub partition: i32,
    pub offset: u64,
}

/// Subscribe/consume/close capability of a broker consumer.
///
/// A consumer is exclusively owned by one worker.
pub trait StreamConsumer: Send {
    /// Register interest in a topic. Repeating a successful subscribe is a no-op.
    fn subscribe(&mut self, topic: &str) -> Result<(), StreamError>;

    /// Block until a message arrives or `cancel` fires.
    ///
    /// Returns `Ok(None)` when cancellation interrupted the wait.
    fn consume(&mut self, cancel: &CancelToken) -> Result<Option<Message>, StreamError>;

    /// Release broker resources.
    fn close(&mut self) -> Result<(), StreamError>;
}

/// Produce/flush capability of a broker producer.
pub trait StreamProducer: Send + Sync {
    fn produce(&self, topic: &str, message: OutgoingMessage) -> Result<DeliveryResult, StreamError>;

    /// Drain buffered sends, waiting at most `timeout`.
    fn flush(&self, timeout: Duration) -> Result<(), StreamError>;
}

impl<P: StreamProducer + ?Sized> StreamProducer for Arc<P> {
    fn produce(&self, topic: &str, message: OutgoingMessage) -> Result<DeliveryResult, StreamError> {
        (**self).produce(topic, message)
    }

    fn flush(&self, timeout: Duration) -> Result<(), StreamError> {
        (**self).flush(timeout)
    }
}

impl<C: StreamConsumer + ?Sized> StreamConsumer for Box<C> {
    fn subscribe(&mut self, topic: &str) -> Result<(), StreamError> {
        (**self).subscribe(topic)
    }

    fn consume(&mut self, cancel: &CancelToken) -> Result<Option<Message>, StreamError> {
        (**self).consume(cancel)
    }

    fn close(&mut self) -> Result<(), StreamError> {
        (**self).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BiometricReading, DeviceId, Zone, ZoneEvent};

    #[test]
    fn test_outgoing_json_decodes_back() {
        let event = ZoneEvent {
            device_id: DeviceId::new("D1"),
            zone: Zone::Zone2,
            timestamp: Utc::now(),
            heart_rate: 125,
            threshold: 120,
            max_heart_rate: Some(150),
        };
        let outgoing = OutgoingMessage::json(event.key(), &event).unwrap();

        let message = Message {
            topic: "HeartRateZoneReached".to_string(),
            partition: 0,
            offset: 7,
            key: outgoing.key.clone(),
            payload: outgoing.payload,
            timestamp: Utc::now(),
        };
        assert_eq!(message.decode::<ZoneEvent>().unwrap(), event);

        let garbage = Message {
            payload: b"not json".to_vec(),
            ..message
        };
        assert!(garbage.decode::<BiometricReading>().is_err());
    }
}
