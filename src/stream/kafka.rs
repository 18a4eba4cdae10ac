//! Kafka adapter built on `rdkafka`.
//!
//! [`KafkaConsumer`] wraps a `BaseConsumer` in a consumer group, so the
//! cluster assigns partitions and routes every reading for a device to one
//! worker. [`KafkaProducer`] wraps a `ThreadedProducer` and waits for the
//! delivery report of each message before returning.

use crate::error::StreamError;
use crate::stream::cancel::CancelToken;
use crate::stream::types::{DeliveryResult, Message, OutgoingMessage, StreamConsumer, StreamProducer};
use chrono::{TimeZone, Utc};
use crossbeam_channel::{bounded, Sender};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as _;
use rdkafka::producer::{BaseRecord, DeliveryResult as KafkaDelivery, Producer, ProducerContext, ThreadedProducer};
use rdkafka::ClientContext;
use std::time::Duration;

/// Address scheme selecting the Kafka adapter; the rest is the bootstrap list.
pub const KAFKA_SCHEME: &str = "kafka://";

/// Time allowed for a single delivery report.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings shared by consumers and producers.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    /// Comma-separated `host:port` list
    pub bootstrap_servers: String,
    pub group_id: String,
    pub client_id: String,
    /// How long a blocked consume waits before re-checking cancellation
    pub poll_interval: Duration,
    pub delivery_timeout: Duration,
}

impl KafkaSettings {
    pub fn new(bootstrap_servers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            group_id: group_id.into(),
            client_id: "heart-rate-zones".to_string(),
            poll_interval: Duration::from_millis(100),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    /// Parse `kafka://host:9092,host2:9092`.
    pub fn from_address(address: &str, group_id: impl Into<String>) -> Option<Self> {
        let servers = address.strip_prefix(KAFKA_SCHEME)?;
        if servers.trim().is_empty() {
            return None;
        }
        Some(Self::new(servers, group_id))
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", &self.client_id);
        config
    }

    fn connection_error(&self, err: KafkaError) -> StreamError {
        StreamError::Connection {
            broker: self.bootstrap_servers.clone(),
            reason: err.to_string(),
        }
    }

    pub fn consumer(&self) -> Result<KafkaConsumer, StreamError> {
        let consumer: BaseConsumer = self
            .client_config()
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| self.connection_error(e))?;

        Ok(KafkaConsumer {
            consumer,
            settings: self.clone(),
            subscribed: None,
            closed: false,
        })
    }

    pub fn producer(&self) -> Result<KafkaProducer, StreamError> {
        let producer: ThreadedProducer<DeliveryContext> = self
            .client_config()
            .set("message.timeout.ms", self.delivery_timeout.as_millis().to_string())
            .create_with_context(DeliveryContext)
            .map_err(|e| self.connection_error(e))?;

        Ok(KafkaProducer {
            producer,
            settings: self.clone(),
        })
    }
}

/// Consumer group member reading one topic.
pub struct KafkaConsumer {
    consumer: BaseConsumer,
    settings: KafkaSettings,
    subscribed: Option<String>,
    closed: bool,
}

impl StreamConsumer for KafkaConsumer {
    fn subscribe(&mut self, topic: &str) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if self.subscribed.as_deref() == Some(topic) {
            return Ok(());
        }
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| self.settings.connection_error(e))?;
        self.subscribed = Some(topic.to_string());
        tracing::info!("Subscribed to {} as group {}", topic, self.settings.group_id);
        Ok(())
    }

    fn consume(&mut self, cancel: &CancelToken) -> Result<Option<Message>, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if self.subscribed.is_none() {
            return Err(StreamError::NotSubscribed);
        }

        // librdkafka cannot be woken from outside; bound each wait instead.
        while !cancel.is_cancelled() {
            let Some(polled) = self.consumer.poll(self.settings.poll_interval) else {
                continue;
            };
            let borrowed = polled.map_err(|e| self.settings.connection_error(e))?;

            let timestamp = borrowed
                .timestamp()
                .to_millis()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
                .unwrap_or_else(Utc::now);
            return Ok(Some(Message {
                topic: borrowed.topic().to_string(),
                partition: borrowed.partition(),
                offset: borrowed.offset().max(0) as u64,
                key: borrowed
                    .key()
                    .map(|k| String::from_utf8_lossy(k).into_owned())
                    .unwrap_or_default(),
                payload: borrowed.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                timestamp,
            }));
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.closed = true;
        if self.subscribed.take().is_some() {
            self.consumer.unsubscribe();
        }
        Ok(())
    }
}

type DeliveryReply = Sender<Result<(i32, i64), String>>;

/// Forwards delivery reports to the thread waiting in `produce`.
pub struct DeliveryContext;

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = Box<DeliveryReply>;

    fn delivery(&self, result: &KafkaDelivery<'_>, reply: Self::DeliveryOpaque) {
        let report = match result {
            Ok(message) => Ok((message.partition(), message.offset())),
            Err((err, _)) => Err(err.to_string()),
        };
        let _ = reply.send(report);
    }
}

/// Producer publishing keyed JSON values.
pub struct KafkaProducer {
    producer: ThreadedProducer<DeliveryContext>,
    settings: KafkaSettings,
}

impl StreamProducer for KafkaProducer {
    fn produce(&self, topic: &str, message: OutgoingMessage) -> Result<DeliveryResult, StreamError> {
        let publish_error = |reason: String| StreamError::Publish {
            topic: topic.to_string(),
            key: message.key.clone(),
            reason,
        };

        let (reply, report) = bounded(1);
        let record = BaseRecord::with_opaque_to(topic, Box::new(reply))
            .key(message.key.as_str())
            .payload(message.payload.as_slice());
        self.producer
            .send(record)
            .map_err(|(e, _)| publish_error(e.to_string()))?;

        match report.recv_timeout(self.settings.delivery_timeout) {
            Ok(Ok((partition, offset))) => Ok(DeliveryResult {
                topic: topic.to_string(),
                partition,
                offset: offset.max(0) as u64,
            }),
            Ok(Err(reason)) => Err(publish_error(reason)),
            Err(_) => Err(StreamError::Connection {
                broker: self.settings.bootstrap_servers.clone(),
                reason: format!("no delivery report within {:?}", self.settings.delivery_timeout),
            }),
        }
    }

    fn flush(&self, timeout: Duration) -> Result<(), StreamError> {
        self.producer
            .flush(timeout)
            .map_err(|e| self.settings.connection_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parsing() {
        let settings = KafkaSettings::from_address("kafka://b1:9092,b2:9092", "zones").unwrap();
        assert_eq!(settings.bootstrap_servers, "b1:9092,b2:9092");
        assert_eq!(settings.group_id, "zones");

        assert!(KafkaSettings::from_address("kafka://", "zones").is_none());
        assert!(KafkaSettings::from_address("memory://local", "zones").is_none());
    }

    #[test]
    fn test_consumer_requires_subscription() {
        // Creating a client does not contact the cluster.
        let settings = KafkaSettings::new("127.0.0.1:1", "zones");
        let mut consumer = settings.consumer().unwrap();

        assert!(matches!(
            consumer.consume(&CancelToken::new()),
            Err(StreamError::NotSubscribed)
        ));
        consumer.close().unwrap();
        assert!(matches!(consumer.subscribe("readings"), Err(StreamError::Closed)));
    }
}
