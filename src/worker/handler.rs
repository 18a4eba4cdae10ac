//! Per-message handling strategies.
//!
//! The worker takes its handler by composition: production code passes a
//! [`ZoneHandler`], tests pass closures or wrappers around it.

use crate::core::{BiometricReading, ZoneClassifier, ZoneTracker};
use crate::error::WorkerError;
use crate::stream::{CancelToken, Message, OutgoingMessage, StreamProducer};
use crate::worker::stats::{create_shared_stats, SharedWorkerStats};
use std::time::Duration;

/// Default time allowed for draining the producer on shutdown.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Handles one consumed message. Any error aborts the worker run.
pub trait MessageHandler: Send {
    fn handle(&mut self, message: &Message, cancel: &CancelToken) -> Result<(), WorkerError>;

    /// Called once when the run ends, on both the normal and the fault path.
    fn shutdown(&mut self) {}
}

impl<F> MessageHandler for F
where
    F: FnMut(&Message, &CancelToken) -> Result<(), WorkerError> + Send,
{
    fn handle(&mut self, message: &Message, cancel: &CancelToken) -> Result<(), WorkerError> {
        self(message, cancel)
    }
}

/// Classifies readings and publishes a [`ZoneEvent`](crate::core::ZoneEvent)
/// whenever a device reaches a zone.
///
/// Owns the per-device zone state; the worker owning this handler is its
/// only writer.
pub struct ZoneHandler<P> {
    classifier: ZoneClassifier,
    tracker: ZoneTracker,
    producer: P,
    output_topic: String,
    stats: SharedWorkerStats,
    flush_timeout: Duration,
}

impl<P: StreamProducer> ZoneHandler<P> {
    pub fn new(classifier: ZoneClassifier, producer: P, output_topic: impl Into<String>) -> Self {
        Self {
            classifier,
            tracker: ZoneTracker::new(),
            producer,
            output_topic: output_topic.into(),
            stats: create_shared_stats(),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    /// Start from previously known device zones.
    pub fn with_tracker(mut self, tracker: ZoneTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_stats(mut self, stats: SharedWorkerStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn tracker(&self) -> &ZoneTracker {
        &self.tracker
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }

    fn decode(message: &Message) -> Result<BiometricReading, WorkerError> {
        message
            .decode()
            .map_err(|e| WorkerError::classification(Some(&message.key), format!("malformed reading: {e}")))
    }
}

impl<P: StreamProducer> MessageHandler for ZoneHandler<P> {
    fn handle(&mut self, message: &Message, _cancel: &CancelToken) -> Result<(), WorkerError> {
        let reading = Self::decode(message)?;
        let previous = self.tracker.previous(&reading.device_id);
        let classification = self.classifier.classify(&reading, previous)?;

        self.tracker.record(reading.device_id.clone(), classification.zone);
        self.stats.record_classified();

        let zone = match classification.zone {
            Some(zone) if classification.reached => zone,
            _ => {
                tracing::debug!(
                    "Device {} at {} bpm: no zone reached (zone {:?})",
                    reading.device_id,
                    reading.heart_rate,
                    classification.zone
                );
                return Ok(());
            }
        };

        let event = self.classifier.event_for(&reading, zone);
        let key = event.key();
        let outgoing = OutgoingMessage::json(key.clone(), &event).map_err(|e| WorkerError::Publish {
            topic: self.output_topic.clone(),
            key,
            reason: format!("could not encode zone event: {e}"),
        })?;

        let delivery = self.producer.produce(&self.output_topic, outgoing)?;
        self.stats.record_published();

        tracing::info!(
            "Device {} reached {} at {} bpm (threshold {}), published to {}@{}",
            event.device_id,
            event.zone,
            event.heart_rate,
            event.threshold,
            delivery.topic,
            delivery.offset
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        // Failing to flush only delays downstream visibility; never escalate.
        if let Err(e) = self.producer.flush(self.flush_timeout) {
            tracing::warn!("Failed to flush zone events to {}: {}", self.output_topic, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DeviceId, ReachPolicy, Zone, ZoneEvent, ZoneThresholds};
    use crate::error::StreamError;
    use crate::stream::DeliveryResult;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProducer {
        sent: Mutex<Vec<(String, OutgoingMessage)>>,
        fail_publish: bool,
        fail_flush: bool,
        flushes: AtomicUsize,
    }

    impl RecordingProducer {
        fn events(&self) -> Vec<ZoneEvent> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, m)| serde_json::from_slice(&m.payload).unwrap())
                .collect()
        }
    }

    impl StreamProducer for RecordingProducer {
        fn produce(&self, topic: &str, message: OutgoingMessage) -> Result<DeliveryResult, StreamError> {
            if self.fail_publish {
                return Err(StreamError::Publish {
                    topic: topic.to_string(),
                    key: message.key,
                    reason: "broker rejected".to_string(),
                });
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((topic.to_string(), message));
            Ok(DeliveryResult {
                topic: topic.to_string(),
                partition: 0,
                offset: sent.len() as u64 - 1,
            })
        }

        fn flush(&self, _timeout: Duration) -> Result<(), StreamError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            if self.fail_flush {
                Err(StreamError::Connection {
                    broker: "memory://test".to_string(),
                    reason: "gone".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn message_for(reading: &BiometricReading) -> Message {
        Message {
            topic: "BiometricsImported".to_string(),
            partition: 0,
            offset: 0,
            key: reading.key(),
            payload: serde_json::to_vec(reading).unwrap(),
            timestamp: Utc::now(),
        }
    }

    fn handler(producer: RecordingProducer) -> ZoneHandler<RecordingProducer> {
        ZoneHandler::new(ZoneClassifier::default(), producer, "HeartRateZoneReached")
    }

    #[test]
    fn test_publishes_zone3_event_after_zone2() {
        let device = DeviceId::new("D1");
        let mut tracker = ZoneTracker::new();
        tracker.record(device.clone(), Some(Zone::Zone2));
        let mut handler = handler(RecordingProducer::default()).with_tracker(tracker);

        let reading = BiometricReading::new(device.clone(), 160, Utc::now());
        handler.handle(&message_for(&reading), &CancelToken::new()).unwrap();

        let sent = handler.producer().sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "HeartRateZoneReached");
        assert_eq!(sent[0].1.key, "D1");

        let events = handler.producer().events();
        assert_eq!(events[0].device_id, device);
        assert_eq!(events[0].zone, Zone::Zone3);
        assert_eq!(events[0].heart_rate, 160);
        assert_eq!(events[0].threshold, 150);
        assert_eq!(events[0].timestamp, reading.timestamp);
        assert_eq!(handler.tracker().previous(&device), Some(Zone::Zone3));
    }

    #[test]
    fn test_no_event_without_transition() {
        let device = DeviceId::random();
        let mut handler = handler(RecordingProducer::default());

        for heart_rate in [125, 130, 140, 149] {
            let reading = BiometricReading::new(device.clone(), heart_rate, Utc::now());
            handler.handle(&message_for(&reading), &CancelToken::new()).unwrap();
        }

        let events = handler.producer().events();
        assert_eq!(events.len(), 1, "only the first Zone2 reading is reached");
        assert_eq!(events[0].zone, Zone::Zone2);
    }

    #[test]
    fn test_at_or_above_policy_repeats_events() {
        let device = DeviceId::random();
        let classifier = ZoneClassifier::new(ZoneThresholds::default(), ReachPolicy::AtOrAbove);
        let mut handler = ZoneHandler::new(classifier, RecordingProducer::default(), "out");

        for heart_rate in [160, 165, 130] {
            let reading = BiometricReading::new(device.clone(), heart_rate, Utc::now());
            handler.handle(&message_for(&reading), &CancelToken::new()).unwrap();
        }
        assert_eq!(handler.producer().events().len(), 2);
    }

    #[test]
    fn test_malformed_payload_is_classification_error() {
        let mut handler = handler(RecordingProducer::default());
        let mut message = message_for(&BiometricReading::new(DeviceId::random(), 100, Utc::now()));
        message.payload = br#"{"heartRate": 100}"#.to_vec();

        let err = handler.handle(&message, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, WorkerError::Classification { key: Some(_), .. }));
        assert!(handler.producer().events().is_empty());
    }

    #[test]
    fn test_missing_device_id_is_classification_error() {
        let mut handler = handler(RecordingProducer::default());
        let mut message = message_for(&BiometricReading::new("D1", 100, Utc::now()));
        message.payload = br#"{"heartRate": 100, "timestamp": "2024-01-22T10:00:01Z"}"#.to_vec();

        let err = handler.handle(&message, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, WorkerError::Classification { .. }));
        assert!(handler.tracker().is_empty());
    }

    #[test]
    fn test_publish_failure_propagates() {
        let producer = RecordingProducer {
            fail_publish: true,
            ..Default::default()
        };
        let mut handler = handler(producer);
        let reading = BiometricReading::new(DeviceId::random(), 175, Utc::now());

        let err = handler
            .handle(&message_for(&reading), &CancelToken::new())
            .unwrap_err();
        match err {
            WorkerError::Publish { topic, key, .. } => {
                assert_eq!(topic, "HeartRateZoneReached");
                assert_eq!(key, reading.key());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_shutdown_swallows_flush_failure() {
        let producer = RecordingProducer {
            fail_flush: true,
            ..Default::default()
        };
        let mut handler = handler(producer);
        handler.shutdown();
        assert_eq!(handler.producer().flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closure_handler() {
        let mut seen = Vec::new();
        {
            let mut closure = |message: &Message, _: &CancelToken| -> Result<(), WorkerError> {
                seen.push(message.offset);
                Ok(())
            };
            let reading = BiometricReading::new(DeviceId::random(), 100, Utc::now());
            MessageHandler::handle(&mut closure, &message_for(&reading), &CancelToken::new()).unwrap();
        }
        assert_eq!(seen, vec![0]);
    }
}
