//! In-process broker backed by crossbeam channels.
//!
//! Each topic is split into a fixed number of partitions, one channel each.
//! A message goes to the partition picked by hashing its key, so every
//! message for a device lands on the same partition in produce order.
//! Consumers subscribed to a topic form one group: partitions are assigned
//! round-robin over the live members and reassigned when members join or
//! close. The broker can be marked unreachable to exercise connection
//! failures.

use crate::error::{ConfigError, StreamError};
use crate::stream::cancel::CancelToken;
use crate::stream::types::{DeliveryResult, Message, OutgoingMessage, StreamConsumer, StreamProducer};
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Select, Sender};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Address scheme served by [`MemoryBroker`].
pub const MEMORY_SCHEME: &str = "memory://";

/// Default interval at which a blocked consumer re-checks broker liveness.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of partitions per topic.
pub const DEFAULT_PARTITIONS: usize = 4;

struct Partition {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    next_offset: Mutex<u64>,
}

impl Partition {
    fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            next_offset: Mutex::new(0),
        }
    }
}

struct Topic {
    partitions: Vec<Partition>,
    /// Subscribed consumer ids in join order
    members: Mutex<Vec<u64>>,
}

impl Topic {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Partition::new()).collect(),
            members: Mutex::new(Vec::new()),
        }
    }

    fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions.len() as u64) as usize
    }

    fn lock_members(&self) -> MutexGuard<'_, Vec<u64>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(&self, member: u64) {
        let mut members = self.lock_members();
        if !members.contains(&member) {
            members.push(member);
        }
    }

    fn leave(&self, member: u64) {
        self.lock_members().retain(|m| *m != member);
    }

    /// Partitions currently owned by `member`.
    fn assignment(&self, member: u64) -> Vec<usize> {
        let members = self.lock_members();
        let Some(position) = members.iter().position(|m| *m == member) else {
            return Vec::new();
        };
        (0..self.partitions.len())
            .filter(|p| p % members.len() == position)
            .collect()
    }
}

struct BrokerInner {
    address: String,
    partitions: usize,
    connected: AtomicBool,
    next_member: AtomicU64,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
}

/// Shared handle to an in-process broker.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_partitions(address, DEFAULT_PARTITIONS)
    }

    /// Create a broker whose topics have `partitions` partitions (at least one).
    pub fn with_partitions(address: impl Into<String>, partitions: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                address: address.into(),
                partitions: partitions.max(1),
                connected: AtomicBool::new(true),
                next_member: AtomicU64::new(0),
                topics: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a broker for a `memory://` address.
    pub fn from_address(address: &str) -> Result<Self, ConfigError> {
        if address.starts_with(MEMORY_SCHEME) {
            Ok(Self::new(address))
        } else {
            Err(ConfigError::UnsupportedBroker(address.to_string()))
        }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn partitions(&self) -> usize {
        self.inner.partitions
    }

    /// Create a consumer that re-checks liveness every `poll_interval` while blocked.
    pub fn consumer(&self, poll_interval: Duration) -> MemoryConsumer {
        MemoryConsumer {
            broker: self.clone(),
            member: self.inner.next_member.fetch_add(1, Ordering::SeqCst),
            subscription: None,
            poll_interval,
            closed: false,
        }
    }

    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer {
            broker: self.clone(),
        }
    }

    /// Make every subsequent broker call fail with a connection error.
    pub fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Number of messages waiting on a topic, across partitions.
    pub fn pending(&self, topic: &str) -> usize {
        self.lock_topics()
            .get(topic)
            .map(|t| t.partitions.iter().map(|p| p.receiver.len()).sum())
            .unwrap_or(0)
    }

    /// Number of consumers subscribed to a topic.
    pub fn subscribers(&self, topic: &str) -> usize {
        self.lock_topics()
            .get(topic)
            .map(|t| t.lock_members().len())
            .unwrap_or(0)
    }

    fn lock_topics(&self) -> MutexGuard<'_, HashMap<String, Arc<Topic>>> {
        self.inner.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        let partitions = self.inner.partitions;
        self.lock_topics()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(partitions)))
            .clone()
    }

    fn ensure_connected(&self) -> Result<(), StreamError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StreamError::Connection {
                broker: self.inner.address.clone(),
                reason: "broker is not reachable".to_string(),
            })
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new("memory://local")
    }
}

/// Producer publishing into a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryProducer {
    broker: MemoryBroker,
}

impl StreamProducer for MemoryProducer {
    fn produce(&self, topic: &str, message: OutgoingMessage) -> Result<DeliveryResult, StreamError> {
        self.broker.ensure_connected()?;

        let target = self.broker.topic(topic);
        let partition = target.partition_for(&message.key);
        let slot = &target.partitions[partition];

        // Offsets are assigned under the lock so they match channel order.
        let mut next_offset = slot.next_offset.lock().unwrap_or_else(PoisonError::into_inner);
        let offset = *next_offset;
        let key = message.key.clone();

        slot.sender
            .send(Message {
                topic: topic.to_string(),
                partition: partition as i32,
                offset,
                key: message.key,
                payload: message.payload,
                timestamp: Utc::now(),
            })
            .map_err(|e| StreamError::Publish {
                topic: topic.to_string(),
                key,
                reason: e.to_string(),
            })?;
        *next_offset += 1;

        Ok(DeliveryResult {
            topic: topic.to_string(),
            partition: partition as i32,
            offset,
        })
    }

    fn flush(&self, _timeout: Duration) -> Result<(), StreamError> {
        // Sends are appended synchronously; only liveness can fail here.
        self.broker.ensure_connected()
    }
}

enum Received {
    Message(Message),
    Cancelled,
    Idle,
}

/// Group member reading the partitions assigned to it.
pub struct MemoryConsumer {
    broker: MemoryBroker,
    member: u64,
    subscription: Option<(String, Arc<Topic>)>,
    poll_interval: Duration,
    closed: bool,
}

impl MemoryConsumer {
    /// Topic this consumer is subscribed to.
    pub fn topic(&self) -> Option<&str> {
        self.subscription.as_ref().map(|(name, _)| name.as_str())
    }

    /// Partitions this consumer currently owns.
    pub fn assignment(&self) -> Vec<usize> {
        self.subscription
            .as_ref()
            .map(|(_, topic)| topic.assignment(self.member))
            .unwrap_or_default()
    }

    /// Wait up to `timeout` for a message without a cancellation token.
    pub fn poll(&mut self, timeout: Duration) -> Result<Option<Message>, StreamError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.receive(None, remaining.min(self.poll_interval))? {
                Received::Message(message) => return Ok(Some(message)),
                Received::Cancelled | Received::Idle => {}
            }
        }
    }

    /// One bounded wait over the assigned partitions (and `cancel`, if given).
    fn receive(&self, cancel: Option<&CancelToken>, wait: Duration) -> Result<Received, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.broker.ensure_connected()?;
        let (_, topic) = self.subscription.as_ref().ok_or(StreamError::NotSubscribed)?;

        let receivers: Vec<&Receiver<Message>> = topic
            .assignment(self.member)
            .into_iter()
            .map(|p| &topic.partitions[p].receiver)
            .collect();

        let mut select = Select::new();
        for receiver in &receivers {
            select.recv(receiver);
        }
        let cancel_index = cancel.map(|token| select.recv(token.signal()));

        let Ok(operation) = select.select_timeout(wait) else {
            return Ok(Received::Idle);
        };
        let index = operation.index();
        if let (Some(token), Some(cancel_index)) = (cancel, cancel_index) {
            if index == cancel_index {
                let _ = operation.recv(token.signal());
                return Ok(Received::Cancelled);
            }
        }
        match operation.recv(receivers[index]) {
            Ok(message) => Ok(Received::Message(message)),
            Err(_) => Err(StreamError::Connection {
                broker: self.broker.address().to_string(),
                reason: "partition channel disconnected".to_string(),
            }),
        }
    }

    fn leave_group(&mut self) {
        if let Some((_, topic)) = self.subscription.take() {
            topic.leave(self.member);
        }
    }
}

impl StreamConsumer for MemoryConsumer {
    fn subscribe(&mut self, topic: &str) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.broker.ensure_connected()?;

        if self.topic() == Some(topic) {
            return Ok(());
        }
        self.leave_group();
        let joined = self.broker.topic(topic);
        joined.join(self.member);
        self.subscription = Some((topic.to_string(), joined));
        Ok(())
    }

    fn consume(&mut self, cancel: &CancelToken) -> Result<Option<Message>, StreamError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            match self.receive(Some(cancel), self.poll_interval)? {
                Received::Message(message) => return Ok(Some(message)),
                Received::Cancelled => return Ok(None),
                Received::Idle => {}
            }
        }
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.leave_group();
        self.closed = true;
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.leave_group();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn outgoing(key: &str, body: &str) -> OutgoingMessage {
        OutgoingMessage {
            key: key.to_string(),
            payload: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_from_address_scheme() {
        assert!(MemoryBroker::from_address("memory://test").is_ok());
        assert!(matches!(
            MemoryBroker::from_address("localhost:9092"),
            Err(ConfigError::UnsupportedBroker(_))
        ));
    }

    #[test]
    fn test_produce_then_consume_in_order() {
        let broker = MemoryBroker::default();
        let producer = broker.producer();
        let mut consumer = broker.consumer(DEFAULT_POLL_INTERVAL);
        consumer.subscribe("readings").unwrap();

        let first = producer.produce("readings", outgoing("a", "1")).unwrap();
        let second = producer.produce("readings", outgoing("a", "2")).unwrap();
        assert_eq!(first.partition, second.partition);
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
        assert_eq!(broker.pending("readings"), 2);

        let cancel = CancelToken::new();
        let m1 = consumer.consume(&cancel).unwrap().unwrap();
        let m2 = consumer.consume(&cancel).unwrap().unwrap();
        assert_eq!((m1.payload.as_slice(), m1.offset), (b"1".as_slice(), 0));
        assert_eq!((m2.payload.as_slice(), m2.offset), (b"2".as_slice(), 1));
        assert_eq!(broker.pending("readings"), 0);
    }

    #[test]
    fn test_same_key_same_partition() {
        let broker = MemoryBroker::with_partitions("memory://test", 8);
        let producer = broker.producer();

        let partitions: Vec<i32> = (0..10)
            .map(|_| producer.produce("readings", outgoing("D1", "{}")).unwrap().partition)
            .collect();
        assert!(partitions.iter().all(|p| *p == partitions[0]));
        assert!((0..8).contains(&partitions[0]));
    }

    #[test]
    fn test_partitions_split_between_members() {
        let broker = MemoryBroker::with_partitions("memory://test", 4);
        let mut first = broker.consumer(DEFAULT_POLL_INTERVAL);
        let mut second = broker.consumer(DEFAULT_POLL_INTERVAL);

        first.subscribe("readings").unwrap();
        assert_eq!(first.assignment(), vec![0, 1, 2, 3]);

        second.subscribe("readings").unwrap();
        assert_eq!(broker.subscribers("readings"), 2);
        assert_eq!(first.assignment(), vec![0, 2]);
        assert_eq!(second.assignment(), vec![1, 3]);

        first.close().unwrap();
        assert_eq!(second.assignment(), vec![0, 1, 2, 3]);

        drop(second);
        assert_eq!(broker.subscribers("readings"), 0);
    }

    #[test]
    fn test_consume_returns_none_when_cancelled_mid_block() {
        let broker = MemoryBroker::default();
        let mut consumer = broker.consumer(Duration::from_secs(30));
        consumer.subscribe("readings").unwrap();

        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let started = Instant::now();
        assert!(consumer.consume(&cancel).unwrap().is_none());
        assert!(started.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }

    #[test]
    fn test_disconnected_broker_fails_calls() {
        let broker = MemoryBroker::default();
        let producer = broker.producer();
        let mut consumer = broker.consumer(Duration::from_millis(10));
        broker.disconnect();

        assert!(matches!(
            consumer.subscribe("readings"),
            Err(StreamError::Connection { .. })
        ));
        assert!(matches!(
            producer.produce("readings", outgoing("a", "1")),
            Err(StreamError::Connection { .. })
        ));
        assert!(producer.flush(Duration::from_secs(1)).is_err());

        broker.reconnect();
        consumer.subscribe("readings").unwrap();
        broker.disconnect();
        assert!(matches!(
            consumer.consume(&CancelToken::new()),
            Err(StreamError::Connection { .. })
        ));
    }

    #[test]
    fn test_consume_requires_subscription_and_open_handle() {
        let broker = MemoryBroker::default();
        let mut consumer = broker.consumer(DEFAULT_POLL_INTERVAL);
        assert!(matches!(
            consumer.consume(&CancelToken::new()),
            Err(StreamError::NotSubscribed)
        ));

        consumer.subscribe("readings").unwrap();
        consumer.subscribe("readings").unwrap();
        assert_eq!(broker.subscribers("readings"), 1);
        consumer.close().unwrap();
        assert!(matches!(
            consumer.consume(&CancelToken::new()),
            Err(StreamError::Closed)
        ));
    }

    #[test]
    fn test_poll_times_out() {
        let broker = MemoryBroker::default();
        let mut consumer = broker.consumer(Duration::from_millis(5));
        consumer.subscribe("events").unwrap();
        assert!(consumer.poll(Duration::from_millis(20)).unwrap().is_none());

        broker
            .producer()
            .produce("events", outgoing("k", "{}"))
            .unwrap();
        assert!(consumer.poll(Duration::from_secs(1)).unwrap().is_some());
    }
}
