//! Stream abstractions for the worker.
//!
//! The worker only sees [`StreamConsumer`] and [`StreamProducer`]. Two
//! adapters implement them: the in-process [`MemoryBroker`] and, with the
//! `kafka` feature, an `rdkafka` client. [`Broker`] picks one from the
//! configured address.

pub mod cancel;
pub mod connect;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod types;

pub use cancel::CancelToken;
pub use connect::Broker;
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumer, KafkaProducer, KafkaSettings};
pub use memory::{
    MemoryBroker, MemoryConsumer, MemoryProducer, DEFAULT_PARTITIONS, DEFAULT_POLL_INTERVAL,
};
pub use types::{DeliveryResult, Message, OutgoingMessage, StreamConsumer, StreamProducer};
