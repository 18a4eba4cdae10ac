//! Broker selection from the configured address.

use crate::config::Config;
use crate::error::{ConfigError, StreamError};
use crate::stream::memory::{MemoryBroker, MEMORY_SCHEME};
use crate::stream::types::{StreamConsumer, StreamProducer};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "kafka")]
use crate::stream::kafka::{KafkaSettings, KAFKA_SCHEME};

/// A configured broker that hands out consumers and producers.
#[derive(Clone)]
pub enum Broker {
    /// In-process broker (`memory://<name>`)
    Memory {
        broker: MemoryBroker,
        poll_interval: Duration,
    },
    /// Kafka cluster (`kafka://host:port[,host:port]`)
    #[cfg(feature = "kafka")]
    Kafka(KafkaSettings),
}

impl Broker {
    /// Select the adapter for `config.broker_address`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let address = config.broker_address.as_str();

        if address.starts_with(MEMORY_SCHEME) {
            return Ok(Broker::Memory {
                broker: MemoryBroker::from_address(address)?,
                poll_interval: config.poll_interval,
            });
        }

        #[cfg(feature = "kafka")]
        if address.starts_with(KAFKA_SCHEME) {
            let mut settings = KafkaSettings::from_address(address, config.consumer_group.clone())
                .ok_or_else(|| ConfigError::UnsupportedBroker(address.to_string()))?;
            settings.poll_interval = config.poll_interval;
            return Ok(Broker::Kafka(settings));
        }

        Err(ConfigError::UnsupportedBroker(address.to_string()))
    }

    /// Wrap an existing in-process broker.
    pub fn memory(broker: MemoryBroker, poll_interval: Duration) -> Self {
        Broker::Memory {
            broker,
            poll_interval,
        }
    }

    pub fn address(&self) -> String {
        match self {
            Broker::Memory { broker, .. } => broker.address().to_string(),
            #[cfg(feature = "kafka")]
            Broker::Kafka(settings) => format!("{}{}", KAFKA_SCHEME, settings.bootstrap_servers),
        }
    }

    /// Whether producers and consumers only reach this process.
    pub fn is_in_process(&self) -> bool {
        matches!(self, Broker::Memory { .. })
    }

    pub fn consumer(&self) -> Result<Box<dyn StreamConsumer>, StreamError> {
        match self {
            Broker::Memory {
                broker,
                poll_interval,
            } => Ok(Box::new(broker.consumer(*poll_interval))),
            #[cfg(feature = "kafka")]
            Broker::Kafka(settings) => Ok(Box::new(settings.consumer()?)),
        }
    }

    pub fn producer(&self) -> Result<Arc<dyn StreamProducer>, StreamError> {
        match self {
            Broker::Memory { broker, .. } => Ok(Arc::new(broker.producer())),
            #[cfg(feature = "kafka")]
            Broker::Kafka(settings) => Ok(Arc::new(settings.producer()?)),
        }
    }
}
