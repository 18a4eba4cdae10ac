//! Heart-rate zone worker - event-driven training zone detection.
//!
//! Devices post heart-rate readings to an HTTP edge, which republishes them
//! onto the `BiometricsImported` topic. A [`Worker`] consumes that topic,
//! classifies each reading into a training zone and publishes a
//! [`ZoneEvent`] whenever a device reaches a zone.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Heart-Rate Zone Worker                    │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌───────────────────┐   ┌──────────────────┐  │
//! │  │  HTTP edge  │──▶│ BiometricsImported│──▶│  Worker loop     │  │
//! │  │  (server)   │   │      topic        │   │ consume/classify │  │
//! │  └─────────────┘   └───────────────────┘   └──────────────────┘  │
//! │                                                     │            │
//! │                                                     ▼            │
//! │                                           ┌──────────────────┐   │
//! │                                           │ zone event topic │   │
//! │                                           └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use heart_rate_zones::{
//!     CancelToken, MemoryBroker, Worker, ZoneClassifier, ZoneHandler, DEFAULT_POLL_INTERVAL,
//! };
//!
//! let broker = MemoryBroker::default();
//! let handler = ZoneHandler::new(ZoneClassifier::default(), broker.producer(), "HeartRateZoneReached");
//! let mut worker = Worker::new(broker.consumer(DEFAULT_POLL_INTERVAL), handler, "BiometricsImported");
//!
//! let cancel = CancelToken::new();
//! // Call `cancel.cancel()` from another thread to stop the worker.
//! worker.run(&cancel).expect("worker faulted");
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod stream;
pub mod worker;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{ClassifierConfig, Config, HttpConfig};
pub use crate::core::{
    BiometricReading, Classification, DeviceId, ReachPolicy, Zone, ZoneClassifier, ZoneEvent,
    ZoneThresholds, ZoneTracker,
};
pub use error::{ConfigError, StreamError, WorkerError};
pub use stream::{
    Broker, CancelToken, DeliveryResult, MemoryBroker, Message, OutgoingMessage, StreamConsumer,
    StreamProducer, DEFAULT_POLL_INTERVAL,
};
pub use worker::{
    MessageHandler, SharedWorkerStats, Worker, WorkerState, WorkerStats, ZoneHandler,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
