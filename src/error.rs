//! Error types for the heart-rate zone worker.
//!
//! Stream adapters report [`StreamError`]; the worker loop surfaces
//! everything as [`WorkerError`]. None of these are recovered locally.

use crate::core::Zone;
use thiserror::Error;

/// Errors reported by stream consumers and producers.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The broker could not be reached.
    #[error("broker {broker} unreachable: {reason}")]
    Connection { broker: String, reason: String },

    /// The broker refused or failed a publish.
    #[error("publish to {topic} (key {key}) failed: {reason}")]
    Publish {
        topic: String,
        key: String,
        reason: String,
    },

    /// Consume was called before subscribe.
    #[error("consumer is not subscribed to a topic")]
    NotSubscribed,

    /// The handle was already closed.
    #[error("stream handle is closed")]
    Closed,
}

/// Errors that abort a worker run.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Subscribe, consume or produce could not reach the broker.
    #[error("connection error: {0}")]
    Connection(String),

    /// A zone event could not be published.
    #[error("publish to {topic} (key {key}) failed: {reason}")]
    Publish {
        topic: String,
        key: String,
        reason: String,
    },

    /// A reading could not be classified.
    #[error("classification failed{}: {reason}", key_suffix(.key))]
    Classification { key: Option<String>, reason: String },

    /// The worker was driven from the wrong lifecycle state.
    #[error("worker is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Failure raised by an injected message handler.
    #[error("handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

fn key_suffix(key: &Option<String>) -> String {
    key.as_deref()
        .map(|k| format!(" for key {k}"))
        .unwrap_or_default()
}

impl WorkerError {
    /// Build a classification error for a message key.
    pub fn classification(key: Option<&str>, reason: impl Into<String>) -> Self {
        WorkerError::Classification {
            key: key.map(str::to_string),
            reason: reason.into(),
        }
    }
}

impl From<StreamError> for WorkerError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Publish { topic, key, reason } => {
                WorkerError::Publish { topic, key, reason }
            }
            other => WorkerError::Connection(other.to_string()),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("invalid zone thresholds: {0}")]
    InvalidThresholds(String),

    /// The zone is missing from the threshold table.
    #[error("no threshold configured for {0}")]
    MissingZone(Zone),

    #[error("unsupported broker address {0:?}")]
    UnsupportedBroker(String),
}
