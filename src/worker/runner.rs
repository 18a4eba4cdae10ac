//! The consume → classify → produce loop.
//!
//! A [`Worker`] subscribes once, then hands every consumed message to its
//! handler until cancellation. Handler and broker failures are not retried:
//! the run stops, the consumer is closed on a best-effort basis, and the
//! original error is returned to the caller.

use crate::error::WorkerError;
use crate::stream::{CancelToken, StreamConsumer};
use crate::worker::handler::MessageHandler;
use crate::worker::stats::{create_shared_stats, SharedWorkerStats};
use std::fmt;

/// Lifecycle of a [`Worker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, not yet running
    Idle,
    Subscribing,
    /// Steady-state consume loop
    Running,
    /// Cancellation observed, tearing down
    Stopping,
    /// Consumer closed after cancellation
    Stopped,
    /// A handler or broker error ended the run
    Faulted,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Subscribing => "subscribing",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
            WorkerState::Faulted => "faulted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Faulted)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sequential worker owning one consumer and one handler.
pub struct Worker<C, H> {
    consumer: C,
    handler: H,
    topic: String,
    client_id: String,
    state: WorkerState,
    stats: SharedWorkerStats,
}

impl<C: StreamConsumer, H: MessageHandler> Worker<C, H> {
    pub fn new(consumer: C, handler: H, topic: impl Into<String>) -> Self {
        Self {
            consumer,
            handler,
            topic: topic.into(),
            client_id: default_client_id(),
            state: WorkerState::Idle,
            stats: create_shared_stats(),
        }
    }

    pub fn with_stats(mut self, stats: SharedWorkerStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn stats(&self) -> &SharedWorkerStats {
        &self.stats
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Give back the consumer and handler, e.g. to inspect them after a run.
    pub fn into_parts(self) -> (C, H) {
        (self.consumer, self.handler)
    }

    /// Run until `cancel` fires or a message fails.
    ///
    /// Returns the number of messages handled. A worker runs at most once.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<u64, WorkerError> {
        if self.state != WorkerState::Idle {
            return Err(WorkerError::InvalidState {
                expected: WorkerState::Idle.as_str(),
                actual: self.state.as_str(),
            });
        }

        self.transition(WorkerState::Subscribing);
        if let Err(e) = self.consumer.subscribe(&self.topic) {
            self.transition(WorkerState::Faulted);
            tracing::error!("Worker {} could not subscribe to {}: {}", self.client_id, self.topic, e);
            return Err(e.into());
        }
        tracing::info!("Worker {} subscribed to {}", self.client_id, self.topic);

        self.transition(WorkerState::Running);
        match self.consume_loop(cancel) {
            Ok(handled) => {
                self.transition(WorkerState::Stopping);
                self.handler.shutdown();
                if let Err(e) = self.consumer.close() {
                    self.transition(WorkerState::Faulted);
                    return Err(e.into());
                }
                self.transition(WorkerState::Stopped);
                tracing::info!("Worker {} stopped after {} messages", self.client_id, handled);
                Ok(handled)
            }
            Err(e) => {
                self.transition(WorkerState::Faulted);
                tracing::error!("Worker {} faulted: {}", self.client_id, e);
                self.handler.shutdown();
                if let Err(close_err) = self.consumer.close() {
                    tracing::warn!("Worker {} could not close consumer: {}", self.client_id, close_err);
                }
                Err(e)
            }
        }
    }

    fn consume_loop(&mut self, cancel: &CancelToken) -> Result<u64, WorkerError> {
        let mut handled = 0;
        while !cancel.is_cancelled() {
            let Some(message) = self.consumer.consume(cancel)? else {
                continue;
            };
            self.stats.record_consumed();
            tracing::debug!(
                "Consumed {}@{} key {}",
                message.topic,
                message.offset,
                message.key
            );

            self.handler.handle(&message, cancel)?;
            handled += 1;
        }
        Ok(handled)
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::debug!("Worker {}: {} -> {}", self.client_id, self.state, next);
        self.state = next;
    }
}

/// Client id from hostname plus a short random suffix.
pub fn default_client_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!(
        "zone-worker-{}-{}",
        hostname,
        &uuid::Uuid::new_v4().to_string()[..8]
    )
}
