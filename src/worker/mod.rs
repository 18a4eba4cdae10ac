//! Event-driven zone worker.
//!
//! This module contains:
//! - The [`Worker`] lifecycle and consume loop
//! - Message handler strategies, including the production [`ZoneHandler`]
//! - Shared processing statistics

pub mod handler;
pub mod runner;
pub mod stats;

pub use handler::{MessageHandler, ZoneHandler, DEFAULT_FLUSH_TIMEOUT};
pub use runner::{default_client_id, Worker, WorkerState};
pub use stats::{create_shared_stats, SharedWorkerStats, StatsSnapshot, WorkerStats};
