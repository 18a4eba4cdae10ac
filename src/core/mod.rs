//! Core domain for heart-rate zone detection.
//!
//! This module contains:
//! - The reading and zone-event payloads
//! - Threshold-based zone classification
//! - Per-device zone tracking

pub mod records;
pub mod tracker;
pub mod zones;

// Re-export commonly used types
pub use records::{BiometricReading, DeviceId, Zone, ZoneEvent};
pub use tracker::ZoneTracker;
pub use zones::{Classification, ReachPolicy, ZoneClassifier, ZoneThresholds};
