//! Heart-rate zone classification.
//!
//! Classification is a pure ordered scan over injected lower bounds: a
//! reading falls in the highest zone whose lower bound is at or below its
//! heart rate. Whether that zone counts as "reached" depends on the
//! device's previous zone and the configured [`ReachPolicy`].

use crate::core::records::{BiometricReading, Zone, ZoneEvent};
use crate::error::{ConfigError, WorkerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lower bound (bpm, inclusive) of every zone.
///
/// Always holds one bound per zone, strictly increasing from Zone1 to Zone5.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<Zone, u32>", into = "BTreeMap<Zone, u32>")]
pub struct ZoneThresholds {
    bounds: [u32; 5],
}

impl ZoneThresholds {
    /// Build thresholds from per-zone lower bounds, Zone1 first.
    pub fn new(bounds: [u32; 5]) -> Result<Self, ConfigError> {
        for (pair, zones) in bounds.windows(2).zip(Zone::ALL.windows(2)) {
            if pair[0] >= pair[1] {
                return Err(ConfigError::InvalidThresholds(format!(
                    "{} lower bound {} must be above {} lower bound {}",
                    zones[1], pair[1], zones[0], pair[0]
                )));
            }
        }
        Ok(Self { bounds })
    }

    /// Inclusive lower bound of a zone.
    pub fn lower_bound(&self, zone: Zone) -> u32 {
        self.bounds[zone.index()]
    }

    /// Exclusive upper bound of a zone, `None` for the top zone.
    pub fn upper_bound(&self, zone: Zone) -> Option<u32> {
        self.bounds.get(zone.index() + 1).copied()
    }

    /// Highest zone whose lower bound is at or below `heart_rate`.
    pub fn zone_for(&self, heart_rate: u32) -> Option<Zone> {
        Zone::ALL
            .iter()
            .rev()
            .find(|zone| self.lower_bound(**zone) <= heart_rate)
            .copied()
    }
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        Self {
            bounds: [0, 120, 150, 170, 185],
        }
    }
}

impl TryFrom<BTreeMap<Zone, u32>> for ZoneThresholds {
    type Error = ConfigError;

    fn try_from(map: BTreeMap<Zone, u32>) -> Result<Self, Self::Error> {
        let mut bounds = [0u32; 5];
        for zone in Zone::ALL {
            bounds[zone.index()] = *map.get(&zone).ok_or(ConfigError::MissingZone(zone))?;
        }
        Self::new(bounds)
    }
}

impl From<ZoneThresholds> for BTreeMap<Zone, u32> {
    fn from(thresholds: ZoneThresholds) -> Self {
        Zone::ALL
            .iter()
            .map(|zone| (*zone, thresholds.lower_bound(*zone)))
            .collect()
    }
}

/// When a classified zone counts as newly reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReachPolicy {
    /// The zone differs from the device's previous zone.
    #[default]
    Transition,
    /// The zone is at or above the device's previous zone.
    AtOrAbove,
}

impl ReachPolicy {
    fn reached(self, current: Zone, previous: Option<Zone>) -> bool {
        match (self, previous) {
            (_, None) => true,
            (ReachPolicy::Transition, Some(prev)) => current != prev,
            (ReachPolicy::AtOrAbove, Some(prev)) => current >= prev,
        }
    }
}

/// Result of classifying one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Zone of the reading, `None` when below every lower bound
    pub zone: Option<Zone>,
    /// Whether the zone counts as reached for this device
    pub reached: bool,
}

/// Maps readings onto zones using injected thresholds.
#[derive(Debug, Clone, Default)]
pub struct ZoneClassifier {
    thresholds: ZoneThresholds,
    policy: ReachPolicy,
}

impl ZoneClassifier {
    pub fn new(thresholds: ZoneThresholds, policy: ReachPolicy) -> Self {
        Self { thresholds, policy }
    }

    pub fn thresholds(&self) -> &ZoneThresholds {
        &self.thresholds
    }

    pub fn policy(&self) -> ReachPolicy {
        self.policy
    }

    /// Classify a reading given the device's previously recorded zone.
    ///
    /// Malformed readings (missing device id, zero heart rate) are rejected.
    pub fn classify(
        &self,
        reading: &BiometricReading,
        previous: Option<Zone>,
    ) -> Result<Classification, WorkerError> {
        if reading.device_id.is_missing() {
            return Err(WorkerError::classification(None, "missing device id"));
        }
        if reading.heart_rate == 0 {
            return Err(WorkerError::classification(
                Some(&reading.key()),
                "heart rate must be positive",
            ));
        }

        let zone = self.thresholds.zone_for(reading.heart_rate);
        let reached = zone.is_some_and(|z| self.policy.reached(z, previous));
        Ok(Classification { zone, reached })
    }

    /// Build the notification for a reading that reached `zone`.
    pub fn event_for(&self, reading: &BiometricReading, zone: Zone) -> ZoneEvent {
        ZoneEvent {
            device_id: reading.device_id.clone(),
            zone,
            timestamp: reading.timestamp,
            heart_rate: reading.heart_rate,
            threshold: self.thresholds.lower_bound(zone),
            max_heart_rate: self.thresholds.upper_bound(zone),
        }
    }
}
