//! Per-device "last known zone" state.
//!
//! A tracker has exactly one writer: the handler owned by a single worker.
//! Correct transitions rely on the broker routing every reading for a
//! device (keyed by device id) to the same worker, in order.

use crate::core::records::{DeviceId, Zone};
use std::collections::HashMap;

/// Last recorded zone for each device seen by one worker.
#[derive(Debug, Default)]
pub struct ZoneTracker {
    zones: HashMap<DeviceId, Zone>,
}

impl ZoneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Previously recorded zone for a device.
    pub fn previous(&self, device_id: &DeviceId) -> Option<Zone> {
        self.zones.get(device_id).copied()
    }

    /// Record the latest zone of a device; `None` forgets the device.
    pub fn record(&mut self, device_id: DeviceId, zone: Option<Zone>) {
        match zone {
            Some(zone) => {
                self.zones.insert(device_id, zone);
            }
            None => {
                self.zones.remove(&device_id);
            }
        }
    }

    /// Number of devices with a recorded zone.
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
