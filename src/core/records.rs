//! Event payloads exchanged over the biometric and zone topics.
//!
//! Field names are camelCase on the wire so the HTTP edge and the worker
//! agree with upstream device clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Heart-rate training zone, ordered by increasing exertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Zone {
    Zone1,
    Zone2,
    Zone3,
    Zone4,
    Zone5,
}

impl Zone {
    /// All zones, lowest exertion first.
    pub const ALL: [Zone; 5] = [Zone::Zone1, Zone::Zone2, Zone::Zone3, Zone::Zone4, Zone::Zone5];

    /// Zero-based position of the zone in [`Zone::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Parse a zone from `zone3`, `Zone3` or `3`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        let digits = s.strip_prefix("zone").unwrap_or(&s);
        match digits {
            "1" => Some(Zone::Zone1),
            "2" => Some(Zone::Zone2),
            "3" => Some(Zone::Zone3),
            "4" => Some(Zone::Zone4),
            "5" => Some(Zone::Zone5),
            _ => None,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Zone{}", self.index() + 1)
    }
}

/// Opaque device identifier, also used as the stream partition key.
///
/// Devices choose their own ids; UUIDs and short names like `D1` are both
/// valid. An empty (or all-whitespace) id counts as missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is absent.
    pub fn is_missing(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<Uuid> for DeviceId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

/// A single heart-rate reading captured by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiometricReading {
    /// Device identifier, also the stream partition key
    #[serde(default)]
    pub device_id: DeviceId,
    /// Beats per minute
    pub heart_rate: u32,
    /// When the reading was captured
    pub timestamp: DateTime<Utc>,
}

impl BiometricReading {
    pub fn new(device_id: impl Into<DeviceId>, heart_rate: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            heart_rate,
            timestamp,
        }
    }

    /// Stream key for this reading.
    pub fn key(&self) -> String {
        self.device_id.to_string()
    }
}

/// Notification that a device reached a heart-rate zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneEvent {
    pub device_id: DeviceId,
    /// Zone that was reached
    pub zone: Zone,
    /// Capture time of the triggering reading
    pub timestamp: DateTime<Utc>,
    /// Triggering heart rate
    pub heart_rate: u32,
    /// Lower bound of the zone that was crossed
    pub threshold: u32,
    /// Upper bound of the zone (exclusive); `None` for the top zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_heart_rate: Option<u32>,
}

impl ZoneEvent {
    /// Stream key for this event.
    pub fn key(&self) -> String {
        self.device_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_ordering() {
        assert!(Zone::Zone1 < Zone::Zone2);
        assert!(Zone::Zone5 > Zone::Zone4);
        let mut zones = vec![Zone::Zone4, Zone::Zone1, Zone::Zone3];
        zones.sort();
        assert_eq!(zones, vec![Zone::Zone1, Zone::Zone3, Zone::Zone4]);
    }

    #[test]
    fn test_zone_parse_and_display() {
        assert_eq!(Zone::parse("zone3"), Some(Zone::Zone3));
        assert_eq!(Zone::parse("Zone5"), Some(Zone::Zone5));
        assert_eq!(Zone::parse("2"), Some(Zone::Zone2));
        assert_eq!(Zone::parse("zone6"), None);
        assert_eq!(Zone::Zone4.to_string(), "Zone4");
    }

    #[test]
    fn test_reading_wire_format() {
        let json = r#"{
            "deviceId": "6f1c2a9e-3b4d-4c5e-8f70-1a2b3c4d5e6f",
            "heartRate": 142,
            "timestamp": "2024-01-22T10:00:01Z"
        }"#;
        let reading: BiometricReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.heart_rate, 142);
        assert_eq!(reading.key(), "6f1c2a9e-3b4d-4c5e-8f70-1a2b3c4d5e6f");
    }

    #[test]
    fn test_opaque_device_ids() {
        let json = r#"{"deviceId": "D1", "heartRate": 160, "timestamp": "2024-01-22T10:00:01Z"}"#;
        let reading: BiometricReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.device_id, DeviceId::new("D1"));
        assert_eq!(reading.key(), "D1");

        let json = r#"{"heartRate": 160, "timestamp": "2024-01-22T10:00:01Z"}"#;
        let reading: BiometricReading = serde_json::from_str(json).unwrap();
        assert!(reading.device_id.is_missing());
        assert!(DeviceId::new("  ").is_missing());
        assert!(!DeviceId::random().is_missing());
    }

    #[test]
    fn test_top_zone_event_omits_max() {
        let event = ZoneEvent {
            device_id: DeviceId::new("D1"),
            zone: Zone::Zone5,
            timestamp: Utc::now(),
            heart_rate: 190,
            threshold: 185,
            max_heart_rate: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["zone"], "Zone5");
        assert!(value.get("maxHeartRate").is_none());
    }
}
