//! Configuration for the heart-rate zone worker.

use crate::core::{ReachPolicy, ZoneClassifier, ZoneThresholds};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Topic the HTTP edge publishes readings to.
pub const BIOMETRICS_IMPORTED_TOPIC: &str = "BiometricsImported";

/// Default topic for zone notifications.
pub const ZONE_REACHED_TOPIC: &str = "HeartRateZoneReached";

/// Default consumer group of the zone workers.
pub const DEFAULT_CONSUMER_GROUP: &str = "heart-rate-zone-worker";

/// Main configuration for the worker and the HTTP edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker to connect to (`memory://<name>` or `kafka://host:port[,host:port]`)
    pub broker_address: String,

    /// Consumer group shared by all worker instances
    pub consumer_group: String,

    /// Topic carrying biometric readings
    pub input_topic: String,

    /// Topic receiving zone events
    pub output_topic: String,

    /// Zone thresholds and reach policy
    pub classifier: ClassifierConfig,

    /// How often a blocked consumer re-checks the broker (in milliseconds)
    #[serde(rename = "poll_interval_ms", with = "duration_millis")]
    pub poll_interval: Duration,

    /// HTTP edge bind address
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_address: "memory://local".to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            input_topic: BIOMETRICS_IMPORTED_TOPIC.to_string(),
            output_topic: ZONE_REACHED_TOPIC.to_string(),
            classifier: ClassifierConfig::default(),
            poll_interval: Duration::from_millis(100),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("heart-rate-zones")
            .join("config.json")
    }
}

/// Classifier configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Lower bound (bpm) of each zone
    pub thresholds: ZoneThresholds,
    pub policy: ReachPolicy,
}

impl ClassifierConfig {
    pub fn build(&self) -> ZoneClassifier {
        ZoneClassifier::new(self.thresholds.clone(), self.policy)
    }
}

/// Bind address of the HTTP edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Serde support for Duration as whole milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Zone;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.input_topic, "BiometricsImported");
        assert_eq!(config.output_topic, "HeartRateZoneReached");
        assert_eq!(config.consumer_group, DEFAULT_CONSUMER_GROUP);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.classifier.policy, ReachPolicy::Transition);
        assert_eq!(config.classifier.thresholds.lower_bound(Zone::Zone3), 150);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let json = r#"{
            "output_topic": "zones",
            "classifier": {
                "thresholds": {"Zone1": 50, "Zone2": 100, "Zone3": 130, "Zone4": 160, "Zone5": 180},
                "policy": "at_or_above"
            },
            "poll_interval_ms": 250
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.output_topic, "zones");
        assert_eq!(config.input_topic, BIOMETRICS_IMPORTED_TOPIC);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.classifier.policy, ReachPolicy::AtOrAbove);
        assert_eq!(config.classifier.build().thresholds().lower_bound(Zone::Zone2), 100);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let json = r#"{"classifier": {"thresholds": {"Zone1": 0, "Zone2": 200, "Zone3": 150, "Zone4": 170, "Zone5": 185}}}"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.output_topic = "zones".to_string();
        config.http.port = 0;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.output_topic, "zones");
        assert_eq!(loaded.http.port, 0);

        let missing = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(missing.output_topic, ZONE_REACHED_TOPIC);
    }
}
