//! Component timing and tolerance settings.
//!
//! Every field has a default, so a partial JSON document (or none) is a
//! valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the page content context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContentConfig {
    /// Quiet period after the last DOM mutation before rules are re-applied
    pub mutation_debounce_ms: u32,
    /// Period of the playback speed re-assertion loop
    pub enforcement_interval_ms: u32,
    /// Live rate divergence tolerated before the speed is re-written
    pub speed_tolerance: f64,
    /// Delay before the speed menu hides after the pointer leaves
    pub menu_hide_delay_ms: u32,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            mutation_debounce_ms: 50,
            enforcement_interval_ms: 1000,
            speed_tolerance: 0.05,
            menu_hide_delay_ms: 300,
        }
    }
}

/// Settings for the background time-limit tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerConfig {
    pub tracking_interval_ms: u32,
    /// Period of the batched usage write
    pub save_interval_ms: u32,
    /// Collapses bursts of tab/window events into one run
    pub trigger_debounce_ms: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracking_interval_ms: 30_000,
            save_interval_ms: 60_000,
            trigger_debounce_ms: 250,
        }
    }
}

impl TrackerConfig {
    pub fn tracking_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.tracking_interval_ms))
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.save_interval_ms))
    }

    pub fn trigger_debounce(&self) -> Duration {
        Duration::from_millis(u64::from(self.trigger_debounce_ms))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub content: ContentConfig,
    pub tracker: TrackerConfig,
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::from_json(r#"{ "tracker": { "trackingIntervalMs": 5000 } }"#).unwrap();
        assert_eq!(config.tracker.tracking_interval_ms, 5000);
        assert_eq!(config.tracker.save_interval_ms, 60_000);
        assert_eq!(config.content, ContentConfig::default());
    }

    #[test]
    fn test_empty_config() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }
}
