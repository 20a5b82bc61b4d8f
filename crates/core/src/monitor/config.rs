//! Monitor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the processing monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// How often to poll each asset (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Wait budget per asset before it is reported as timed out (seconds).
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,

    /// Consecutive failed polls tolerated before the asset is marked ERROR.
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,

    /// Assets polled concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_max_wait() -> u64 {
    1800 // 30 minutes
}

fn default_max_poll_failures() -> u32 {
    5
}

fn default_concurrency() -> usize {
    4
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
            max_poll_failures: default_max_poll_failures(),
            concurrency: default_concurrency(),
        }
    }
}

impl MonitorConfig {
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_max_wait(mut self, secs: u64) -> Self {
        self.max_wait_secs = secs;
        self
    }

    pub fn settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
            max_poll_failures: self.max_poll_failures,
        }
    }
}

/// Timing parameters for one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
    pub max_poll_failures: u32,
}

impl PollSettings {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self {
            interval,
            max_wait,
            max_poll_failures: default_max_poll_failures(),
        }
    }

    pub fn with_max_poll_failures(mut self, max: u32) -> Self {
        self.max_poll_failures = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.max_wait_secs, 1800);
        assert_eq!(config.max_poll_failures, 5);
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
            poll_interval_secs = 10
        "#;
        let config: MonitorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.max_wait_secs, 1800);
    }

    #[test]
    fn test_settings() {
        let settings = MonitorConfig::default().with_poll_interval(5).with_max_wait(60).settings();
        assert_eq!(settings.interval, Duration::from_secs(5));
        assert_eq!(settings.max_wait, Duration::from_secs(60));
        assert_eq!(settings.max_poll_failures, 5);
    }
}
