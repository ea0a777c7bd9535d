//! Pipeline configuration.
//!
//! Every struct has a `Default` matching the reference hardware setup and
//! can be loaded from JSON. Durations are written as integer milliseconds.

use std::path::Path;
use std::time::Duration;

use fpgalink_frame::{CodecConfig, CHECKSUM_SIZE, COMMAND_HEADER_SIZE};
use fpgalink_transport::{wire_time, DEFAULT_BAUD_RATE};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Device the accelerator board enumerates as on Linux.
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

/// Added on top of the computed wire time of a maximum-size frame.
pub const WRITE_TIMEOUT_MARGIN: Duration = Duration::from_millis(100);

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial device path. Default: `/dev/ttyUSB0`.
    pub device: String,
    /// Fixed baud rate. Default: 576000.
    pub baud: u32,
    /// Terminate the process when the link cannot be opened. Default: true.
    pub exit_on_fail: bool,
    /// Transport write timeout. Default: derived from baud and max payload.
    #[serde(with = "millis_opt", skip_serializing_if = "Option::is_none")]
    pub write_timeout: Option<Duration>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            baud: DEFAULT_BAUD_RATE,
            exit_on_fail: true,
            write_timeout: None,
        }
    }
}

impl LinkConfig {
    /// Effective write timeout for frames carrying at most `max_payload` bytes.
    pub fn write_timeout_for(&self, max_payload: usize) -> Duration {
        self.write_timeout.unwrap_or_else(|| {
            wire_time(COMMAND_HEADER_SIZE + max_payload + CHECKSUM_SIZE, self.baud)
                + WRITE_TIMEOUT_MARGIN
        })
    }
}

/// Which packaging strategy runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackagerStrategy {
    /// One instruction per frame.
    Simple,
    /// Coalesce runs of same-kind table loads.
    #[default]
    Batching,
}

/// Command packager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagerConfig {
    pub strategy: PackagerStrategy,
    /// Most instructions packed into one frame. Default: 8.
    pub batch_window: usize,
    /// How long to wait for more instructions before flushing a partial batch.
    /// Default: 0 (only pack what is already queued).
    #[serde(with = "millis")]
    pub batch_linger: Duration,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            strategy: PackagerStrategy::default(),
            batch_window: 8,
            batch_linger: Duration::ZERO,
        }
    }
}

/// Pipeline driver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// How long to wait for a response to each frame. Default: 1s.
    #[serde(with = "millis")]
    pub response_timeout: Duration,
    /// Write attempts per frame before the link is declared wedged. Default: 3.
    pub write_attempts: u32,
    /// First retry delay; doubles on every further retry. Default: 50ms.
    #[serde(with = "millis")]
    pub retry_backoff: Duration,
    /// Keep reading past BUSY responses until a final status or the timeout.
    /// Default: false.
    pub await_busy: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(1),
            write_attempts: 3,
            retry_backoff: Duration::from_millis(50),
            await_busy: false,
        }
    }
}

impl DriverConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub link: LinkConfig,
    pub codec: CodecConfig,
    pub packager: PackagerConfig,
    pub driver: DriverConfig,
    /// Capacity of each inter-stage queue. Default: 64.
    pub queue_capacity: usize,
}

/// Default capacity of each inter-stage queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            codec: CodecConfig::default(),
            packager: PackagerConfig::default(),
            driver: DriverConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse from JSON text. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config("queue_capacity must be > 0".into()));
        }
        if self.link.baud == 0 {
            return Err(PipelineError::Config("baud must be > 0".into()));
        }
        if self.link.device.is_empty() {
            return Err(PipelineError::Config("device must not be empty".into()));
        }
        if self.packager.batch_window == 0 {
            return Err(PipelineError::Config("batch_window must be > 0".into()));
        }
        if self.driver.write_attempts == 0 {
            return Err(PipelineError::Config("write_attempts must be > 0".into()));
        }
        if self.driver.response_timeout.is_zero() {
            return Err(PipelineError::Config("response_timeout must be > 0".into()));
        }
        if self.codec.max_payload == 0 || self.codec.max_payload > u16::MAX as usize {
            return Err(PipelineError::Config(format!(
                "max_payload must be within 1..={}",
                u16::MAX
            )));
        }
        Ok(())
    }

    /// Effective transport write timeout.
    pub fn write_timeout(&self) -> Duration {
        self.link.write_timeout_for(self.codec.max_payload)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_setup() {
        let config = PipelineConfig::default();
        assert_eq!(config.link.device, "/dev/ttyUSB0");
        assert_eq!(config.link.baud, 576_000);
        assert!(config.link.exit_on_fail);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.packager.strategy, PackagerStrategy::Batching);
        assert_eq!(config.packager.batch_window, 8);
        assert_eq!(config.driver.write_attempts, 3);
        assert!(!config.driver.await_busy);
        config.validate().unwrap();
    }

    #[test]
    fn write_timeout_derived_from_baud() {
        let link = LinkConfig {
            baud: 100_000,
            ..LinkConfig::default()
        };
        // (8 + 991 + 1) bytes * 10 bits / 100000 baud = 100ms, plus margin
        assert_eq!(link.write_timeout_for(991), Duration::from_millis(200));

        let fixed = LinkConfig {
            write_timeout: Some(Duration::from_millis(7)),
            ..LinkConfig::default()
        };
        assert_eq!(fixed.write_timeout_for(4096), Duration::from_millis(7));
    }

    #[test]
    fn backoff_doubles() {
        let driver = DriverConfig::default();
        assert_eq!(driver.backoff_for(1), Duration::from_millis(50));
        assert_eq!(driver.backoff_for(2), Duration::from_millis(100));
        assert_eq!(driver.backoff_for(3), Duration::from_millis(200));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json(
            r#"{
                "link": { "device": "/dev/ttyACM1", "exit_on_fail": false },
                "packager": { "strategy": "simple" },
                "driver": { "response_timeout": 250 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.link.device, "/dev/ttyACM1");
        assert_eq!(config.link.baud, 576_000);
        assert!(!config.link.exit_on_fail);
        assert_eq!(config.packager.strategy, PackagerStrategy::Simple);
        assert_eq!(config.packager.batch_window, 8);
        assert_eq!(config.driver.response_timeout, Duration::from_millis(250));
        assert_eq!(config.queue_capacity, 64);
    }

    #[test]
    fn json_roundtrip() {
        let mut config = PipelineConfig::default();
        config.link.write_timeout = Some(Duration::from_millis(40));
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(PipelineConfig::from_json(&text).unwrap(), config);
    }

    #[test]
    fn validate_rejects_zero_values() {
        let mut config = PipelineConfig::default();
        config.packager.batch_window = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = PipelineConfig::default();
        config.driver.write_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.codec.max_payload = 70_000;
        assert!(config.validate().is_err());
    }
}
