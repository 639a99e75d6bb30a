//! Common types for the loopback tester: channel/run configuration and errors.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Lowest SCLK the Raspberry Pi SPI controller can divide down to.
pub const MIN_CLOCK_SPEED: u32 = 3_814;
/// Highest SCLK the Raspberry Pi SPI controller accepts.
pub const MAX_CLOCK_SPEED: u32 = 125_000_000;
/// Only byte-wide words are supported by the slave firmware.
pub const BITS_PER_WORD: u8 = 8;

/// Configuration for the SPI channel under test
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// SPI bus index (0 = /dev/spidev0.x)
    pub bus: u8,
    /// Chip select index on that bus
    pub chip_select: u8,
    /// Clock speed in Hz
    pub speed_hz: u32,
    /// Clock mode, CPOL/CPHA combined (0..=3).
    /// Mode 0 does not work against the RP2040 in slave mode, so 1 is the default.
    pub mode: u8,
    pub bits_per_word: u8,
    /// Shift out the least significant bit first
    pub lsb_first: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            bus: 0,
            chip_select: 0,
            speed_hz: 1_000_000,
            mode: 1,
            bits_per_word: BITS_PER_WORD,
            lsb_first: false,
        }
    }
}

impl ChannelConfig {
    /// Reject parameters the SPI driver would refuse before touching the device.
    pub fn validate(&self) -> Result<(), LoopbackError> {
        if self.mode > 3 {
            return Err(LoopbackError::ConfigurationError(format!(
                "Invalid SPI mode: {}. Supported modes are 0-3",
                self.mode
            )));
        }
        if !(MIN_CLOCK_SPEED..=MAX_CLOCK_SPEED).contains(&self.speed_hz) {
            return Err(LoopbackError::ConfigurationError(format!(
                "Clock speed {} Hz out of range ({}-{} Hz)",
                self.speed_hz, MIN_CLOCK_SPEED, MAX_CLOCK_SPEED
            )));
        }
        if self.bits_per_word != BITS_PER_WORD {
            return Err(LoopbackError::ConfigurationError(format!(
                "Unsupported word size: {} bits, expected {}",
                self.bits_per_word, BITS_PER_WORD
            )));
        }
        if self.bus > 6 {
            return Err(LoopbackError::ConfigurationError(format!(
                "Invalid SPI bus: {}. Supported buses are 0-6",
                self.bus
            )));
        }
        if self.chip_select > 15 {
            return Err(LoopbackError::ConfigurationError(format!(
                "Invalid chip select: {}. Supported values are 0-15",
                self.chip_select
            )));
        }
        Ok(())
    }
}

/// Loop pacing and stop conditions
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Pause between iterations in milliseconds
    pub interval_ms: u64,
    /// Stop after this many transfers; run until interrupted when unset
    pub iterations: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            iterations: None,
        }
    }
}

impl RunConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Top-level layout of the optional TOML config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TesterConfig {
    pub channel: ChannelConfig,
    pub run: RunConfig,
}

impl TesterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, LoopbackError> {
        toml::from_str(s).map_err(|e| LoopbackError::ConfigFile(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, LoopbackError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LoopbackError::ConfigFile(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }
}

/// Why the run loop returned without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The operator interrupted the run
    Interrupted,
    /// The configured number of iterations completed
    IterationLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub reason: StopReason,
}

/// Errors that can occur while testing an SPI channel
#[derive(Error, Debug)]
pub enum LoopbackError {
    /// The SPI device could not be opened
    #[error("SPI device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Invalid or rejected channel parameters
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// A full-duplex transfer failed
    #[error("SPI transfer error: {0}")]
    TransferError(String),
    /// Unreadable or malformed config file
    #[error("Config file error: {0}")]
    ConfigFile(String),
    /// Console output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "hardware")]
impl From<rppal::spi::Error> for LoopbackError {
    fn from(err: rppal::spi::Error) -> Self {
        match err {
            rppal::spi::Error::Io(e) => LoopbackError::TransferError(e.to_string()),
            other => LoopbackError::ConfigurationError(other.to_string()),
        }
    }
}
