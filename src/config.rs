//! Runtime configuration
//!
//! Everything here has a working default; a TOML file only needs to name
//! the values it changes.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_SAMPLE_RATE, MAX_TRANSFERS_PER_CHANNEL, PACKETS_PER_TRANSFER, TRANSFERS_PER_CHANNEL,
};
use crate::error::{Error, Result};

/// Streaming core configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Outstanding transfers kept queued per channel
    pub transfers_per_channel: usize,
    /// Isochronous packets per transfer
    pub packets_per_transfer: usize,
    /// Rate negotiation timing
    pub negotiation: NegotiationConfig,
    /// Upper bound on waiting for cancelled transfers to come back
    pub cleanup_timeout_ms: u64,
    /// Window in which repeated opens are treated as host probing
    pub probe_window_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            transfers_per_channel: TRANSFERS_PER_CHANNEL,
            packets_per_transfer: PACKETS_PER_TRANSFER,
            negotiation: NegotiationConfig::default(),
            cleanup_timeout_ms: 1000,
            probe_window_ms: 1000,
        }
    }
}

/// Rate negotiation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// SET_CUR/GET_CUR attempts per negotiation
    pub attempts: u32,
    /// Pause between attempts
    pub retry_delay_ms: u64,
    /// Pause after the streaming interfaces are reactivated
    pub settle_delay_ms: u64,
    /// Timeout for handshake control requests
    pub control_timeout_ms: u64,
    /// Timeout for the configure-time rate read-back
    pub readback_timeout_ms: u64,
    /// Rate used when negotiation at the requested rate fails
    pub default_rate: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay_ms: 150,
            settle_delay_ms: 200,
            control_timeout_ms: 1000,
            readback_timeout_ms: 500,
            default_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl NegotiationConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn readback_timeout(&self) -> Duration {
        Duration::from_millis(self.readback_timeout_ms)
    }

    /// No delays; used by tests and the simulator
    pub fn immediate() -> Self {
        Self {
            retry_delay_ms: 0,
            settle_delay_ms: 0,
            ..Self::default()
        }
    }
}

impl StreamConfig {
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }

    pub fn probe_window(&self) -> Duration {
        Duration::from_millis(self.probe_window_ms)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: StreamConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from the default location, or fall back to defaults when absent
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Platform configuration path, e.g. `~/.config/zg01-stream/stream.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "zg01-stream").map(|dirs| dirs.config_dir().join("stream.toml"))
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.transfers_per_channel == 0 {
            return Err(Error::Config("transfers_per_channel must be at least 1".into()));
        }
        if self.transfers_per_channel > MAX_TRANSFERS_PER_CHANNEL {
            return Err(Error::Config(format!(
                "transfers_per_channel must be at most {}",
                MAX_TRANSFERS_PER_CHANNEL
            )));
        }
        if self.packets_per_transfer == 0 {
            return Err(Error::Config("packets_per_transfer must be at least 1".into()));
        }
        if self.negotiation.attempts == 0 {
            return Err(Error::Config("negotiation.attempts must be at least 1".into()));
        }
        Ok(())
    }
}
