use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Frequency band the carriers should occupy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRange {
    pub min_freq: f64,
    pub max_freq: f64,
}

impl FrequencyRange {
    pub fn new(min_freq: f64, max_freq: f64) -> Result<Self> {
        if min_freq < 0.0 || max_freq < 0.0 {
            return Err(Error::Config("frequencies must be positive".into()));
        }
        if min_freq >= max_freq {
            return Err(Error::Config(format!(
                "min_freq {min_freq} must be less than max_freq {max_freq}"
            )));
        }
        Ok(Self { min_freq, max_freq })
    }

    pub fn bandwidth(&self) -> f64 {
        self.max_freq - self.min_freq
    }

    pub fn center_freq(&self) -> f64 {
        (self.min_freq + self.max_freq) / 2.0
    }
}

impl Default for FrequencyRange {
    fn default() -> Self {
        Self {
            min_freq: 18_000.0,
            max_freq: 22_000.0,
        }
    }
}

impl fmt::Display for FrequencyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} Hz", self.min_freq, self.max_freq)
    }
}

/// Runtime configuration, persisted as JSON. Missing fields fall back to
/// the defaults, so older config files keep loading.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // audio
    pub sample_rate: u32,
    pub chunk_size: usize,
    pub channels: u16,

    // communication
    pub default_bitrate: u32,
    pub default_freq_range: FrequencyRange,

    // security
    pub encryption_enabled: bool,
    pub compression_enabled: bool,

    // error correction
    pub reed_solomon_enabled: bool,
    pub rs_n: usize,
    pub rs_k: usize,

    // OFDM
    pub ofdm_carriers: usize,
    pub ofdm_cyclic_prefix: usize,
    pub ofdm_symbol_duration: f64,

    // audio processing
    pub noise_filter_enabled: bool,
    pub adaptive_gain: bool,
    pub max_gain: f64,

    // logging
    pub log_level: String,
    pub log_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            chunk_size: 1024,
            channels: 1,
            default_bitrate: 80_000,
            default_freq_range: FrequencyRange::default(),
            encryption_enabled: true,
            compression_enabled: true,
            reed_solomon_enabled: true,
            rs_n: 255,
            rs_k: 223,
            ofdm_carriers: 64,
            ofdm_cyclic_prefix: 16,
            ofdm_symbol_duration: 0.01,
            noise_filter_enabled: true,
            adaptive_gain: true,
            max_gain: 10.0,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        FrequencyRange::new(
            config.default_freq_range.min_freq,
            config.default_freq_range.max_freq,
        )?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
