use std::f64::consts::PI;

use tracing::debug;

use crate::config::{Config, FrequencyRange};
use crate::error::{Error, Result};
use crate::modem::constellation::BITS_PER_POINT;

/// Tone delimiting a transmission. The end marker is the same tone negated.
pub const MARKER_FREQ: f64 = 17_500.0;
pub const MARKER_DURATION: f64 = 0.1;

/// Geometry shared by the modulator and demodulator. Everything is derived
/// from the configured carrier count, cyclic prefix, symbol duration and
/// band; both ends must be constructed from identical configuration.
///
/// A symbol stride is `floor(symbol_duration * fs)` samples, subdivided into
/// `carriers + cyclic_prefix` equal units: the first `cyclic_prefix` units
/// are the prefix, the remaining `carriers` units the core symbol, so the
/// core FFT is `carriers * upsample` points and each of the 64 data carriers
/// lands on one positive-frequency bin (mirrored for a real signal).
#[derive(Clone, Debug)]
pub struct OfdmParams {
    pub sample_rate: u32,
    pub carriers: usize,
    pub cyclic_prefix: usize,
    pub symbol_duration: f64,
    pub freq_range: FrequencyRange,

    pub samples_per_symbol: usize,
    pub upsample: usize,
    pub fft_len: usize,
    pub cp_samples: usize,
    /// Bin index of the first data carrier.
    pub first_bin: usize,
    /// Spectrum magnitude per carrier. Sized so the time-domain symbol
    /// power is on the order of the marker power; the demapper divides the
    /// same factor (and the marker-estimated channel scale) back out.
    pub carrier_gain: f32,
}

/// Average time-domain power of a data symbol (the unit-amplitude marker
/// has power 0.5).
const SYMBOL_POWER_TARGET: f32 = 0.25;

impl OfdmParams {
    pub fn new(config: &Config, freq_range: FrequencyRange) -> Result<Self> {
        FrequencyRange::new(freq_range.min_freq, freq_range.max_freq)?;

        let samples_per_symbol =
            (config.ofdm_symbol_duration * config.sample_rate as f64) as usize;
        let frame_units = config.ofdm_carriers + config.ofdm_cyclic_prefix;
        if config.ofdm_carriers == 0 || frame_units == 0 {
            return Err(Error::Config("OFDM carrier count must be positive".into()));
        }
        if samples_per_symbol < frame_units || samples_per_symbol % frame_units != 0 {
            return Err(Error::Config(format!(
                "symbol duration of {} samples does not divide into {} frame units",
                samples_per_symbol, frame_units
            )));
        }

        let upsample = samples_per_symbol / frame_units;
        let fft_len = config.ofdm_carriers * upsample;
        let cp_samples = config.ofdm_cyclic_prefix * upsample;

        let bin_spacing = config.sample_rate as f64 / fft_len as f64;
        let highest_first = match (fft_len / 2).checked_sub(config.ofdm_carriers) {
            Some(highest) if highest >= 1 => highest,
            _ => {
                return Err(Error::Config(format!(
                    "{} carriers do not fit below Nyquist with an FFT of {}",
                    config.ofdm_carriers, fft_len
                )));
            }
        };
        let wanted = (freq_range.min_freq / bin_spacing).ceil() as usize;
        let first_bin = wanted.clamp(1, highest_first);
        if first_bin != wanted {
            debug!(
                "carrier band clamped: first carrier at {:.0} Hz instead of {:.0} Hz",
                first_bin as f64 * bin_spacing,
                freq_range.min_freq
            );
        }

        // The constellation has unit average energy, so a symbol's mean
        // power is gain^2 * 2 * carriers / fft_len^2 (data bins plus their
        // Hermitian mirrors).
        let carrier_gain = fft_len as f32
            * (SYMBOL_POWER_TARGET / (2.0 * config.ofdm_carriers as f32)).sqrt();

        Ok(Self {
            sample_rate: config.sample_rate,
            carriers: config.ofdm_carriers,
            cyclic_prefix: config.ofdm_cyclic_prefix,
            symbol_duration: config.ofdm_symbol_duration,
            freq_range,
            samples_per_symbol,
            upsample,
            fft_len,
            cp_samples,
            first_bin,
            carrier_gain,
        })
    }

    /// Bits carried by one OFDM symbol.
    pub fn bits_per_symbol(&self) -> usize {
        self.carriers * BITS_PER_POINT
    }

    pub fn marker_len(&self) -> usize {
        (MARKER_DURATION * self.sample_rate as f64) as usize
    }

    /// `sin(2π · 17500 · n / Fs)` over 0.1 s, unit amplitude.
    pub fn start_marker(&self) -> Vec<f32> {
        let step = 2.0 * PI * MARKER_FREQ / self.sample_rate as f64;
        (0..self.marker_len())
            .map(|n| (step * n as f64).sin() as f32)
            .collect()
    }

    pub fn end_marker(&self) -> Vec<f32> {
        self.start_marker().iter().map(|s| -s).collect()
    }

    /// Center frequency of each data carrier on the FFT bin grid.
    pub fn carrier_frequencies(&self) -> Vec<f64> {
        let bin_spacing = self.sample_rate as f64 / self.fft_len as f64;
        (0..self.carriers)
            .map(|i| (self.first_bin + i) as f64 * bin_spacing)
            .collect()
    }
}
