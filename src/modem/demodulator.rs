use byteorder::{BigEndian, ByteOrder};
use rustfft::num_complex::Complex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fec::FecCodec;
use crate::modem::bits_to_bytes;
use crate::modem::constellation::{BITS_PER_POINT, Constellation};
use crate::modem::dsp::{self, SymbolFft};
use crate::modem::params::OfdmParams;

/// Minimum normalized marker correlation accepted as a real marker.
const MARKER_QUALITY_FLOOR: f64 = 0.5;

/// Phases a recording passes through. `Delivered` and `Failed` are terminal;
/// a recording is never demodulated twice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Detecting,
    Extracting,
    Decoding,
    Delivered,
    Failed,
}

struct FrameRegion {
    start: usize,
    end: usize,
    /// Received marker amplitude relative to the modulator's unit marker.
    amplitude: f64,
}

/// OFDM receiver: marker detection → symbol extraction → FFT → nearest-point
/// demapping → FEC decoding.
pub struct OfdmDemodulator {
    params: OfdmParams,
    constellation: Constellation,
    fec: Option<FecCodec>,
    fft: SymbolFft,
    start_marker: Vec<f32>,
    end_marker: Vec<f32>,
    marker_energy: f64,
    state: ReceiverState,
}

impl OfdmDemodulator {
    pub fn new(params: OfdmParams, fec: Option<FecCodec>) -> Self {
        let fft = SymbolFft::new(params.fft_len);
        let start_marker = params.start_marker();
        let end_marker = params.end_marker();
        let marker_energy = dsp::energy(&start_marker);
        Self {
            params,
            constellation: Constellation::qam64(),
            fec,
            fft,
            start_marker,
            end_marker,
            marker_energy,
            state: ReceiverState::Idle,
        }
    }

    pub fn params(&self) -> &OfdmParams {
        &self.params
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Demodulate one recording into the payload bytes handed to the
    /// modulator on the far side.
    pub fn demodulate(&mut self, recording: &[f32]) -> Result<Vec<u8>> {
        self.state = ReceiverState::Idle;
        let result = self.run(recording);
        self.state = match result {
            Ok(_) => ReceiverState::Delivered,
            Err(_) => ReceiverState::Failed,
        };
        result
    }

    fn run(&mut self, recording: &[f32]) -> Result<Vec<u8>> {
        self.state = ReceiverState::Detecting;
        let region = self.detect_frame(recording)?;

        self.state = ReceiverState::Extracting;
        let points = self.extract_points(&recording[region.start..region.end]);

        self.state = ReceiverState::Decoding;
        let bits = self.demap(points, region.amplitude);
        if bits.len() % 8 != 0 {
            return Err(Error::Demod(format!(
                "{} demodulated bits are not a whole number of bytes",
                bits.len()
            )));
        }
        let bytes = bits_to_bytes(&bits);
        self.unframe(&bytes)
    }

    /// Locate the data region between the start and end markers and estimate
    /// the received amplitude from the start-marker correlation peak.
    fn detect_frame(&self, recording: &[f32]) -> Result<FrameRegion> {
        let start_peak =
            dsp::correlate_peak(recording, &self.start_marker).ok_or(Error::NoFrame)?;
        if start_peak.quality < MARKER_QUALITY_FLOOR {
            debug!(
                "start marker quality {:.2} below floor; no frame",
                start_peak.quality
            );
            return Err(Error::NoFrame);
        }

        let amplitude = start_peak.value.abs() / self.marker_energy;
        let data_start = start_peak.offset + self.start_marker.len();
        debug!(
            "start marker at sample {} (quality {:.2}, amplitude {:.3})",
            start_peak.offset, start_peak.quality, amplitude
        );

        // Search from the data start onward; the correlation magnitude is
        // sign-blind and would otherwise lock onto the start marker itself.
        let tail = &recording[data_start.min(recording.len())..];
        let end_peak = dsp::correlate_peak(tail, &self.end_marker).ok_or(Error::NoFrame)?;
        if end_peak.quality < MARKER_QUALITY_FLOOR {
            debug!(
                "end marker quality {:.2} below floor; no frame",
                end_peak.quality
            );
            return Err(Error::NoFrame);
        }

        let data_end = data_start + end_peak.offset;
        if data_end <= data_start {
            // Marker pair with nothing between them.
            return Err(Error::NoFrame);
        }
        debug!("data region: samples {data_start}..{data_end}");

        Ok(FrameRegion {
            start: data_start,
            end: data_end,
            amplitude,
        })
    }

    /// Walk the data region in whole symbol strides, strip each cyclic
    /// prefix and collect the carrier bins.
    fn extract_points(&self, region: &[f32]) -> Vec<Complex<f32>> {
        let stride = self.params.samples_per_symbol;
        let mut points =
            Vec::with_capacity((region.len() / stride) * self.params.carriers);
        for symbol in region.chunks_exact(stride) {
            let core = &symbol[self.params.cp_samples..];
            let bins = self.fft.forward_bins(core);
            for i in 0..self.params.carriers {
                points.push(bins[self.params.first_bin + i]);
            }
        }
        debug!(
            "extracted {} constellation points from {} symbols",
            points.len(),
            region.len() / stride
        );
        points
    }

    fn demap(&self, points: Vec<Complex<f32>>, amplitude: f64) -> Vec<u8> {
        // The marker amplitude undoes the audio boundary's rescaling; the
        // carrier gain undoes the modulator's spectrum scaling.
        let scale = 1.0 / (amplitude as f32 * self.params.carrier_gain).max(f32::MIN_POSITIVE);
        let mut bits = Vec::with_capacity(points.len() * BITS_PER_POINT);
        for point in points {
            let index = self.constellation.nearest(point * scale);
            for shift in (0..BITS_PER_POINT).rev() {
                bits.push((index >> shift) & 1);
            }
        }
        bits
    }

    /// Strip the length prefix and padding, then FEC-decode.
    fn unframe(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() < 4 {
            return Err(Error::Demod("stream too short for a length field".into()));
        }
        let coded_len = BigEndian::read_u32(&bytes[..4]) as usize;
        if coded_len > bytes.len() - 4 {
            return Err(Error::Demod(format!(
                "length field claims {} bytes but only {} arrived",
                coded_len,
                bytes.len() - 4
            )));
        }
        let coded = &bytes[4..4 + coded_len];

        let payload = match &self.fec {
            Some(codec) => {
                let report = codec.decode(coded);
                if !report.success {
                    warn!("FEC could not fully correct the stream; payload is suspect");
                }
                report.data
            }
            None => coded.to_vec(),
        };
        info!("demodulated {} payload bytes", payload.len());
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::modem::OfdmModulator;

    fn pair() -> (OfdmModulator, OfdmDemodulator) {
        let config = Config::default();
        let params = OfdmParams::new(&config, config.default_freq_range).unwrap();
        let modulator =
            OfdmModulator::new(params.clone(), Some(FecCodec::default_code().unwrap()));
        let demodulator = OfdmDemodulator::new(params, Some(FecCodec::default_code().unwrap()));
        (modulator, demodulator)
    }

    #[test]
    fn clean_channel_round_trip() {
        let (modulator, mut demodulator) = pair();
        let payload = b"Ultrasound carries bytes.";
        let waveform = modulator.modulate(payload).unwrap();
        let decoded = demodulator.demodulate(&waveform).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(demodulator.state(), ReceiverState::Delivered);
    }

    #[test]
    fn round_trip_survives_attenuation() {
        let (modulator, mut demodulator) = pair();
        let payload = b"half volume";
        let waveform: Vec<f32> = modulator
            .modulate(payload)
            .unwrap()
            .iter()
            .map(|s| s * 0.31)
            .collect();
        assert_eq!(demodulator.demodulate(&waveform).unwrap(), payload);
    }

    #[test]
    fn silence_is_no_frame() {
        let (_, mut demodulator) = pair();
        let silence = vec![0.0f32; 48_000];
        assert!(matches!(
            demodulator.demodulate(&silence),
            Err(Error::NoFrame)
        ));
        assert_eq!(demodulator.state(), ReceiverState::Failed);
    }

    #[test]
    fn marker_only_waveform_is_no_frame() {
        let (modulator, mut demodulator) = pair();
        let params = modulator.params();
        let mut waveform = params.start_marker();
        waveform.extend(params.end_marker());
        assert!(matches!(
            demodulator.demodulate(&waveform),
            Err(Error::NoFrame)
        ));
    }

    #[test]
    fn leading_and_trailing_silence_are_ignored() {
        let (modulator, mut demodulator) = pair();
        let payload = b"padded capture";
        let core = modulator.modulate(payload).unwrap();
        let mut waveform = vec![0.0f32; 3000];
        waveform.extend_from_slice(&core);
        waveform.extend(vec![0.0f32; 5000]);
        assert_eq!(demodulator.demodulate(&waveform).unwrap(), payload);
    }
}
