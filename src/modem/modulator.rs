use byteorder::{BigEndian, ByteOrder};
use rustfft::num_complex::Complex;
use tracing::info;

use crate::error::Result;
use crate::fec::FecCodec;
use crate::modem::bytes_to_bits;
use crate::modem::constellation::{BITS_PER_POINT, Constellation};
use crate::modem::dsp::SymbolFft;
use crate::modem::params::OfdmParams;

/// OFDM transmitter: bytes → FEC stream → 64-QAM points → cyclic-prefixed
/// real symbols → marker-framed waveform.
pub struct OfdmModulator {
    params: OfdmParams,
    constellation: Constellation,
    fec: Option<FecCodec>,
    fft: SymbolFft,
    start_marker: Vec<f32>,
}

impl OfdmModulator {
    pub fn new(params: OfdmParams, fec: Option<FecCodec>) -> Self {
        let fft = SymbolFft::new(params.fft_len);
        let start_marker = params.start_marker();
        Self {
            params,
            constellation: Constellation::qam64(),
            fec,
            fft,
            start_marker,
        }
    }

    pub fn params(&self) -> &OfdmParams {
        &self.params
    }

    /// Modulate `data` into a real-valued waveform:
    /// `[start marker | data symbols | end marker]`.
    ///
    /// The FEC stream travels behind a 4-byte big-endian length so the
    /// receiver can strip the zero-bit padding that fills the final symbol.
    pub fn modulate(&self, data: &[u8]) -> Result<Vec<f32>> {
        let coded = match &self.fec {
            Some(codec) => codec.encode(data),
            None => data.to_vec(),
        };

        let mut frame = Vec::with_capacity(4 + coded.len());
        let mut len = [0u8; 4];
        BigEndian::write_u32(&mut len, coded.len() as u32);
        frame.extend_from_slice(&len);
        frame.extend_from_slice(&coded);

        let mut bits = bytes_to_bits(&frame);
        let bits_per_symbol = self.params.bits_per_symbol();
        let padding = (bits_per_symbol - bits.len() % bits_per_symbol) % bits_per_symbol;
        bits.resize(bits.len() + padding, 0);
        let symbol_count = bits.len() / bits_per_symbol;

        let mut waveform = Vec::with_capacity(
            2 * self.start_marker.len() + symbol_count * self.params.samples_per_symbol,
        );
        waveform.extend_from_slice(&self.start_marker);
        for symbol_bits in bits.chunks(bits_per_symbol) {
            self.push_symbol(symbol_bits, &mut waveform);
        }
        waveform.extend(self.start_marker.iter().map(|s| -s));

        info!(
            "modulated {} bytes into {} samples ({} symbols)",
            data.len(),
            waveform.len(),
            symbol_count
        );
        Ok(waveform)
    }

    /// Build one cyclic-prefixed symbol and append it to `out`.
    fn push_symbol(&self, bits: &[u8], out: &mut Vec<f32>) {
        let fft_len = self.params.fft_len;
        let mut spectrum = vec![Complex::new(0.0f32, 0.0); fft_len];

        for (i, group) in bits.chunks(BITS_PER_POINT).enumerate() {
            let mut index = 0u8;
            for &bit in group {
                index = (index << 1) | bit;
            }
            let point = self.constellation.point(index) * self.params.carrier_gain;
            let bin = self.params.first_bin + i;
            spectrum[bin] = point;
            // Mirror image keeps the time-domain signal real.
            spectrum[fft_len - bin] = point.conj();
        }

        let core = self.fft.inverse_real(spectrum);
        debug_assert_eq!(core.len(), fft_len);

        out.extend_from_slice(&core[fft_len - self.params.cp_samples..]);
        out.extend_from_slice(&core);
    }
}
