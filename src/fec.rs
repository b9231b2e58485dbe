use reed_solomon::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const DEFAULT_N: usize = 255;
pub const DEFAULT_K: usize = 223;

/// Outcome of a forward-error-correction decode. `success` is false when at
/// least one block was beyond correction capacity; its raw data bytes are
/// still present so upstream decoders can attempt a best-effort parse.
#[derive(Debug)]
pub struct FecDecodeReport {
    pub data: Vec<u8>,
    pub errors_corrected: usize,
    pub success: bool,
}

/// Systematic (n, k) Reed-Solomon codec over GF(2^8). Data is processed in
/// k-byte blocks with n-k parity bytes appended per block; the final block
/// may be shorter (shortened code).
pub struct FecCodec {
    n: usize,
    k: usize,
    ecc_len: usize,
    encoder: Encoder,
    decoder: Decoder,
}

impl FecCodec {
    pub fn new(n: usize, k: usize) -> Result<Self> {
        if n <= k || n > 255 || k == 0 {
            return Err(Error::Config(format!(
                "invalid Reed-Solomon parameters ({n}, {k})"
            )));
        }
        let ecc_len = n - k;
        Ok(Self {
            n,
            k,
            ecc_len,
            encoder: Encoder::new(ecc_len),
            decoder: Decoder::new(ecc_len),
        })
    }

    pub fn default_code() -> Result<Self> {
        Self::new(DEFAULT_N, DEFAULT_K)
    }

    /// Bytes a block of this code can repair.
    pub fn correction_capacity(&self) -> usize {
        self.ecc_len / 2
    }

    pub fn encoded_len(&self, data_len: usize) -> usize {
        data_len + data_len.div_ceil(self.k) * self.ecc_len
    }

    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len(data.len()));
        for block in data.chunks(self.k) {
            let encoded = self.encoder.encode(block);
            out.extend_from_slice(&encoded);
        }
        debug!(
            "FEC({}, {}): encoded {} bytes into {} bytes",
            self.n,
            self.k,
            data.len(),
            out.len()
        );
        out
    }

    pub fn decode(&self, data: &[u8]) -> FecDecodeReport {
        let mut out = Vec::with_capacity(data.len());
        let mut errors_corrected = 0;
        let mut success = true;

        for block in data.chunks(self.n) {
            if block.len() <= self.ecc_len {
                warn!(
                    "FEC block of {} bytes has no data region; passing through",
                    block.len()
                );
                out.extend_from_slice(block);
                success = false;
                continue;
            }
            match self.decoder.correct(block, None) {
                Ok(fixed) => {
                    errors_corrected += block
                        .iter()
                        .zip(fixed.iter())
                        .filter(|(a, b)| a != b)
                        .count();
                    out.extend_from_slice(fixed.data());
                }
                Err(e) => {
                    warn!("uncorrectable FEC block ({e:?}); returning raw bytes");
                    out.extend_from_slice(&block[..block.len() - self.ecc_len]);
                    success = false;
                }
            }
        }

        if errors_corrected > 0 {
            debug!("FEC corrected {errors_corrected} byte errors");
        }
        FecDecodeReport {
            data: out,
            errors_corrected,
            success,
        }
    }
}
