use std::path::Path;
use std::time::Duration;

use crossbeam_channel::Receiver as ChunkReceiver;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info, warn};

use crate::audio::{AudioBoundary, Listener, SampleSink, SampleSource};
use crate::compression::HuffmanCompressor;
use crate::config::{Config, FrequencyRange};
use crate::crypto;
use crate::error::{Error, Result};
use crate::fec::FecCodec;
use crate::modem::{OfdmDemodulator, OfdmModulator, OfdmParams};

/// Which shaping stages run on the way out. Both endpoints must agree
/// out-of-band.
#[derive(Clone, Copy, Debug)]
pub struct SendOptions {
    pub compress: bool,
    pub encrypt: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            compress: true,
            encrypt: true,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ReceiveOptions {
    pub decompress: bool,
    pub decrypt: bool,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            decompress: true,
            decrypt: true,
        }
    }
}

fn build_fec(config: &Config) -> Result<Option<FecCodec>> {
    if config.reed_solomon_enabled {
        Ok(Some(FecCodec::new(config.rs_n, config.rs_k)?))
    } else {
        Ok(None)
    }
}

/// Outbound pipeline: payload → compress → seal → modulate → audio sink.
pub struct Sender {
    compressor: HuffmanCompressor,
    modulator: OfdmModulator,
    boundary: AudioBoundary,
}

impl Sender {
    pub fn new(config: &Config, freq_range: FrequencyRange) -> Result<Self> {
        let params = OfdmParams::new(config, freq_range)?;
        info!(
            "sender ready: {} carriers over {}, {} samples per symbol",
            params.carriers, freq_range, params.samples_per_symbol
        );
        Ok(Self {
            compressor: HuffmanCompressor::new(),
            modulator: OfdmModulator::new(params, build_fec(config)?),
            boundary: AudioBoundary::new(config),
        })
    }

    pub fn new_default() -> Result<Self> {
        let config = Config::default();
        let freq_range = config.default_freq_range;
        Self::new(&config, freq_range)
    }

    /// Run the shaping stages and the modulator, returning the waveform
    /// that would go on the air.
    pub fn prepare(
        &mut self,
        payload: &[u8],
        recipient: Option<&RsaPublicKey>,
        options: SendOptions,
    ) -> Result<Vec<f32>> {
        let mut data = payload.to_vec();

        if options.compress {
            data = self.compressor.compress(&data);
            debug!(
                "compression stage: {} -> {} bytes",
                payload.len(),
                data.len()
            );
        }

        if options.encrypt {
            let key = recipient.ok_or_else(|| {
                Error::Key("encryption requested without a recipient public key".to_string())
            })?;
            data = crypto::seal(&data, key)?;
            debug!("envelope stage: {} bytes", data.len());
        }

        self.modulator.modulate(&data)
    }

    /// Push a prepared waveform to the sink and wait for it to drain.
    pub fn transmit_waveform<S: SampleSink>(
        &mut self,
        sink: &mut S,
        waveform: &[f32],
    ) -> Result<()> {
        self.boundary.transmit(sink, waveform)
    }

    /// Run the selected stages and push the waveform to the sink. Returns
    /// once the sink has accepted (and drained) the entire waveform.
    pub fn send<S: SampleSink>(
        &mut self,
        payload: &[u8],
        recipient: Option<&RsaPublicKey>,
        options: SendOptions,
        sink: &mut S,
    ) -> Result<()> {
        let waveform = self.prepare(payload, recipient, options)?;
        self.transmit_waveform(sink, &waveform)?;
        info!("sent {} payload bytes", payload.len());
        Ok(())
    }

    pub fn send_text<S: SampleSink>(
        &mut self,
        text: &str,
        recipient: Option<&RsaPublicKey>,
        options: SendOptions,
        sink: &mut S,
    ) -> Result<()> {
        self.send(text.as_bytes(), recipient, options, sink)
    }

    pub fn send_file<S: SampleSink>(
        &mut self,
        path: &Path,
        recipient: Option<&RsaPublicKey>,
        options: SendOptions,
        sink: &mut S,
    ) -> Result<()> {
        let payload = std::fs::read(path)?;
        info!("sending file {} ({} bytes)", path.display(), payload.len());
        self.send(&payload, recipient, options, sink)
    }

    /// Statistics of the most recent compression stage.
    pub fn compression_stats(&self) -> crate::compression::CompressionStats {
        self.compressor.stats()
    }
}

/// Inbound pipeline: audio source → demodulate → open → decompress →
/// payload.
pub struct Receiver {
    config: Config,
    freq_range: FrequencyRange,
    compressor: HuffmanCompressor,
    demodulator: OfdmDemodulator,
    boundary: AudioBoundary,
}

impl Receiver {
    pub fn new(config: &Config, freq_range: FrequencyRange) -> Result<Self> {
        let params = OfdmParams::new(config, freq_range)?;
        info!(
            "receiver ready: {} carriers over {}",
            params.carriers, freq_range
        );
        Ok(Self {
            config: config.clone(),
            freq_range,
            compressor: HuffmanCompressor::new(),
            demodulator: OfdmDemodulator::new(params, build_fec(config)?),
            boundary: AudioBoundary::new(config),
        })
    }

    pub fn new_default() -> Result<Self> {
        let config = Config::default();
        let freq_range = config.default_freq_range;
        Self::new(&config, freq_range)
    }

    /// Capture one transmission and run the inverse stages.
    ///
    /// [`Error::ReceiveTimeout`] means the window closed with no signal at
    /// all; every other error means a signal arrived but did not decode.
    pub fn receive<S: SampleSource>(
        &mut self,
        source: &mut S,
        timeout: Duration,
        private: Option<&RsaPrivateKey>,
        options: ReceiveOptions,
    ) -> Result<Vec<u8>> {
        let audio = self
            .boundary
            .receive(source, timeout)?
            .ok_or(Error::ReceiveTimeout)?;

        self.decode(&audio, private, options)
    }

    /// Demodulate and unwrap an already-captured recording.
    pub fn decode(
        &mut self,
        audio: &[f32],
        private: Option<&RsaPrivateKey>,
        options: ReceiveOptions,
    ) -> Result<Vec<u8>> {
        let mut data = self.demodulator.demodulate(audio)?;

        if options.decrypt {
            let key = private.ok_or_else(|| {
                Error::Key("decryption requested without a private key".to_string())
            })?;
            data = crypto::open(&data, key)?;
            debug!("envelope opened: {} bytes", data.len());
        }

        if options.decompress {
            data = self.compressor.decompress(&data)?;
            debug!("decompressed: {} bytes", data.len());
        }

        info!("received {} payload bytes", data.len());
        Ok(data)
    }

    pub fn receive_text<S: SampleSource>(
        &mut self,
        source: &mut S,
        timeout: Duration,
        private: Option<&RsaPrivateKey>,
        options: ReceiveOptions,
    ) -> Result<String> {
        let data = self.receive(source, timeout, private, options)?;
        String::from_utf8(data)
            .map_err(|_| Error::Demod("received data is not valid UTF-8".to_string()))
    }

    pub fn receive_to_file<S: SampleSource>(
        &mut self,
        source: &mut S,
        output: &Path,
        timeout: Duration,
        private: Option<&RsaPrivateKey>,
        options: ReceiveOptions,
    ) -> Result<()> {
        let data = self.receive(source, timeout, private, options)?;
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(output, &data)?;
        info!("saved {} bytes to {}", data.len(), output.display());
        Ok(())
    }

    /// Continuous listening: each buffered transmission is decoded off the
    /// chunk queue and delivered to `callback`; undecodable audio is
    /// dropped and the worker keeps listening.
    pub fn start_listening<F>(
        &self,
        chunks: ChunkReceiver<Vec<i16>>,
        private: Option<RsaPrivateKey>,
        options: ReceiveOptions,
        mut callback: F,
    ) -> Result<Listener>
    where
        F: FnMut(Vec<u8>) + Send + 'static,
    {
        // The worker owns its own decoding pipeline; the chunk queue is the
        // only shared state.
        let params = OfdmParams::new(&self.config, self.freq_range)?;
        let mut demodulator = OfdmDemodulator::new(params, build_fec(&self.config)?);
        let mut compressor = HuffmanCompressor::new();

        let listener = self.boundary.listen(chunks, move |audio| {
            let mut stage = || -> Result<Vec<u8>> {
                let mut data = demodulator.demodulate(&audio)?;
                if options.decrypt {
                    let key = private.as_ref().ok_or_else(|| {
                        Error::Key("decryption requested without a private key".to_string())
                    })?;
                    data = crypto::open(&data, key)?;
                }
                if options.decompress {
                    data = compressor.decompress(&data)?;
                }
                Ok(data)
            };
            match stage() {
                Ok(payload) => callback(payload),
                Err(e) => warn!("dropped undecodable transmission: {e}"),
            }
        });
        info!("continuous listening started");
        Ok(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MemorySink, MemorySource};

    fn loopback(
        payload: &[u8],
        send_options: SendOptions,
        receive_options: ReceiveOptions,
        keys: Option<(&RsaPrivateKey, &RsaPublicKey)>,
    ) -> Result<Vec<u8>> {
        let config = Config::default();
        let mut sender = Sender::new(&config, config.default_freq_range)?;
        let mut receiver = Receiver::new(&config, config.default_freq_range)?;

        let mut sink = MemorySink::new();
        sender.send(
            payload,
            keys.map(|(_, public)| public),
            send_options,
            &mut sink,
        )?;

        let mut source = MemorySource::from_samples(sink.samples(), config.chunk_size);
        receiver.receive(
            &mut source,
            Duration::from_secs(30),
            keys.map(|(private, _)| private),
            receive_options,
        )
    }

    #[test]
    fn plain_loopback() {
        let options = SendOptions {
            compress: false,
            encrypt: false,
        };
        let receive = ReceiveOptions {
            decompress: false,
            decrypt: false,
        };
        let payload = b"no shaping stages at all";
        assert_eq!(loopback(payload, options, receive, None).unwrap(), payload);
    }

    #[test]
    fn compressed_loopback() {
        let options = SendOptions {
            compress: true,
            encrypt: false,
        };
        let receive = ReceiveOptions {
            decompress: true,
            decrypt: false,
        };
        let payload = b"compressible compressible compressible";
        assert_eq!(loopback(payload, options, receive, None).unwrap(), payload);
    }

    #[test]
    fn encryption_without_a_key_fails_up_front() {
        let config = Config::default();
        let mut sender = Sender::new(&config, config.default_freq_range).unwrap();
        let mut sink = MemorySink::new();
        let result = sender.send(b"secret", None, SendOptions::default(), &mut sink);
        assert!(matches!(result, Err(Error::Key(_))));
        // Nothing was emitted.
        assert!(sink.samples().is_empty());
    }

    #[test]
    fn timeout_with_no_signal_is_distinguishable() {
        let config = Config::default();
        let mut receiver = Receiver::new(&config, config.default_freq_range).unwrap();
        let mut source = MemorySource::from_samples(&[], config.chunk_size);
        let result = receiver.receive(
            &mut source,
            Duration::from_millis(100),
            None,
            ReceiveOptions {
                decompress: false,
                decrypt: false,
            },
        );
        assert!(matches!(result, Err(Error::ReceiveTimeout)));
    }
}
