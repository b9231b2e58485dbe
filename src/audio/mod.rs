pub mod device;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;

/// Transmit waveforms are rescaled to this peak before quantization.
pub const PEAK_TARGET: f32 = 0.8;
/// Mean-square energy (on int16 samples) below which a chunk counts as
/// silence.
pub const ENERGY_FLOOR: f64 = 100.0;
/// Chunks captured before end-of-transmission detection arms (~0.21 s).
const WARMUP_CHUNKS: usize = 10;
/// Sliding listen window.
const LISTEN_WINDOW_SECS: usize = 5;
const LISTEN_POLL: Duration = Duration::from_millis(250);

/// Consumes 16-bit mono PCM in fixed-size chunks.
pub trait SampleSink {
    fn write_chunk(&mut self, chunk: &[i16]) -> Result<()>;

    /// Block until everything written so far has left the sink.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Yields 16-bit mono PCM chunks. `Ok(None)` means nothing arrived within
/// the timeout.
pub trait SampleSource {
    fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<i16>>>;
}

/// Rescale so the peak sits at [`PEAK_TARGET`].
pub fn normalize(waveform: &[f32]) -> Vec<f32> {
    let peak = waveform.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
    if peak > 0.0 {
        let scale = PEAK_TARGET / peak;
        waveform.iter().map(|s| s * scale).collect()
    } else {
        waveform.to_vec()
    }
}

pub fn quantize(waveform: &[f32]) -> Vec<i16> {
    waveform
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

pub fn dequantize(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32767.0).collect()
}

pub fn chunk_energy(chunk: &[i16]) -> f64 {
    if chunk.is_empty() {
        return 0.0;
    }
    chunk.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / chunk.len() as f64
}

/// Couples the modem to the PCM world: normalization, quantization,
/// chunking, and energy-gated end-of-transmission detection.
pub struct AudioBoundary {
    chunk_size: usize,
    sample_rate: u32,
}

impl AudioBoundary {
    pub fn new(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size,
            sample_rate: config.sample_rate,
        }
    }

    /// Normalize, quantize and push the waveform to the sink chunk by
    /// chunk, then wait for the sink to drain.
    pub fn transmit<S: SampleSink>(&self, sink: &mut S, waveform: &[f32]) -> Result<()> {
        let pcm = quantize(&normalize(waveform));
        info!(
            "transmitting {} samples ({:.2} s)",
            pcm.len(),
            pcm.len() as f64 / self.sample_rate as f64
        );
        for chunk in pcm.chunks(self.chunk_size) {
            sink.write_chunk(chunk)?;
        }
        sink.flush()
    }

    /// Pull chunks until the transmission ends or the timeout expires.
    ///
    /// After a short warmup, two consecutive chunks below [`ENERGY_FLOOR`]
    /// are read as end-of-transmission. Returns `None` when nothing was
    /// captured at all.
    pub fn receive<S: SampleSource>(
        &self,
        source: &mut S,
        timeout: Duration,
    ) -> Result<Option<Vec<f32>>> {
        let deadline = Instant::now() + timeout;
        let mut pcm: Vec<i16> = Vec::new();
        let mut chunks = 0usize;
        let mut quiet = 0usize;

        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!("receive window closed after {chunks} chunks");
                break;
            }
            match source.read_chunk(deadline - now)? {
                None => break,
                Some(chunk) => {
                    chunks += 1;
                    let energy = chunk_energy(&chunk);
                    pcm.extend_from_slice(&chunk);
                    if chunks > WARMUP_CHUNKS && energy < ENERGY_FLOOR {
                        quiet += 1;
                        if quiet >= 2 {
                            debug!("end of transmission after {chunks} chunks");
                            break;
                        }
                    } else {
                        quiet = 0;
                    }
                }
            }
        }

        if pcm.is_empty() {
            return Ok(None);
        }
        info!("captured {} samples", pcm.len());
        Ok(Some(dequantize(&pcm)))
    }

    /// Continuous capture. A worker thread accumulates chunks into a
    /// sliding window (capped at ~5 s, oldest dropped) and hands the
    /// buffered audio to `callback` whenever a transmission appears to have
    /// ended. Call [`Listener::stop`] to tear down; residual audio is
    /// discarded.
    pub fn listen<F>(&self, chunks: Receiver<Vec<i16>>, mut callback: F) -> Listener
    where
        F: FnMut(Vec<f32>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let window_cap = LISTEN_WINDOW_SECS * self.sample_rate as usize;

        let worker = std::thread::spawn(move || {
            let mut buffer: Vec<i16> = Vec::new();
            let mut active = false;
            let mut quiet = 0usize;

            loop {
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                match chunks.recv_timeout(LISTEN_POLL) {
                    Ok(chunk) => {
                        let energy = chunk_energy(&chunk);
                        buffer.extend_from_slice(&chunk);
                        if buffer.len() > window_cap {
                            // Freshness over completeness.
                            let excess = buffer.len() - window_cap;
                            buffer.drain(..excess);
                        }
                        if energy >= ENERGY_FLOOR {
                            active = true;
                            quiet = 0;
                        } else if active {
                            quiet += 1;
                        }
                        if active && (quiet >= 2 || buffer.len() == window_cap) {
                            callback(dequantize(&buffer));
                            buffer.clear();
                            active = false;
                            quiet = 0;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        // Producer stalled mid-message; flush what we have.
                        if active {
                            callback(dequantize(&buffer));
                            buffer.clear();
                            active = false;
                            quiet = 0;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("listen worker exited");
        });

        Listener {
            stop,
            worker: Some(worker),
        }
    }
}

/// Handle for a running listen worker.
pub struct Listener {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Listener {
    /// Stop the worker and join it. The worker polls its queue every 250 ms,
    /// so the join is bounded well under a second.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("listen worker panicked");
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Offline sink collecting everything written to it. Pairs with
/// [`MemorySource`] for loopback runs without audio hardware.
#[derive(Default)]
pub struct MemorySink {
    samples: Vec<i16>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

impl SampleSink for MemorySink {
    fn write_chunk(&mut self, chunk: &[i16]) -> Result<()> {
        self.samples.extend_from_slice(chunk);
        Ok(())
    }
}

/// Offline source replaying pre-recorded samples chunk by chunk.
pub struct MemorySource {
    chunks: VecDeque<Vec<i16>>,
}

impl MemorySource {
    pub fn from_samples(samples: &[i16], chunk_size: usize) -> Self {
        Self {
            chunks: samples
                .chunks(chunk_size.max(1))
                .map(<[i16]>::to_vec)
                .collect(),
        }
    }
}

impl SampleSource for MemorySource {
    fn read_chunk(&mut self, _timeout: Duration) -> Result<Option<Vec<i16>>> {
        Ok(self.chunks.pop_front())
    }
}
