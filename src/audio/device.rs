use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, error, info};

use crate::audio::{SampleSink, SampleSource};
use crate::config::Config;
use crate::error::{Error, Result};

/// Pending playback ceiling; keeps memory flat and write pacing roughly
/// real time.
const SINK_BACKLOG_SAMPLES: usize = 4 * 48_000;
/// Capture queue depth in chunks (~5 s at 48 kHz / 1024).
const SOURCE_QUEUE_CHUNKS: usize = 256;

#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
}

#[derive(Clone, Debug, Default)]
pub struct DeviceInventory {
    pub input: Vec<DeviceInfo>,
    pub output: Vec<DeviceInfo>,
}

/// Enumerate input/output devices on the default host.
pub fn list_devices() -> Result<DeviceInventory> {
    let host = cpal::default_host();
    let mut inventory = DeviceInventory::default();

    let inputs = host
        .input_devices()
        .map_err(|e| Error::Audio(format!("input device enumeration failed: {e}")))?;
    for device in inputs {
        let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
        if let Ok(config) = device.default_input_config() {
            inventory.input.push(DeviceInfo {
                name,
                channels: config.channels(),
                sample_rate: config.sample_rate().0,
            });
        }
    }

    let outputs = host
        .output_devices()
        .map_err(|e| Error::Audio(format!("output device enumeration failed: {e}")))?;
    for device in outputs {
        let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
        if let Ok(config) = device.default_output_config() {
            inventory.output.push(DeviceInfo {
                name,
                channels: config.channels(),
                sample_rate: config.sample_rate().0,
            });
        }
    }

    info!(
        "found {} input and {} output devices",
        inventory.input.len(),
        inventory.output.len()
    );
    Ok(inventory)
}

fn stream_config(config: &Config) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: config.channels.max(1),
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Speaker output. The audio callback drains a shared deque; writers block
/// when the backlog is full, which paces the pipeline against real time.
pub struct CpalSink {
    _stream: cpal::Stream,
    queue: Arc<Mutex<VecDeque<i16>>>,
}

impl CpalSink {
    pub fn open(config: &Config) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no default output device".to_string()))?;
        debug!(
            "output device: {}",
            device.name().unwrap_or_else(|_| "<unknown>".to_string())
        );

        let queue: Arc<Mutex<VecDeque<i16>>> = Arc::new(Mutex::new(VecDeque::new()));
        let feed = queue.clone();
        let stream = device
            .build_output_stream(
                &stream_config(config),
                move |out: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let mut feed = feed.lock().unwrap();
                    for sample in out.iter_mut() {
                        *sample = feed.pop_front().unwrap_or(0);
                    }
                },
                |e| error!("output stream error: {e}"),
                None,
            )
            .map_err(|e| Error::Audio(format!("output stream open failed: {e}")))?;
        stream
            .play()
            .map_err(|e| Error::Audio(format!("output stream start failed: {e}")))?;

        Ok(Self {
            _stream: stream,
            queue,
        })
    }
}

impl SampleSink for CpalSink {
    fn write_chunk(&mut self, chunk: &[i16]) -> Result<()> {
        loop {
            let backlog = self.queue.lock().unwrap().len();
            if backlog < SINK_BACKLOG_SAMPLES {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.queue.lock().unwrap().extend(chunk.iter().copied());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        while !self.queue.lock().unwrap().is_empty() {
            std::thread::sleep(Duration::from_millis(10));
        }
        // Let the device swallow its own buffer too.
        std::thread::sleep(Duration::from_millis(50));
        Ok(())
    }
}

/// Microphone input. The audio callback is the producer pushing fixed-size
/// chunks into a bounded queue; when the queue fills, the oldest chunk is
/// evicted.
pub struct CpalSource {
    _stream: cpal::Stream,
    queue: Receiver<Vec<i16>>,
}

impl CpalSource {
    pub fn open(config: &Config) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no default input device".to_string()))?;
        debug!(
            "input device: {}",
            device.name().unwrap_or_else(|_| "<unknown>".to_string())
        );

        let (tx, rx): (Sender<Vec<i16>>, Receiver<Vec<i16>>) = bounded(SOURCE_QUEUE_CHUNKS);
        let drop_oldest = rx.clone();
        let chunk_size = config.chunk_size;
        let mut pending: Vec<i16> = Vec::with_capacity(chunk_size);

        let stream = device
            .build_input_stream(
                &stream_config(config),
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    for &sample in data {
                        pending.push(sample);
                        if pending.len() == chunk_size {
                            let chunk = std::mem::replace(
                                &mut pending,
                                Vec::with_capacity(chunk_size),
                            );
                            if let Err(full) = tx.try_send(chunk) {
                                let _ = drop_oldest.try_recv();
                                let _ = tx.try_send(full.into_inner());
                            }
                        }
                    }
                },
                |e| error!("input stream error: {e}"),
                None,
            )
            .map_err(|e| Error::Audio(format!("input stream open failed: {e}")))?;
        stream
            .play()
            .map_err(|e| Error::Audio(format!("input stream start failed: {e}")))?;

        Ok(Self {
            _stream: stream,
            queue: rx,
        })
    }

    /// Reading half of the capture queue, for the listen worker.
    pub fn chunk_receiver(&self) -> Receiver<Vec<i16>> {
        self.queue.clone()
    }
}

impl SampleSource for CpalSource {
    fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<i16>>> {
        match self.queue.recv_timeout(timeout) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(None),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(Error::Audio("capture stream closed".to_string()))
            }
        }
    }
}
