use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::warn;

use soniclink::audio::device::{CpalSink, CpalSource, list_devices};
use soniclink::audio::{MemorySink, MemorySource, SampleSink};
use soniclink::ui::progress::{ProgressManager, templates};
use soniclink::utils::{estimate_transmission_time, format_duration, format_file_size};
use soniclink::{
    Config, Error, FrequencyRange, ReceiveOptions, Receiver, Result, SendOptions, Sender, crypto,
};

/// High-speed ultrasonic data communication.
#[derive(Parser)]
#[command(name = "soniclink", version, about = "Ultrasonic data transmission between nearby computers")]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log to a file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a text message
    Send {
        data: String,
        /// Recipient public key file
        #[arg(short = 'k', long)]
        public_key: Option<PathBuf>,
        #[arg(long, default_value_t = 18_000.0)]
        freq_min: f64,
        #[arg(long, default_value_t = 22_000.0)]
        freq_max: f64,
        /// Bitrate (bps), used for the transmission-time estimate
        #[arg(long, default_value_t = 80_000)]
        bitrate: u32,
        #[arg(long)]
        no_encrypt: bool,
        #[arg(long)]
        no_compress: bool,
    },

    /// Receive one transmission
    Receive {
        /// Save to a file instead of printing
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Private key file
        #[arg(short = 'k', long)]
        private_key: Option<PathBuf>,
        #[arg(long, default_value_t = 18_000.0)]
        freq_min: f64,
        #[arg(long, default_value_t = 22_000.0)]
        freq_max: f64,
        /// Reception timeout (seconds)
        #[arg(long, default_value_t = 30.0)]
        timeout: f64,
        #[arg(long)]
        no_decrypt: bool,
        #[arg(long)]
        no_decompress: bool,
    },

    /// Send a file
    Sendfile {
        path: PathBuf,
        #[arg(short = 'k', long)]
        public_key: Option<PathBuf>,
        #[arg(long, default_value_t = 18_000.0)]
        freq_min: f64,
        #[arg(long, default_value_t = 22_000.0)]
        freq_max: f64,
        #[arg(long, default_value_t = 80_000)]
        bitrate: u32,
        #[arg(long)]
        no_encrypt: bool,
        #[arg(long)]
        no_compress: bool,
    },

    /// Receive a file
    Receivefile {
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short = 'k', long)]
        private_key: Option<PathBuf>,
        #[arg(long, default_value_t = 18_000.0)]
        freq_min: f64,
        #[arg(long, default_value_t = 22_000.0)]
        freq_max: f64,
        #[arg(long, default_value_t = 30.0)]
        timeout: f64,
    },

    /// Listen continuously and print every decoded message (Ctrl-C stops)
    Listen {
        #[arg(short = 'k', long)]
        private_key: Option<PathBuf>,
        #[arg(long, default_value_t = 18_000.0)]
        freq_min: f64,
        #[arg(long, default_value_t = 22_000.0)]
        freq_max: f64,
        #[arg(long)]
        no_decrypt: bool,
        #[arg(long)]
        no_decompress: bool,
    },

    /// Generate an RSA keypair for encryption
    GenerateKeys {
        #[arg(long)]
        private_key: Option<PathBuf>,
        #[arg(long)]
        public_key: Option<PathBuf>,
    },

    /// List available audio devices
    Devices,

    /// Offline end-to-end loopback sanity check (no audio hardware)
    Test {
        #[arg(long, default_value_t = 18_000.0)]
        freq_min: f64,
        #[arg(long, default_value_t = 22_000.0)]
        freq_max: f64,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if cli.verbose {
        config.log_level = "debug".to_string();
    }
    if let Some(path) = &cli.log_file {
        config.log_file = Some(path.display().to_string());
    }
    soniclink::utils::logging::init_logging(
        &config.log_level,
        config.log_file.as_deref().map(Path::new),
    )?;

    match cli.command {
        Command::Send {
            data,
            public_key,
            freq_min,
            freq_max,
            bitrate,
            no_encrypt,
            no_compress,
        } => send_payload(
            &config,
            data.into_bytes(),
            public_key.as_deref(),
            freq_min,
            freq_max,
            bitrate,
            no_encrypt,
            no_compress,
        ),
        Command::Sendfile {
            path,
            public_key,
            freq_min,
            freq_max,
            bitrate,
            no_encrypt,
            no_compress,
        } => {
            let payload = std::fs::read(&path)?;
            println!("File: {}", path.display());
            send_payload(
                &config,
                payload,
                public_key.as_deref(),
                freq_min,
                freq_max,
                bitrate,
                no_encrypt,
                no_compress,
            )
        }
        Command::Receive {
            output,
            private_key,
            freq_min,
            freq_max,
            timeout,
            no_decrypt,
            no_decompress,
        } => receive_payload(
            &config,
            output.as_deref(),
            private_key.as_deref(),
            freq_min,
            freq_max,
            timeout,
            no_decrypt,
            no_decompress,
        ),
        Command::Receivefile {
            output,
            private_key,
            freq_min,
            freq_max,
            timeout,
        } => {
            let output = output.unwrap_or_else(|| PathBuf::from("received_file"));
            receive_payload(
                &config,
                Some(&output),
                private_key.as_deref(),
                freq_min,
                freq_max,
                timeout,
                false,
                false,
            )
        }
        Command::Listen {
            private_key,
            freq_min,
            freq_max,
            no_decrypt,
            no_decompress,
        } => listen(
            &config,
            private_key.as_deref(),
            freq_min,
            freq_max,
            no_decrypt,
            no_decompress,
        ),
        Command::GenerateKeys {
            private_key,
            public_key,
        } => generate_keys(private_key.as_deref(), public_key.as_deref()),
        Command::Devices => devices(),
        Command::Test { freq_min, freq_max } => loopback_test(&config, freq_min, freq_max),
    }
}

/// Feeds a sink while advancing the playback bar.
struct ProgressSink<'a, S: SampleSink> {
    inner: &'a mut S,
    progress: &'a ProgressManager,
}

impl<S: SampleSink> SampleSink for ProgressSink<'_, S> {
    fn write_chunk(&mut self, chunk: &[i16]) -> Result<()> {
        self.inner.write_chunk(chunk)?;
        let _ = self.progress.inc("playback", chunk.len() as u64);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

#[allow(clippy::too_many_arguments)]
fn send_payload(
    config: &Config,
    payload: Vec<u8>,
    public_key: Option<&Path>,
    freq_min: f64,
    freq_max: f64,
    bitrate: u32,
    no_encrypt: bool,
    no_compress: bool,
) -> Result<()> {
    let freq_range = FrequencyRange::new(freq_min, freq_max)?;

    let recipient: Option<RsaPublicKey> = match public_key {
        Some(path) if !no_encrypt => {
            let key = crypto::load_public_key(path)?;
            println!("Loaded public key from {}", path.display());
            Some(key)
        }
        _ => None,
    };
    let encrypt = !no_encrypt && recipient.is_some();
    if !no_encrypt && recipient.is_none() {
        warn!("no public key provided; sending unencrypted");
    }

    let estimated = estimate_transmission_time(payload.len() as u64, bitrate);
    println!("Data size: {}", format_file_size(payload.len() as u64));
    println!("Estimated transmission time: {}", format_duration(estimated));
    println!("Frequency range: {freq_range}");
    println!("Bitrate: {bitrate} bps");

    let mut sender = Sender::new(config, freq_range)?;
    let options = SendOptions {
        compress: !no_compress,
        encrypt,
    };

    let waveform = sender.prepare(&payload, recipient.as_ref(), options)?;

    let mut sink = CpalSink::open(config)?;
    println!("Starting transmission...");
    let progress = ProgressManager::new();
    let _ = progress.create_bar("playback", waveform.len() as u64, templates::PLAYBACK, "");

    let mut progress_sink = ProgressSink {
        inner: &mut sink,
        progress: &progress,
    };
    sender.transmit_waveform(&mut progress_sink, &waveform)?;
    progress.finish_all();

    println!("Transmission completed successfully");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn receive_payload(
    config: &Config,
    output: Option<&Path>,
    private_key: Option<&Path>,
    freq_min: f64,
    freq_max: f64,
    timeout: f64,
    no_decrypt: bool,
    no_decompress: bool,
) -> Result<()> {
    let freq_range = FrequencyRange::new(freq_min, freq_max)?;

    let private: Option<RsaPrivateKey> = match private_key {
        Some(path) if !no_decrypt => {
            let key = crypto::load_private_key(path)?;
            println!("Loaded private key from {}", path.display());
            Some(key)
        }
        _ => None,
    };

    let mut receiver = Receiver::new(config, freq_range)?;
    let options = ReceiveOptions {
        decompress: !no_decompress,
        decrypt: !no_decrypt && private.is_some(),
    };

    let mut source = CpalSource::open(config)?;
    println!("Listening for data... (timeout: {timeout}s)");
    println!("Frequency range: {freq_range}");

    let timeout = Duration::from_secs_f64(timeout);
    match output {
        Some(path) => {
            receiver.receive_to_file(&mut source, path, timeout, private.as_ref(), options)?;
            println!("Data received and saved to {}", path.display());
        }
        None => {
            let data = receiver.receive(&mut source, timeout, private.as_ref(), options)?;
            match String::from_utf8(data) {
                Ok(text) => {
                    println!("Data received:");
                    println!("{text}");
                }
                Err(e) => {
                    return Err(Error::Demod(format!(
                        "received {} bytes of binary data; use --output to save it",
                        e.as_bytes().len()
                    )));
                }
            }
        }
    }
    Ok(())
}

fn listen(
    config: &Config,
    private_key: Option<&Path>,
    freq_min: f64,
    freq_max: f64,
    no_decrypt: bool,
    no_decompress: bool,
) -> Result<()> {
    let freq_range = FrequencyRange::new(freq_min, freq_max)?;

    let private: Option<RsaPrivateKey> = match private_key {
        Some(path) if !no_decrypt => Some(crypto::load_private_key(path)?),
        _ => None,
    };
    let options = ReceiveOptions {
        decompress: !no_decompress,
        decrypt: !no_decrypt && private.is_some(),
    };

    let receiver = Receiver::new(config, freq_range)?;
    let source = CpalSource::open(config)?;

    let listener = receiver.start_listening(source.chunk_receiver(), private, options, |data| {
        match String::from_utf8(data) {
            Ok(text) => println!("Received message: {text}"),
            Err(e) => println!("Received binary data: {} bytes", e.as_bytes().len()),
        }
    })?;

    println!("Listening continuously on {freq_range}; press Ctrl-C to stop");
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .map_err(|e| Error::Audio(format!("signal handler: {e}")))?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
    println!("Stopping...");
    listener.stop();
    drop(source);
    Ok(())
}

fn generate_keys(private_key: Option<&Path>, public_key: Option<&Path>) -> Result<()> {
    let (private, public) = crypto::generate_keypair()?;
    let private_path = private_key.unwrap_or_else(|| Path::new("private_key.pem"));
    let public_path = public_key.unwrap_or_else(|| Path::new("public_key.pem"));
    crypto::save_keypair(&private, &public, private_path, public_path)?;

    println!("RSA key pair generated:");
    println!("   Private key: {}", private_path.display());
    println!("   Public key: {}", public_path.display());
    Ok(())
}

fn devices() -> Result<()> {
    let inventory = list_devices()?;

    println!("Available audio devices:");
    println!();
    println!("Input devices:");
    for (index, device) in inventory.input.iter().enumerate() {
        println!("  [{index}] {}", device.name);
        println!(
            "      Channels: {}, Sample rate: {} Hz",
            device.channels, device.sample_rate
        );
    }
    println!();
    println!("Output devices:");
    for (index, device) in inventory.output.iter().enumerate() {
        println!("  [{index}] {}", device.name);
        println!(
            "      Channels: {}, Sample rate: {} Hz",
            device.channels, device.sample_rate
        );
    }
    Ok(())
}

/// Full pipeline loopback through the in-memory audio pair: compression,
/// a throwaway keypair, modem, and boundary all get exercised.
fn loopback_test(config: &Config, freq_min: f64, freq_max: f64) -> Result<()> {
    let freq_range = FrequencyRange::new(freq_min, freq_max)?;
    println!("Testing SonicLink loopback...");
    println!("Frequency range: {freq_range}");

    println!("Generating a throwaway keypair...");
    let (private, public) = crypto::generate_keypair()?;

    let payload = b"Hello, SonicLink! This is a test message.";
    let mut sender = Sender::new(config, freq_range)?;
    let mut receiver = Receiver::new(config, freq_range)?;

    let mut sink = MemorySink::new();
    sender.send(payload, Some(&public), SendOptions::default(), &mut sink)?;
    println!("Modulated {} samples", sink.samples().len());

    let mut source = MemorySource::from_samples(sink.samples(), config.chunk_size);
    let received = receiver.receive(
        &mut source,
        Duration::from_secs(30),
        Some(&private),
        ReceiveOptions::default(),
    )?;

    if received == payload {
        println!("Loopback test passed");
        Ok(())
    } else {
        Err(Error::Demod("loopback payload mismatch".to_string()))
    }
}
