use std::time::Duration;

use soniclink::audio::{MemorySink, MemorySource};
use soniclink::{Config, ReceiveOptions, Receiver, SendOptions, Sender, crypto};

fn loopback(
    config: &Config,
    payload: &[u8],
    send_options: SendOptions,
    receive_options: ReceiveOptions,
    keys: Option<(&rsa::RsaPrivateKey, &rsa::RsaPublicKey)>,
) -> Vec<u8> {
    let mut sender = Sender::new(config, config.default_freq_range).unwrap();
    let mut receiver = Receiver::new(config, config.default_freq_range).unwrap();

    let mut sink = MemorySink::new();
    sender
        .send(
            payload,
            keys.map(|(_, public)| public),
            send_options,
            &mut sink,
        )
        .unwrap();

    let mut source = MemorySource::from_samples(sink.samples(), config.chunk_size);
    receiver
        .receive(
            &mut source,
            Duration::from_secs(60),
            keys.map(|(private, _)| private),
            receive_options,
        )
        .unwrap()
}

#[test]
fn hello_soniclink_with_compression() {
    let config = Config::default();
    let payload = b"Hello, SonicLink!";
    let received = loopback(
        &config,
        payload,
        SendOptions {
            compress: true,
            encrypt: false,
        },
        ReceiveOptions {
            decompress: true,
            decrypt: false,
        },
        None,
    );
    assert_eq!(received, payload);
}

#[test]
fn full_byte_range_with_compression() {
    let config = Config::default();
    let payload: Vec<u8> = (0..=255u8).collect();
    let received = loopback(
        &config,
        &payload,
        SendOptions {
            compress: true,
            encrypt: false,
        },
        ReceiveOptions {
            decompress: true,
            decrypt: false,
        },
        None,
    );
    assert_eq!(received, payload);
}

#[test]
fn a_kilobyte_of_zeros_compresses_small() {
    let config = Config::default();
    let mut sender = Sender::new(&config, config.default_freq_range).unwrap();
    let mut receiver = Receiver::new(&config, config.default_freq_range).unwrap();
    let payload = vec![0u8; 1024];

    let mut sink = MemorySink::new();
    sender
        .send(
            &payload,
            None,
            SendOptions {
                compress: true,
                encrypt: false,
            },
            &mut sink,
        )
        .unwrap();

    let stats = sender.compression_stats();
    assert_eq!(stats.original_size, 1024);
    assert!(
        stats.compressed_size < 200,
        "compressed to {} bytes",
        stats.compressed_size
    );

    let mut source = MemorySource::from_samples(sink.samples(), config.chunk_size);
    let received = receiver
        .receive(
            &mut source,
            Duration::from_secs(60),
            None,
            ReceiveOptions {
                decompress: true,
                decrypt: false,
            },
        )
        .unwrap();
    assert_eq!(received, payload);
}

#[test]
fn encrypted_loopback_with_fresh_keys() {
    let config = Config::default();
    let (private, public) = crypto::generate_keypair().unwrap();
    let payload = b"secret";

    let received = loopback(
        &config,
        payload,
        SendOptions {
            compress: true,
            encrypt: true,
        },
        ReceiveOptions {
            decompress: true,
            decrypt: true,
        },
        Some((&private, &public)),
    );
    assert_eq!(received, payload);

    // Independent seals of the same plaintext never repeat.
    let a = crypto::seal(payload, &public).unwrap();
    let b = crypto::seal(payload, &public).unwrap();
    assert_ne!(a, b);
}

#[test]
fn empty_payload_survives_the_whole_pipeline() {
    let config = Config::default();
    let received = loopback(
        &config,
        b"",
        SendOptions {
            compress: true,
            encrypt: false,
        },
        ReceiveOptions {
            decompress: true,
            decrypt: false,
        },
        None,
    );
    assert_eq!(received, b"");
}
