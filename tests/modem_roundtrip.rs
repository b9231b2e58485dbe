use std::f32::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use soniclink::Config;
use soniclink::error::Error;
use soniclink::fec::FecCodec;
use soniclink::modem::{OfdmDemodulator, OfdmModulator, OfdmParams, ReceiverState};

fn modem_pair() -> (OfdmModulator, OfdmDemodulator) {
    let config = Config::default();
    let params = OfdmParams::new(&config, config.default_freq_range).unwrap();
    let modulator = OfdmModulator::new(params.clone(), Some(FecCodec::default_code().unwrap()));
    let demodulator = OfdmDemodulator::new(params, Some(FecCodec::default_code().unwrap()));
    (modulator, demodulator)
}

fn round_trip(payload: &[u8]) {
    let (modulator, mut demodulator) = modem_pair();
    let waveform = modulator.modulate(payload).unwrap();
    let decoded = demodulator.demodulate(&waveform).unwrap();
    assert_eq!(decoded, payload, "payload of {} bytes", payload.len());
    assert_eq!(demodulator.state(), ReceiverState::Delivered);
}

#[test]
fn empty_payload_round_trips_to_empty_bytes() {
    round_trip(b"");
}

#[test]
fn single_byte_round_trip() {
    round_trip(b"z");
}

#[test]
fn exact_symbol_fill_round_trip() {
    // 12 payload bytes -> 44 FEC bytes -> 48 framed bytes -> 384 bits,
    // exactly one OFDM symbol.
    let (modulator, _) = modem_pair();
    let payload = [0xABu8; 12];
    let waveform = modulator.modulate(&payload).unwrap();
    let params = modulator.params();
    assert_eq!(
        waveform.len(),
        2 * params.marker_len() + params.samples_per_symbol
    );
    round_trip(&payload);
}

#[test]
fn one_byte_past_the_symbol_boundary_round_trip() {
    // One byte more than the exact fill spills into a second symbol.
    let (modulator, _) = modem_pair();
    let payload = [0xABu8; 13];
    let waveform = modulator.modulate(&payload).unwrap();
    let params = modulator.params();
    assert_eq!(
        waveform.len(),
        2 * params.marker_len() + 2 * params.samples_per_symbol
    );
    round_trip(&payload);
}

#[test]
fn eight_kilobyte_round_trip() {
    let mut rng = StdRng::seed_from_u64(42);
    let payload: Vec<u8> = (0..8192).map(|_| rng.gen_range(0..=255u8)).collect();
    round_trip(&payload);
}

#[test]
fn full_byte_range_round_trip() {
    let payload: Vec<u8> = (0..=255u8).collect();
    round_trip(&payload);
}

#[test]
fn awgn_at_25_db_snr_round_trips() {
    let (modulator, mut demodulator) = modem_pair();
    let payload = [b'x'; 64];
    let mut waveform = modulator.modulate(&payload).unwrap();

    let power: f64 = waveform.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>()
        / waveform.len() as f64;
    let sigma = (power / 10f64.powf(25.0 / 10.0)).sqrt();

    let mut rng = StdRng::seed_from_u64(7);
    for sample in waveform.iter_mut() {
        let u1: f64 = rng.gen_range(1e-12..1.0);
        let u2: f64 = rng.gen_range(0.0..1.0);
        let gauss = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        *sample += (sigma * gauss) as f32;
    }

    let decoded = demodulator.demodulate(&waveform).unwrap();
    assert_eq!(decoded, payload);
}

#[test]
fn marker_only_waveform_is_no_frame() {
    let (modulator, mut demodulator) = modem_pair();
    let params = modulator.params();
    let mut waveform = params.start_marker();
    waveform.extend(params.end_marker());

    match demodulator.demodulate(&waveform) {
        Err(Error::NoFrame) => {}
        other => panic!("expected NoFrame, got {other:?}"),
    }
    assert_eq!(demodulator.state(), ReceiverState::Failed);
}

#[test]
fn unrelated_audio_is_no_frame() {
    let (_, mut demodulator) = modem_pair();
    // A 440 Hz hum is nothing like the 17.5 kHz marker.
    let hum: Vec<f32> = (0..48_000)
        .map(|n| 0.5 * (2.0 * PI * 440.0 * n as f32 / 48_000.0).sin())
        .collect();
    match demodulator.demodulate(&hum) {
        Err(Error::NoFrame) => {}
        other => panic!("expected NoFrame, got {other:?}"),
    }
}

#[test]
fn demodulation_is_insensitive_to_recording_scale() {
    let (modulator, mut demodulator) = modem_pair();
    let payload = b"gain independence";
    let waveform = modulator.modulate(payload).unwrap();

    for scale in [0.05f32, 0.4, 1.7] {
        let scaled: Vec<f32> = waveform.iter().map(|s| s * scale).collect();
        assert_eq!(
            demodulator.demodulate(&scaled).unwrap(),
            payload,
            "scale {scale}"
        );
    }
}
