use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Cached forward/inverse FFT plans for one symbol length.
pub struct SymbolFft {
    len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl SymbolFft {
    pub fn new(len: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            len,
            forward: planner.plan_fft_forward(len),
            inverse: planner.plan_fft_inverse(len),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Inverse FFT of `spectrum`, normalized by 1/N, real part only.
    pub fn inverse_real(&self, mut spectrum: Vec<Complex<f32>>) -> Vec<f32> {
        debug_assert_eq!(spectrum.len(), self.len);
        self.inverse.process(&mut spectrum);
        let scale = 1.0 / self.len as f32;
        spectrum.iter().map(|c| c.re * scale).collect()
    }

    /// Forward FFT of a real block, returning all complex bins.
    pub fn forward_bins(&self, time: &[f32]) -> Vec<Complex<f32>> {
        debug_assert_eq!(time.len(), self.len);
        let mut buffer: Vec<Complex<f32>> =
            time.iter().map(|&x| Complex::new(x, 0.0)).collect();
        self.forward.process(&mut buffer);
        buffer
    }
}

pub fn energy(samples: &[f32]) -> f64 {
    samples.iter().map(|&x| (x as f64) * (x as f64)).sum()
}

#[derive(Clone, Copy, Debug)]
pub struct CorrelationPeak {
    pub offset: usize,
    /// Raw (signed) correlation value at the peak.
    pub value: f64,
    /// Normalized correlation magnitude in [0, 1].
    pub quality: f64,
}

/// A peak within this fraction of the global maximum counts as equivalent;
/// the earliest such peak wins. Two markers of the same shape correlate
/// equally strongly, so a strict argmax would pick between them on noise
/// alone.
const PEAK_TIE_FRACTION: f64 = 0.95;

/// Slide `template` across `signal` and return the earliest offset whose
/// correlation magnitude reaches the global peak (within
/// [`PEAK_TIE_FRACTION`]), with its normalized quality.
pub fn correlate_peak(signal: &[f32], template: &[f32]) -> Option<CorrelationPeak> {
    if template.is_empty() || signal.len() < template.len() {
        return None;
    }

    let template_energy = energy(template);
    if template_energy == 0.0 {
        return None;
    }

    let span = signal.len() - template.len();
    // Window energies via a running sum; recomputing per offset would square
    // the cost.
    let mut window_energies = Vec::with_capacity(span + 1);
    let mut window_energy = energy(&signal[..template.len()]);
    window_energies.push(window_energy);
    for i in 1..=span {
        let old = signal[i - 1] as f64;
        let new = signal[i + template.len() - 1] as f64;
        window_energy += new * new - old * old;
        window_energies.push(window_energy.max(0.0));
    }

    let mut dots = Vec::with_capacity(span + 1);
    let mut peak = 0.0f64;
    for offset in 0..=span {
        let window = &signal[offset..offset + template.len()];
        let dot: f64 = window
            .iter()
            .zip(template.iter())
            .map(|(&x, &t)| (x as f64) * (t as f64))
            .sum();
        peak = peak.max(dot.abs());
        dots.push(dot);
    }

    let threshold = peak * PEAK_TIE_FRACTION;
    let (best_offset, &best_value) = dots
        .iter()
        .enumerate()
        .find(|(_, dot)| dot.abs() >= threshold)?;

    let denom = (window_energies[best_offset] * template_energy).sqrt();
    let quality = if denom > 0.0 {
        best_value.abs() / denom
    } else {
        0.0
    };

    Some(CorrelationPeak {
        offset: best_offset,
        value: best_value,
        quality,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (2.0 * PI * freq * n as f32 / 48_000.0).sin())
            .collect()
    }

    #[test]
    fn fft_inverts_itself() {
        let fft = SymbolFft::new(64);
        let mut spectrum = vec![Complex::new(0.0, 0.0); 64];
        spectrum[3] = Complex::new(0.0, -16.0);
        spectrum[61] = Complex::new(0.0, 16.0);

        let time = fft.inverse_real(spectrum);
        let bins = fft.forward_bins(&time);
        assert!((bins[3].im + 16.0).abs() < 1e-3);
        assert!(bins[3].re.abs() < 1e-3);
        assert!((bins[5].norm()) < 1e-3);
    }

    #[test]
    fn finds_an_embedded_template() {
        let template = tone(17_500.0, 480);
        let mut signal = vec![0.0f32; 2000];
        for (i, &t) in template.iter().enumerate() {
            signal[700 + i] = 0.6 * t;
        }

        let peak = correlate_peak(&signal, &template).unwrap();
        assert_eq!(peak.offset, 700);
        assert!(peak.quality > 0.99);
        // The raw peak carries the embedded amplitude.
        let amplitude = peak.value.abs() / energy(&template);
        assert!((amplitude - 0.6).abs() < 1e-3);
    }

    #[test]
    fn negated_template_matches_by_magnitude() {
        let template = tone(17_500.0, 480);
        let mut signal = vec![0.0f32; 1500];
        for (i, &t) in template.iter().enumerate() {
            signal[400 + i] = -t;
        }

        let peak = correlate_peak(&signal, &template).unwrap();
        assert_eq!(peak.offset, 400);
        assert!(peak.value < 0.0);
        assert!(peak.quality > 0.99);
    }

    #[test]
    fn too_short_signal_yields_nothing() {
        let template = tone(17_500.0, 480);
        assert!(correlate_peak(&template[..100], &template).is_none());
    }
}
