use rustfft::num_complex::Complex;

/// Bits carried by one constellation point.
pub const BITS_PER_POINT: usize = 6;
pub const POINTS: usize = 64;

const LEVELS: [f32; 8] = [-7.0, -5.0, -3.0, -1.0, 1.0, 3.0, 5.0, 7.0];

/// 64-QAM symbol table with maximum-likelihood demapping.
///
/// The grid is the Cartesian product of the eight amplitude levels divided
/// by sqrt(42) (unit average energy), ordered row-major:
/// `index = real_idx * 8 + imag_idx`.
pub struct Constellation {
    points: [Complex<f32>; POINTS],
}

impl Constellation {
    pub fn qam64() -> Self {
        let norm = 42.0f32.sqrt();
        let mut points = [Complex::new(0.0, 0.0); POINTS];
        for (re_idx, &re) in LEVELS.iter().enumerate() {
            for (im_idx, &im) in LEVELS.iter().enumerate() {
                points[re_idx * 8 + im_idx] = Complex::new(re / norm, im / norm);
            }
        }
        Self { points }
    }

    pub fn point(&self, index: u8) -> Complex<f32> {
        self.points[(index as usize) % POINTS]
    }

    /// Index of the point nearest to `received` by Euclidean distance.
    pub fn nearest(&self, received: Complex<f32>) -> u8 {
        let mut best = 0u8;
        let mut best_dist = f32::INFINITY;
        for (index, point) in self.points.iter().enumerate() {
            let dist = (received - point).norm_sqr();
            if dist < best_dist {
                best_dist = dist;
                best = index as u8;
            }
        }
        best
    }

    pub fn points(&self) -> &[Complex<f32>] {
        &self.points
    }
}
