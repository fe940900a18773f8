use std::fmt;
use std::sync::Arc;

use num_complex::Complex64;
use num_traits::Zero;
use rustfft::{Fft, FftPlanner};

/// Planned 2-D DFT over a `height x width` patch stored column-major
/// (element `(r, c)` at `r + c * height`).
///
/// The inverse is normalized by `1 / (height * width)`, so
/// `inverse(forward(x)) == x` up to rounding.
#[derive(Clone)]
pub struct Fft2 {
    height: usize,
    width: usize,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for Fft2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fft2")
            .field("height", &self.height)
            .field("width", &self.width)
            .finish()
    }
}

impl Fft2 {
    pub fn new(height: usize, width: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        Fft2 {
            height,
            width,
            col_forward: planner.plan_fft_forward(height),
            col_inverse: planner.plan_fft_inverse(height),
            row_forward: planner.plan_fft_forward(width),
            row_inverse: planner.plan_fft_inverse(width),
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn forward(&self, data: &mut [Complex64]) {
        self.process(data, &self.col_forward, &self.row_forward);
    }

    pub fn inverse(&self, data: &mut [Complex64]) {
        self.process(data, &self.col_inverse, &self.row_inverse);
        let scale = 1.0 / self.len() as f64;
        data.iter_mut().for_each(|e| *e *= scale);
    }

    fn process(&self, data: &mut [Complex64], col_fft: &Arc<dyn Fft<f64>>, row_fft: &Arc<dyn Fft<f64>>) {
        assert_eq!(data.len(), self.len(), "patch size does not match the planned transform");
        let (h, w) = (self.height, self.width);
        // Columns are contiguous runs of `h`.
        for column in data.chunks_exact_mut(h) {
            col_fft.process(column);
        }
        let mut line = vec![Complex64::zero(); w];
        for r in 0..h {
            for c in 0..w {
                line[c] = data[r + c * h];
            }
            row_fft.process(&mut line);
            for c in 0..w {
                data[r + c * h] = line[c];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn impulse_transforms_to_constant() {
        let fft = Fft2::new(2, 4);
        let mut data = vec![Complex64::zero(); 8];
        data[0] = Complex64::new(1.0, 0.0);
        fft.forward(&mut data);
        for e in &data {
            assert_abs_diff_eq!(e.re, 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(e.im, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn inverse_undoes_forward() {
        let fft = Fft2::new(4, 6);
        let original: Vec<Complex64> = (0..24)
            .map(|i| Complex64::new((i as f64 * 0.37).sin(), (i as f64 * 1.1).cos()))
            .collect();
        let mut data = original.clone();
        fft.forward(&mut data);
        fft.inverse(&mut data);
        for (a, b) in data.iter().zip(&original) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-12);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn single_row_shift_along_width() {
        // x[0, 1] = 1 on a 1 x 4 patch: X[0, c] = exp(-2 pi i c / 4)
        let fft = Fft2::new(1, 4);
        let mut data = vec![Complex64::zero(); 4];
        data[1] = Complex64::new(1.0, 0.0);
        fft.forward(&mut data);
        assert_abs_diff_eq!(data[1].re, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(data[1].im, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(data[2].re, -1.0, epsilon = 1e-12);
    }
}
