//! Sufficient statistics of a batch of activations.
//!
//! For signal `i`, let `S_i` be the block operator built from its activation
//! vector. The dictionary update needs `StS = mean_i S_i' S_i` and
//! `StX = mean_i S_i' x_i`. Every block of `S_i' S_i` is diagonal, so after
//! grouping rows by frequency `j` the matrix falls apart into `d`
//! independent `2m x 2m` blocks; only those are stored.

use ndarray::*;

use crate::error::{CdlError, Result};

/// Position of coefficient `(k, j)` in a flattened `2dm` vector; `r < m`
/// addresses real parts, `r >= m` imaginary parts.
#[inline]
pub(crate) fn flat_index(r: usize, j: usize, d: usize, m: usize) -> usize {
    if r < m {
        r * d + j
    } else {
        d * m + (r - m) * d + j
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodingStatistics {
    /// `sts[[j, .., ..]]` is the `2m x 2m` block for frequency `j`.
    sts: Array3<f64>,
    stx: Array1<f64>,
}

impl EncodingStatistics {
    /// Averages the statistics of a `2dm x n` activation matrix against the
    /// matching `2d x n` data.
    pub fn from_batch(a: &ArrayView2<'_, f64>, x: &ArrayView2<'_, f64>) -> Result<Self> {
        let (d2m, n) = a.dim();
        let d2 = x.nrows();
        if n != x.ncols() || n == 0 {
            return Err(CdlError::shape(format!(
                "{n} activation columns against {} data columns",
                x.ncols()
            )));
        }
        if d2 == 0 || d2 % 2 != 0 || d2m % d2 != 0 {
            return Err(CdlError::shape(format!(
                "activations of height {d2m} do not match data of height {d2}"
            )));
        }
        let d = d2 / 2;
        let m = d2m / d2;
        let dm = d * m;

        let mut sts = Array3::<f64>::zeros((d, 2 * m, 2 * m));
        let mut stx = Array1::<f64>::zeros(2 * dm);
        // For frequency j, S_i restricted to j is the 2 x 2m matrix
        // [[re', -im'], [im', re']]; stack those for every signal.
        let mut p = Array2::<f64>::zeros((2 * n, 2 * m));
        let mut xj = Array1::<f64>::zeros(2 * n);
        for j in 0..d {
            for i in 0..n {
                for k in 0..m {
                    let re = a[[k * d + j, i]];
                    let im = a[[dm + k * d + j, i]];
                    p[[2 * i, k]] = re;
                    p[[2 * i, m + k]] = -im;
                    p[[2 * i + 1, k]] = im;
                    p[[2 * i + 1, m + k]] = re;
                }
                xj[2 * i] = x[[j, i]];
                xj[2 * i + 1] = x[[d + j, i]];
            }
            sts.index_axis_mut(Axis(0), j).assign(&(p.t().dot(&p) / n as f64));
            let pj = p.t().dot(&xj) / n as f64;
            for r in 0..2 * m {
                stx[flat_index(r, j, d, m)] = pj[r];
            }
        }
        Ok(EncodingStatistics { sts, stx })
    }

    pub fn dim(&self) -> usize {
        self.sts.shape()[0]
    }

    pub fn num_codewords(&self) -> usize {
        self.sts.shape()[1] / 2
    }

    pub fn blocks(&self) -> ArrayView3<'_, f64> {
        self.sts.view()
    }

    pub fn stx(&self) -> ArrayView1<'_, f64> {
        self.stx.view()
    }

    pub fn blend(&mut self, other: &EncodingStatistics, alpha: f64) -> Result<()> {
        if self.sts.dim() != other.sts.dim() {
            return Err(CdlError::shape("cannot blend statistics of different shapes"));
        }
        self.sts.zip_mut_with(&other.sts, |s, &o| *s = alpha * *s + (1.0 - alpha) * o);
        self.stx.zip_mut_with(&other.stx, |s, &o| *s = alpha * *s + (1.0 - alpha) * o);
        Ok(())
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let (d, m) = (self.dim(), self.num_codewords());
        let mut out = Array2::<f64>::zeros((2 * d * m, 2 * d * m));
        for j in 0..d {
            for r in 0..2 * m {
                for c in 0..2 * m {
                    out[[flat_index(r, j, d, m), flat_index(c, j, d, m)]] = self.sts[[j, r, c]];
                }
            }
        }
        out
    }
}

/// Weight on the running statistics at (1-based) step `t`.
pub fn forgetting_weight(t: usize, beta: f64) -> f64 {
    (1.0 - 1.0 / t as f64).powf(beta)
}
