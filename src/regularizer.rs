use ndarray::*;
use num_complex::Complex64;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::error::{CdlError, Result};
use crate::fft2::Fft2;
use crate::soft_threshold::{shrink_complex_pairs, shrink_groups, soft_threshold, soft_threshold_inplace};

fn default_lambda() -> f64 {
    1e-1
}

/// Activation regularizer, selected by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reg", rename_all = "snake_case")]
pub enum Regularizer {
    /// l1 on the 2-D activation maps in pixel space.
    L1Space {
        #[serde(default = "default_lambda")]
        lambda: f64,
        width: usize,
        height: usize,
        #[serde(default)]
        nonneg: bool,
        /// Patches were zero-padded to twice their size before the transform.
        #[serde(default)]
        fft_pad: bool,
    },
    /// Shrinkage of each complex coefficient toward the origin.
    #[serde(rename = "l1")]
    L1Complex {
        #[serde(default = "default_lambda")]
        lambda: f64,
    },
    L2Group {
        #[serde(default = "default_lambda")]
        lambda: f64,
    },
    /// Closed-form smoothing with a first-derivative penalty.
    Lowpass {
        #[serde(default = "default_lambda")]
        lambda: f64,
        width: usize,
        height: usize,
    },
    L1Real {
        #[serde(default = "default_lambda")]
        lambda: f64,
        #[serde(default)]
        nonneg: bool,
    },
}

impl Default for Regularizer {
    fn default() -> Self {
        Regularizer::L2Group { lambda: default_lambda() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegularizerParams {
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub nonneg: bool,
    pub fft_pad: bool,
}

impl Regularizer {
    pub fn from_name(name: &str, lambda: f64, params: &RegularizerParams) -> Result<Self> {
        let patch = || -> Result<(usize, usize)> {
            match (params.width, params.height) {
                (Some(w), Some(h)) => Ok((w, h)),
                _ => Err(CdlError::config(format!("regularizer '{name}' requires width and height"))),
            }
        };
        let reg = match name {
            "l1_space" => {
                let (width, height) = patch()?;
                Regularizer::L1Space { lambda, width, height, nonneg: params.nonneg, fft_pad: params.fft_pad }
            }
            "l1" => Regularizer::L1Complex { lambda },
            "l2_group" => Regularizer::L2Group { lambda },
            "lowpass" => {
                let (width, height) = patch()?;
                Regularizer::Lowpass { lambda, width, height }
            }
            "l1_real" => Regularizer::L1Real { lambda, nonneg: params.nonneg },
            other => return Err(CdlError::config(format!("unknown regularization: {other}"))),
        };
        reg.validate()?;
        Ok(reg)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Regularizer::L1Space { .. } => "l1_space",
            Regularizer::L1Complex { .. } => "l1",
            Regularizer::L2Group { .. } => "l2_group",
            Regularizer::Lowpass { .. } => "lowpass",
            Regularizer::L1Real { .. } => "l1_real",
        }
    }

    pub fn lambda(&self) -> f64 {
        match *self {
            Regularizer::L1Space { lambda, .. }
            | Regularizer::L1Complex { lambda }
            | Regularizer::L2Group { lambda }
            | Regularizer::Lowpass { lambda, .. }
            | Regularizer::L1Real { lambda, .. } => lambda,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let lambda = self.lambda();
        if !(lambda > 0.0) || !lambda.is_finite() {
            return Err(CdlError::config(format!("lambda must be positive, got {lambda}")));
        }
        match *self {
            Regularizer::L1Space { width, height, .. } | Regularizer::Lowpass { width, height, .. }
                if width == 0 || height == 0 =>
            {
                Err(CdlError::config(format!("{}: width and height must be positive", self.name())))
            }
            _ => Ok(()),
        }
    }

    /// Binds the regularizer to activations of `m` codewords with `d`
    /// coefficients each.
    pub fn prepare(&self, d: usize, m: usize) -> Result<Proximal> {
        self.validate()?;
        let kind = match *self {
            Regularizer::L1Space { lambda, width, height, nonneg, fft_pad } => {
                let (w, h) = if fft_pad { (2 * width, 2 * height) } else { (width, height) };
                if w * h != d {
                    return Err(CdlError::config(format!(
                        "l1_space patch {h}x{w} does not cover {d} coefficients"
                    )));
                }
                Kind::L1Space { lambda, nonneg, fft_pad, fft: Fft2::new(h, w) }
            }
            Regularizer::L1Complex { lambda } => Kind::L1Complex { lambda },
            Regularizer::L2Group { lambda } => Kind::L2Group { lambda },
            Regularizer::Lowpass { lambda, width, height } => {
                if width * height != d {
                    return Err(CdlError::config(format!(
                        "lowpass patch {height}x{width} does not cover {d} coefficients"
                    )));
                }
                Kind::Lowpass { lambda, gain: lowpass_gain(height, width, m) }
            }
            Regularizer::L1Real { lambda, nonneg } => Kind::L1Real { lambda, nonneg },
        };
        Ok(Proximal { d, m, kind })
    }
}

/// `(1 + |H|^2)^-1` per activation row, where `H` is the 2-D DFT of the
/// central-difference kernel `[-1/2, 0, 1/2]` laid along the width axis.
fn lowpass_gain(height: usize, width: usize, m: usize) -> Array1<f64> {
    let kernel = [-0.5, 0.0, 0.5];
    let d = height * width;
    let mut response = Array1::<f64>::zeros(d);
    for c in 0..width {
        let h: Complex64 = kernel
            .iter()
            .take(width)
            .enumerate()
            .map(|(t, &k)| k * Complex64::from_polar(1.0, -2.0 * std::f64::consts::PI * (c * t) as f64 / width as f64))
            .sum();
        let gain = 1.0 / (1.0 + h.norm_sqr());
        // the kernel lives in a single row, so the response is constant down a column
        response.slice_mut(s![c * height..(c + 1) * height]).fill(gain);
    }
    let mut tiled = Array1::<f64>::zeros(2 * m * d);
    for mut block in tiled.exact_chunks_mut(d) {
        block.assign(&response);
    }
    tiled
}

#[derive(Debug, Clone)]
enum Kind {
    L1Space { lambda: f64, nonneg: bool, fft_pad: bool, fft: Fft2 },
    L1Complex { lambda: f64 },
    L2Group { lambda: f64 },
    Lowpass { lambda: f64, gain: Array1<f64> },
    L1Real { lambda: f64, nonneg: bool },
}

/// A regularizer bound to a dictionary shape.
#[derive(Debug, Clone)]
pub struct Proximal {
    d: usize,
    m: usize,
    kind: Kind,
}

impl Proximal {
    pub fn dim(&self) -> usize {
        self.d
    }

    pub fn num_codewords(&self) -> usize {
        self.m
    }

    pub fn apply(&self, x: &ArrayView2<'_, f64>, rho: f64) -> Result<Array2<f64>> {
        let rows = 2 * self.d * self.m;
        if x.nrows() != rows {
            return Err(CdlError::shape(format!("expected {rows} activation rows, got {}", x.nrows())));
        }
        match &self.kind {
            Kind::L1Real { lambda, nonneg } => Ok(soft_threshold(x, lambda / rho, *nonneg)),
            Kind::L1Complex { lambda } => shrink_complex_pairs(x, lambda / rho),
            Kind::L2Group { lambda } => shrink_groups(x, lambda / rho, self.m),
            Kind::Lowpass { lambda, gain } => {
                let scale = gain.mapv(|g| rho / lambda * g).insert_axis(Axis(1));
                Ok(x * &scale)
            }
            Kind::L1Space { lambda, nonneg, fft_pad, fft } => {
                Ok(self.shrink_space(x, lambda / rho, *nonneg, *fft_pad, fft))
            }
        }
    }

    /// Shrinkage in pixel space: inverse transform each activation map,
    /// soft-threshold the real part, transform back.
    fn shrink_space(&self, x: &ArrayView2<'_, f64>, threshold: f64, nonneg: bool, fft_pad: bool, fft: &Fft2) -> Array2<f64> {
        let (d, m) = (self.d, self.m);
        let dm = d * m;
        let (h, w) = (fft.height(), fft.width());
        let mut out = Array2::<f64>::zeros(x.raw_dim());
        let mut patch = vec![Complex64::zero(); d];
        for (i, column) in x.columns().into_iter().enumerate() {
            for k in 0..m {
                for (j, e) in patch.iter_mut().enumerate() {
                    *e = Complex64::new(column[k * d + j], column[dm + k * d + j]);
                }
                fft.inverse(&mut patch);
                let mut space = Array1::from_iter(patch.iter().map(|e| e.re));
                soft_threshold_inplace(&mut space, threshold, nonneg);
                if fft_pad {
                    for c in w / 2..w {
                        space.slice_mut(s![c * h + h / 2..(c + 1) * h]).fill(0.0);
                    }
                }
                for (e, &v) in patch.iter_mut().zip(space.iter()) {
                    *e = Complex64::new(v, 0.0);
                }
                fft.forward(&mut patch);
                for (j, e) in patch.iter().enumerate() {
                    out[[k * d + j, i]] = e.re;
                    out[[dm + k * d + j, i]] = e.im;
                }
            }
        }
        out
    }
}
