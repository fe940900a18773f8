//! Shrinkage kernels shared by the proximal operators.
//!
//! Activation matrices are `2dm x n`: rows `k*d..(k+1)*d` hold the real parts
//! of codeword `k` and rows `dm + k*d..dm + (k+1)*d` the matching imaginary
//! parts; every column is one signal.

use ndarray::*;

use crate::error::{CdlError, Result};

fn shrink(e: f64, threshold: f64, nonneg: bool) -> f64 {
    if e - threshold > 0.0 {
        e - threshold
    } else if e + threshold < 0.0 && !nonneg {
        e + threshold
    } else {
        0.0
    }
}

/// Elementwise soft thresholding. With `nonneg`, values below `threshold`
/// in magnitude and all negative values map to zero.
pub fn soft_threshold<D>(x: &ArrayView<'_, f64, D>, threshold: f64, nonneg: bool) -> Array<f64, D>
where
    D: Dimension,
{
    x.mapv(|e| shrink(e, threshold, nonneg))
}

/// In-place form of [`soft_threshold`].
pub fn soft_threshold_inplace<S, D>(x: &mut ArrayBase<S, D>, threshold: f64, nonneg: bool)
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    x.mapv_inplace(|e| shrink(e, threshold, nonneg));
}

fn split_rows(rows: usize, what: &str) -> Result<usize> {
    if rows % 2 != 0 {
        return Err(CdlError::shape(format!("{what}: odd row count {rows}")));
    }
    Ok(rows / 2)
}

/// Shrinks each complex coefficient toward the origin: magnitudes below
/// `threshold` vanish, the rest are scaled by `1 - threshold / |z|`.
pub fn shrink_complex_pairs(x: &ArrayView2<'_, f64>, threshold: f64) -> Result<Array2<f64>> {
    let dm = split_rows(x.nrows(), "complex shrinkage")?;
    let mut out = x.to_owned();
    {
        let (mut re, mut im) = out.view_mut().split_at(Axis(0), dm);
        Zip::from(&mut re).and(&mut im).for_each(|a, b| {
            let mag = a.hypot(*b);
            let scale = if mag < threshold || mag == 0.0 { 0.0 } else { 1.0 - threshold / mag };
            *a *= scale;
            *b *= scale;
        });
    }
    Ok(out)
}

/// Group shrinkage: each codeword's coefficients for one signal form a group
/// that is either zeroed (norm at or below `threshold`) or scaled by
/// `1 - threshold / norm`.
pub fn shrink_groups(x: &ArrayView2<'_, f64>, threshold: f64, m: usize) -> Result<Array2<f64>> {
    let dm = split_rows(x.nrows(), "group shrinkage")?;
    if m == 0 || dm % m != 0 {
        return Err(CdlError::shape(format!("{dm} coefficients do not split into {m} codewords")));
    }
    let d = dm / m;
    let mut out = x.to_owned();
    for k in 0..m {
        let re = x.slice(s![k * d..(k + 1) * d, ..]);
        let im = x.slice(s![dm + k * d..dm + (k + 1) * d, ..]);
        let norms = (re.mapv(|e| e * e).sum_axis(Axis(0)) + im.mapv(|e| e * e).sum_axis(Axis(0)))
            .mapv(f64::sqrt);
        let scale = norms.mapv(|z| if z > threshold { 1.0 - threshold / z } else { 0.0 });
        let mut re_out = out.slice_mut(s![k * d..(k + 1) * d, ..]);
        re_out *= &scale;
        let mut im_out = out.slice_mut(s![dm + k * d..dm + (k + 1) * d, ..]);
        im_out *= &scale;
    }
    Ok(out)
}

/// Projects every codeword of a flattened dictionary onto the unit l2 ball.
/// Codewords already inside the ball are returned untouched.
pub fn project_unit_ball(v: &ArrayView1<'_, f64>, m: usize) -> Result<Array1<f64>> {
    let len = v.len();
    if m == 0 || len % (2 * m) != 0 {
        return Err(CdlError::shape(format!("vector of length {len} cannot hold {m} codewords")));
    }
    let dm = len / 2;
    let d = dm / m;
    let mut out = v.to_owned();
    for k in 0..m {
        let re = v.slice(s![k * d..(k + 1) * d]);
        let im = v.slice(s![dm + k * d..dm + (k + 1) * d]);
        let norm = (re.dot(&re) + im.dot(&im)).sqrt();
        if norm > 1.0 {
            out.slice_mut(s![k * d..(k + 1) * d]).mapv_inplace(|e| e / norm);
            out.slice_mut(s![dm + k * d..dm + (k + 1) * d]).mapv_inplace(|e| e / norm);
        }
    }
    Ok(out)
}
