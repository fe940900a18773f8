//! Conversions between the representations of complex codewords.
//!
//! A set of `m` complex codewords of length `d` is stored either as a real
//! `2d x m` matrix with the real parts stacked above the imaginary parts
//! ("columnar"), or as the block operator `[[A, -B], [B, A]]` of shape
//! `2d x 2dm`, where `A` and `B` are rows of `d x d` diagonal blocks holding
//! the real and imaginary parts of each codeword. Multiplying that operator
//! by a flattened activation vector performs one complex Hadamard product
//! per codeword and sums them.

use ndarray::*;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{CdlError, Result};

fn half(rows: usize, what: &str) -> Result<usize> {
    if rows % 2 != 0 {
        return Err(CdlError::shape(format!("{what} has odd row count {rows}")));
    }
    Ok(rows / 2)
}

/// `[re(X); im(X)]`.
pub fn to_real_stacked(x: &ArrayView2<'_, Complex64>) -> Array2<f64> {
    let re = x.mapv(|e| e.re);
    let im = x.mapv(|e| e.im);
    concatenate![Axis(0), re, im]
}

/// Inverse of [`to_real_stacked`].
pub fn to_complex(y: &ArrayView2<'_, f64>) -> Result<Array2<Complex64>> {
    let d = half(y.nrows(), "real-stacked matrix")?;
    let re = y.slice(s![..d, ..]);
    let im = y.slice(s![d.., ..]);
    Ok(Zip::from(&re).and(&im).map_collect(|&a, &b| Complex64::new(a, b)))
}

/// Vectorizes a `2d x m` columnar matrix as `[vec(re); vec(im)]`, column-major.
pub fn flatten(x: &ArrayView2<'_, f64>) -> Result<Array1<f64>> {
    let d = half(x.nrows(), "columnar matrix")?;
    let m = x.ncols();
    let mut out = Array1::<f64>::zeros(2 * d * m);
    for k in 0..m {
        out.slice_mut(s![k * d..(k + 1) * d]).assign(&x.slice(s![..d, k]));
        out.slice_mut(s![d * m + k * d..d * m + (k + 1) * d])
            .assign(&x.slice(s![d.., k]));
    }
    Ok(out)
}

/// Inverse of [`flatten`].
pub fn unflatten(v: &ArrayView1<'_, f64>, m: usize) -> Result<Array2<f64>> {
    let len = v.len();
    if m == 0 || len % (2 * m) != 0 {
        return Err(CdlError::shape(format!(
            "vector of length {len} cannot hold {m} complex columns"
        )));
    }
    let d = len / (2 * m);
    let mut out = Array2::<f64>::zeros((2 * d, m));
    for k in 0..m {
        out.slice_mut(s![..d, k]).assign(&v.slice(s![k * d..(k + 1) * d]));
        out.slice_mut(s![d.., k])
            .assign(&v.slice(s![d * m + k * d..d * m + (k + 1) * d]));
    }
    Ok(out)
}

/// Dictionary in block-diagonal operator form.
///
/// Only the diagonals are stored: `real[[j, k]]` is the `j`-th entry of the
/// `k`-th block of `A` and `imag[[j, k]]` the same entry of `B`.
///
/// Serializes as its columnar `2d x m` matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Array2<f64>", try_from = "Array2<f64>")]
pub struct BlockDiagonal {
    real: Array2<f64>,
    imag: Array2<f64>,
}

impl From<BlockDiagonal> for Array2<f64> {
    fn from(operator: BlockDiagonal) -> Self {
        operator.columnar()
    }
}

impl TryFrom<Array2<f64>> for BlockDiagonal {
    type Error = CdlError;

    fn try_from(columns: Array2<f64>) -> Result<Self> {
        BlockDiagonal::from_columnar(&columns.view())
    }
}

impl BlockDiagonal {
    pub fn from_columnar(columns: &ArrayView2<'_, f64>) -> Result<Self> {
        let d = half(columns.nrows(), "columnar dictionary")?;
        if d == 0 || columns.ncols() == 0 {
            return Err(CdlError::shape("dictionary must have at least one coefficient and one codeword"));
        }
        Ok(BlockDiagonal {
            real: columns.slice(s![..d, ..]).to_owned(),
            imag: columns.slice(s![d.., ..]).to_owned(),
        })
    }

    /// Reads the diagonals back out of a dense `2d x 2dm` operator.
    pub fn from_dense(q: &ArrayView2<'_, f64>) -> Result<Self> {
        let d = half(q.nrows(), "block operator")?;
        let dm = half(q.ncols(), "block operator")?;
        if d == 0 || dm == 0 || dm % d != 0 {
            return Err(CdlError::shape(format!(
                "operator of shape {:?} is not 2d x 2dm",
                q.shape()
            )));
        }
        let m = dm / d;
        let mut real = Array2::<f64>::zeros((d, m));
        let mut imag = Array2::<f64>::zeros((d, m));
        for k in 0..m {
            for j in 0..d {
                real[[j, k]] = q[[j, k * d + j]];
                imag[[j, k]] = q[[d + j, k * d + j]];
            }
        }
        Ok(BlockDiagonal { real, imag })
    }

    pub fn from_flat(v: &ArrayView1<'_, f64>, m: usize) -> Result<Self> {
        Self::from_columnar(&unflatten(v, m)?.view())
    }

    pub fn dim(&self) -> usize {
        self.real.nrows()
    }

    pub fn num_codewords(&self) -> usize {
        self.real.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        let d = self.dim();
        (2 * d, 2 * d * self.num_codewords())
    }

    pub fn real(&self) -> ArrayView2<'_, f64> {
        self.real.view()
    }

    pub fn imag(&self) -> ArrayView2<'_, f64> {
        self.imag.view()
    }

    pub fn columnar(&self) -> Array2<f64> {
        concatenate![Axis(0), self.real, self.imag]
    }

    pub fn flatten(&self) -> Array1<f64> {
        let d = self.dim();
        let dm = d * self.num_codewords();
        let mut out = Array1::<f64>::zeros(2 * dm);
        for (k, (re, im)) in self.real.columns().into_iter().zip(self.imag.columns()).enumerate() {
            out.slice_mut(s![k * d..(k + 1) * d]).assign(&re);
            out.slice_mut(s![dm + k * d..dm + (k + 1) * d]).assign(&im);
        }
        out
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let d = self.dim();
        let dm = d * self.num_codewords();
        let mut q = Array2::<f64>::zeros((2 * d, 2 * dm));
        for k in 0..self.num_codewords() {
            for j in 0..d {
                let (a, b) = (self.real[[j, k]], self.imag[[j, k]]);
                q[[j, k * d + j]] = a;
                q[[j, dm + k * d + j]] = -b;
                q[[d + j, k * d + j]] = b;
                q[[d + j, dm + k * d + j]] = a;
            }
        }
        q
    }

    /// `D * A` for a `2dm x n` activation matrix.
    pub fn apply(&self, a: &ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let d = self.dim();
        let m = self.num_codewords();
        let dm = d * m;
        if a.nrows() != 2 * dm {
            return Err(CdlError::shape(format!(
                "activations have {} rows, operator expects {}",
                a.nrows(),
                2 * dm
            )));
        }
        let n = a.ncols();
        let mut out = Array2::<f64>::zeros((2 * d, n));
        for k in 0..m {
            let ar = self.real.column(k).insert_axis(Axis(1));
            let bi = self.imag.column(k).insert_axis(Axis(1));
            let re = a.slice(s![k * d..(k + 1) * d, ..]);
            let im = a.slice(s![dm + k * d..dm + (k + 1) * d, ..]);
            {
                let mut top = out.slice_mut(s![..d, ..]);
                top += &(&re * &ar);
                top -= &(&im * &bi);
            }
            let mut bottom = out.slice_mut(s![d.., ..]);
            bottom += &(&re * &bi);
            bottom += &(&im * &ar);
        }
        Ok(out)
    }

    /// `D' * X` for a `2d x n` data matrix.
    pub fn apply_transpose(&self, x: &ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let d = self.dim();
        let m = self.num_codewords();
        let dm = d * m;
        if x.nrows() != 2 * d {
            return Err(CdlError::shape(format!(
                "data has {} rows, operator expects {}",
                x.nrows(),
                2 * d
            )));
        }
        let xr = x.slice(s![..d, ..]);
        let xi = x.slice(s![d.., ..]);
        let mut out = Array2::<f64>::zeros((2 * dm, x.ncols()));
        for k in 0..m {
            let ar = self.real.column(k).insert_axis(Axis(1));
            let bi = self.imag.column(k).insert_axis(Axis(1));
            out.slice_mut(s![k * d..(k + 1) * d, ..])
                .assign(&(&(&xr * &ar) + &(&xi * &bi)));
            out.slice_mut(s![dm + k * d..dm + (k + 1) * d, ..])
                .assign(&(&(&xi * &ar) - &(&xr * &bi)));
        }
        Ok(out)
    }

    /// `diag(D * D')`, length `2d`. `D * D'` is itself diagonal.
    pub fn gram_diagonal(&self) -> Array1<f64> {
        let energy = (&self.real * &self.real + &self.imag * &self.imag).sum_axis(Axis(1));
        concatenate![Axis(0), energy, energy]
    }

    pub fn codeword_norms(&self) -> Array1<f64> {
        (&self.real * &self.real + &self.imag * &self.imag)
            .sum_axis(Axis(0))
            .mapv(f64::sqrt)
    }

    /// Overwrites codeword `k` with a columnar `2d` vector.
    pub fn set_codeword(&mut self, k: usize, column: &ArrayView1<'_, f64>) -> Result<()> {
        let d = self.dim();
        if column.len() != 2 * d || k >= self.num_codewords() {
            return Err(CdlError::shape(format!(
                "cannot place a length-{} column at codeword {k}",
                column.len()
            )));
        }
        self.real.column_mut(k).assign(&column.slice(s![..d]));
        self.imag.column_mut(k).assign(&column.slice(s![d..]));
        Ok(())
    }
}

pub fn block_diagonal(columns: &ArrayView2<'_, f64>) -> Result<BlockDiagonal> {
    BlockDiagonal::from_columnar(columns)
}

pub fn columnar(operator: &BlockDiagonal) -> Array2<f64> {
    operator.columnar()
}

/// Rescales every codeword to unit l2 norm.
pub fn normalize_dictionary(dictionary: &BlockDiagonal) -> Result<BlockDiagonal> {
    let norms = dictionary.codeword_norms();
    if let Some(index) = norms.iter().position(|&n| n == 0.0 || !n.is_finite()) {
        return Err(CdlError::DegenerateCodeword { index });
    }
    Ok(BlockDiagonal {
        real: &dictionary.real / &norms,
        imag: &dictionary.imag / &norms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample(d: usize, m: usize) -> Array2<f64> {
        Array2::from_shape_fn((2 * d, m), |(i, j)| (i as f64 * 0.7 - j as f64 * 1.3).sin())
    }

    #[test]
    fn block_round_trip() {
        for (d, m) in [(1, 1), (3, 2), (4, 5)] {
            let x = sample(d, m);
            let q = block_diagonal(&x.view()).unwrap();
            assert_eq!(q.shape(), (2 * d, 2 * d * m));
            assert_eq!(columnar(&q), x);
            let dense = q.to_dense();
            assert_eq!(BlockDiagonal::from_dense(&dense.view()).unwrap().columnar(), x);
        }
    }

    #[test]
    fn dense_layout_is_complex_multiplication() {
        // codeword 2 + 3i, activation 5 - 1i: product 13 + 13i
        let q = block_diagonal(&array![[2.0], [3.0]].view()).unwrap();
        assert_eq!(q.to_dense(), array![[2.0, -3.0], [3.0, 2.0]]);
        let y = q.apply(&array![[5.0], [-1.0]].view()).unwrap();
        assert_eq!(y, array![[13.0], [13.0]]);
    }

    #[test]
    fn apply_matches_dense_operator() {
        let (d, m, n) = (3, 2, 4);
        let q = block_diagonal(&sample(d, m).view()).unwrap();
        let a = Array2::from_shape_fn((2 * d * m, n), |(i, j)| ((i * n + j) as f64).cos());
        let x = Array2::from_shape_fn((2 * d, n), |(i, j)| ((i + 2 * j) as f64).sin());
        let dense = q.to_dense();
        assert_abs_diff_eq!(q.apply(&a.view()).unwrap(), dense.dot(&a), epsilon = 1e-12);
        assert_abs_diff_eq!(q.apply_transpose(&x.view()).unwrap(), dense.t().dot(&x), epsilon = 1e-12);
        let gram = dense.dot(&dense.t());
        assert_abs_diff_eq!(q.gram_diagonal(), gram.diag().to_owned(), epsilon = 1e-12);
        // D * D' has no off-diagonal mass
        assert_abs_diff_eq!(gram.sum(), gram.diag().sum(), epsilon = 1e-12);
    }

    #[test]
    fn flatten_round_trip() {
        let x = sample(4, 3);
        let v = flatten(&x.view()).unwrap();
        assert_eq!(v[1], x[[1, 0]]);
        assert_eq!(v[4], x[[0, 1]]);
        assert_eq!(v[12], x[[4, 0]]);
        assert_eq!(unflatten(&v.view(), 3).unwrap(), x);
        let q = block_diagonal(&x.view()).unwrap();
        assert_eq!(q.flatten(), v);
    }

    #[test]
    fn complex_round_trip() {
        let x = array![[Complex64::new(1.0, -2.0), Complex64::new(0.5, 3.0)]];
        let y = to_real_stacked(&x.view());
        assert_eq!(y, array![[1.0, 0.5], [-2.0, 3.0]]);
        assert_eq!(to_complex(&y.view()).unwrap(), x);
    }

    #[test]
    fn odd_shapes_are_rejected() {
        let odd = Array2::<f64>::zeros((3, 2));
        assert!(matches!(to_complex(&odd.view()), Err(CdlError::Shape { .. })));
        assert!(matches!(block_diagonal(&odd.view()), Err(CdlError::Shape { .. })));
        assert!(matches!(flatten(&odd.view()), Err(CdlError::Shape { .. })));
        let v = Array1::<f64>::zeros(10);
        assert!(matches!(unflatten(&v.view(), 3), Err(CdlError::Shape { .. })));
    }

    #[test]
    fn empty_operators_are_rejected() {
        let empty = Array2::<f64>::zeros((4, 0));
        assert!(matches!(BlockDiagonal::from_dense(&empty.view()), Err(CdlError::Shape { .. })));
        assert!(matches!(BlockDiagonal::from_columnar(&empty.view()), Err(CdlError::Shape { .. })));
    }

    #[test]
    fn serializes_as_columnar_matrix() {
        let x = sample(2, 3);
        let q = block_diagonal(&x.view()).unwrap();
        let json = serde_json::to_string(&q).unwrap();
        let columns: Array2<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(columns, x);
        assert_eq!(serde_json::from_str::<BlockDiagonal>(&json).unwrap(), q);

        let odd = serde_json::to_string(&Array2::<f64>::zeros((3, 2))).unwrap();
        assert!(serde_json::from_str::<BlockDiagonal>(&odd).is_err());
    }

    #[test]
    fn normalization() {
        let q = block_diagonal(&array![[3.0, 0.0], [4.0, 2.0]].view()).unwrap();
        let n = normalize_dictionary(&q).unwrap();
        assert_abs_diff_eq!(n.codeword_norms(), array![1.0, 1.0], epsilon = 1e-12);
        assert_abs_diff_eq!(n.columnar(), array![[0.6, 0.0], [0.8, 1.0]], epsilon = 1e-12);

        let zero = block_diagonal(&array![[1.0, 0.0], [0.0, 0.0]].view()).unwrap();
        assert!(matches!(
            normalize_dictionary(&zero),
            Err(CdlError::DegenerateCodeword { index: 1 })
        ));
    }
}
