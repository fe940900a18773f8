use numpy::{PyArray2, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::{pymodule, types::PyModule, PyErr, PyResult, Python};

use crate::blocks::{block_diagonal, BlockDiagonal};
use crate::config::{AdmmConfig, LearnConfig};
use crate::error::CdlError;
use crate::learn::{learn, Encoder};
use crate::regularizer::Regularizer;

impl From<CdlError> for PyErr {
    fn from(err: CdlError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

/// Convolutional dictionary learning with ADMM.
#[pymodule]
#[pyo3(name = "_impl")]
fn cdl_admm<'py>(_py: Python<'py>, m: &'py PyModule) -> PyResult<()> {
    /// Learns a dictionary from real-stacked signals.
    ///
    /// Parameters
    /// ==========
    /// x: ndarray of float, shape (2d, n)
    ///     Real parts on top of imaginary parts, one signal per column.
    /// num_codewords: int
    ///     Number of codewords.
    /// config: str, optional
    ///     JSON learn configuration; missing fields take their defaults.
    ///
    /// Returns
    /// =======
    /// The columnar (2d, m) dictionary and the diagnostics as a JSON string.
    #[pyfn(m)]
    #[pyo3(signature = (x, num_codewords, config=None))]
    fn learn_dictionary<'py>(
        py: Python<'py>,
        x: PyReadonlyArray2<'py, f64>,
        num_codewords: usize,
        config: Option<&str>,
    ) -> PyResult<(&'py PyArray2<f64>, String)> {
        let config = match config {
            Some(document) => LearnConfig::from_json(document)?,
            None => LearnConfig::default(),
        };
        let (_, columns, diagnostics) = learn(&x.as_array(), num_codewords, &config)?;
        Ok((columns.to_pyarray(py), diagnostics.to_json()?))
    }

    /// Encodes real-stacked signals against a columnar dictionary.
    #[pyfn(m)]
    #[pyo3(signature = (x, dictionary, regularizer, max_iter=200, num_workers=1, admm=None))]
    fn encode<'py>(
        py: Python<'py>,
        x: PyReadonlyArray2<'py, f64>,
        dictionary: PyReadonlyArray2<'py, f64>,
        regularizer: &str,
        max_iter: usize,
        num_workers: usize,
        admm: Option<&str>,
    ) -> PyResult<&'py PyArray2<f64>> {
        let regularizer: Regularizer = serde_json::from_str(regularizer)
            .map_err(|e| CdlError::config(format!("cannot parse regularizer: {e}")))?;
        regularizer.validate()?;
        let admm = match admm {
            Some(document) => serde_json::from_str(document)
                .map_err(|e| CdlError::config(format!("cannot parse ADMM parameters: {e}")))?,
            None => AdmmConfig::default(),
        };
        let dictionary = block_diagonal(&dictionary.as_array())?;
        let encoder = Encoder::new(dictionary, regularizer, num_workers, max_iter, admm)?;
        Ok(encoder.encode(&x.as_array())?.to_pyarray(py))
    }

    /// Dense (2d, 2dm) block operator of a columnar dictionary.
    #[pyfn(m)]
    fn block_diagonal_dense<'py>(
        py: Python<'py>,
        columns: PyReadonlyArray2<'py, f64>,
    ) -> PyResult<&'py PyArray2<f64>> {
        Ok(block_diagonal(&columns.as_array())?.to_dense().to_pyarray(py))
    }

    #[pyfn(m)]
    fn columnar_from_dense<'py>(
        py: Python<'py>,
        q: PyReadonlyArray2<'py, f64>,
    ) -> PyResult<&'py PyArray2<f64>> {
        Ok(BlockDiagonal::from_dense(&q.as_array())?.columnar().to_pyarray(py))
    }

    Ok(())
}
