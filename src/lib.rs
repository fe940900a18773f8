extern crate blas_src;
extern crate ndarray;
extern crate ndarray_linalg;

pub mod admm;
pub mod blocks;
pub mod config;
pub mod dictionary;
pub mod encoder;
pub mod error;
pub mod fft2;
pub mod learn;
pub mod parallel_encoder;
pub mod regularizer;
pub mod soft_threshold;
pub mod statistics;

#[cfg(feature = "python")]
mod python;

pub use crate::admm::{AdmmDiagnostics, Checkup};
pub use crate::blocks::{block_diagonal, columnar, normalize_dictionary, BlockDiagonal};
pub use crate::config::{AdmmConfig, LearnConfig};
pub use crate::dictionary::fit_dictionary;
pub use crate::encoder::encode;
pub use crate::error::{CdlError, Result};
pub use crate::learn::{learn, Encoder, LearnDiagnostics, StepDiagnostics};
pub use crate::parallel_encoder::{encode_parallel, WorkerPool};
pub use crate::regularizer::{Proximal, Regularizer, RegularizerParams};
pub use crate::statistics::EncodingStatistics;
