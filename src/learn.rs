//! Online alternating minimization of the dictionary and the activations.

use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use ndarray::*;
use ndarray_linalg::SVD;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::admm::AdmmDiagnostics;
use crate::blocks::{normalize_dictionary, BlockDiagonal};
use crate::config::{AdmmConfig, LearnConfig};
use crate::dictionary::fit_dictionary;
use crate::error::{CdlError, Result};
use crate::parallel_encoder::WorkerPool;
use crate::regularizer::{Proximal, Regularizer};
use crate::statistics::{forgetting_weight, EncodingStatistics};

/// Exponent of the online forgetting weight.
const BETA: f64 = 1.0;

/// `mean((D A - X)^2)`.
pub fn reconstruction_mse(
    dictionary: &BlockDiagonal,
    a: &ArrayView2<'_, f64>,
    x: &ArrayView2<'_, f64>,
) -> Result<f64> {
    let residual = dictionary.apply(a)? - x;
    Ok(residual.mapv(|e| e * e).mean().unwrap_or(0.0))
}

/// Initial dictionary from the leading left singular vectors of a random
/// subsample of `min(n, m^2)` columns, normalized per codeword.
///
/// The SVD yields at most `2d` directions; any further codewords are drawn
/// from random data columns.
pub fn init_svd(x: &ArrayView2<'_, f64>, m: usize, rng: &mut StdRng) -> Result<BlockDiagonal> {
    let n = x.ncols();
    if n == 0 || m == 0 {
        return Err(CdlError::shape("need at least one signal and one codeword"));
    }
    let n_sample = n.min(m * m);
    let picks: Vec<usize> = (0..n_sample).map(|_| rng.gen_range(0..n)).collect();
    let xs = x.select(Axis(1), &picks);
    let (u, _, _) = xs.svd(true, false)?;
    let u = u.ok_or_else(|| CdlError::SingularSystem {
        context: "SVD returned no left singular vectors".to_string(),
    })?;

    let from_svd = m.min(u.ncols());
    let mut columns = Array2::<f64>::zeros((x.nrows(), m));
    columns.slice_mut(s![.., ..from_svd]).assign(&u.slice(s![.., ..from_svd]));
    for k in from_svd..m {
        columns.column_mut(k).assign(&x.column(rng.gen_range(0..n)));
    }
    normalize_dictionary(&BlockDiagonal::from_columnar(&columns.view())?)
}

/// Random batch of `batch_size` columns drawn with replacement; the whole
/// dataset when the batch covers it.
fn sample_batch<'a>(x: &ArrayView2<'a, f64>, batch_size: usize, rng: &mut StdRng) -> CowArray<'a, f64, Ix2> {
    let n = x.ncols();
    if batch_size >= n {
        CowArray::from(x.clone())
    } else {
        let picks: Vec<usize> = (0..batch_size).map(|_| rng.gen_range(0..n)).collect();
        CowArray::from(x.select(Axis(1), &picks))
    }
}

/// Replaces zero codewords with random, non-zero batch columns. Returns the
/// indices that were replaced.
fn patch_zero_codewords(
    dictionary: &mut BlockDiagonal,
    batch: &ArrayView2<'_, f64>,
    rng: &mut StdRng,
) -> Result<Vec<usize>> {
    let norms = dictionary.codeword_norms();
    let live: Vec<usize> = batch
        .columns()
        .into_iter()
        .enumerate()
        .filter(|(_, c)| c.iter().any(|&e| e != 0.0))
        .map(|(i, _)| i)
        .collect();
    let mut patched = Vec::new();
    for (k, &norm) in norms.iter().enumerate() {
        if norm != 0.0 || live.is_empty() {
            continue;
        }
        let source = live[rng.gen_range(0..live.len())];
        dictionary.set_codeword(k, &batch.column(source))?;
        warn!("codeword {k} collapsed to zero; reseeded from batch column {source}");
        patched.push(k);
    }
    Ok(patched)
}

/// Encoder bound to a learned dictionary and regularizer.
#[derive(Debug, Clone)]
pub struct Encoder {
    dictionary: BlockDiagonal,
    regularizer: Regularizer,
    prox: Proximal,
    workers: WorkerPool,
    max_iter: usize,
    admm: AdmmConfig,
}

impl Encoder {
    pub fn new(
        dictionary: BlockDiagonal,
        regularizer: Regularizer,
        num_workers: usize,
        max_iter: usize,
        admm: AdmmConfig,
    ) -> Result<Self> {
        Self::with_workers(dictionary, regularizer, WorkerPool::new(num_workers)?, max_iter, admm)
    }

    pub(crate) fn with_workers(
        dictionary: BlockDiagonal,
        regularizer: Regularizer,
        workers: WorkerPool,
        max_iter: usize,
        admm: AdmmConfig,
    ) -> Result<Self> {
        admm.validate()?;
        let prox = regularizer.prepare(dictionary.dim(), dictionary.num_codewords())?;
        Ok(Encoder { dictionary, regularizer, prox, workers, max_iter, admm })
    }

    pub fn dictionary(&self) -> &BlockDiagonal {
        &self.dictionary
    }

    pub fn regularizer(&self) -> &Regularizer {
        &self.regularizer
    }

    /// `2dm x n` activations for `2d x n` data.
    pub fn encode(&self, x: &ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        Ok(self.encode_with_diagnostics(x)?.0)
    }

    pub fn encode_with_diagnostics(&self, x: &ArrayView2<'_, f64>) -> Result<(Array2<f64>, Vec<AdmmDiagnostics>)> {
        self.workers.encode(x, &self.dictionary, &self.prox, self.max_iter, &self.admm)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnParameters {
    pub n: usize,
    pub d: usize,
    pub m: usize,
    pub regularizer: Regularizer,
    pub max_steps: usize,
    pub max_admm_steps: usize,
    pub batch_size: usize,
    pub num_workers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDiagnostics {
    /// 1-based step index.
    pub step: usize,
    /// One record per encoder worker range.
    pub encoder: Vec<AdmmDiagnostics>,
    pub dictionary: AdmmDiagnostics,
    /// Batch reconstruction error after the encoding half-step.
    pub mse_encode: f64,
    /// Batch reconstruction error after the dictionary half-step.
    pub mse_dictionary: f64,
    pub patched: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnDiagnostics {
    pub parameters: LearnParameters,
    pub globals: AdmmConfig,
    pub steps: Vec<StepDiagnostics>,
    /// Interleaved `[mse_encode, mse_dictionary]` per step.
    pub error: Vec<f64>,
}

impl LearnDiagnostics {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Learns `m` codewords from the `2d x n` real-stacked signals in `x`.
///
/// Returns an encoder bound to the final dictionary, the dictionary in
/// columnar (`2d x m`) form, and the learning diagnostics.
pub fn learn(
    x: &ArrayView2<'_, f64>,
    m: usize,
    config: &LearnConfig,
) -> Result<(Encoder, Array2<f64>, LearnDiagnostics)> {
    config.validate()?;
    let (d2, n) = x.dim();
    if d2 == 0 || d2 % 2 != 0 {
        return Err(CdlError::shape(format!("data must have an even, non-zero row count, got {d2}")));
    }
    if n == 0 {
        return Err(CdlError::shape("no signals to learn from"));
    }
    if m == 0 {
        return Err(CdlError::config("need at least one codeword"));
    }
    let d = d2 / 2;
    let prox = config.regularizer.prepare(d, m)?;
    let batch_size = config.batch_size.map_or(n, |b| b.min(n));

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut diagnostics = LearnDiagnostics {
        parameters: LearnParameters {
            n,
            d,
            m,
            regularizer: config.regularizer.clone(),
            max_steps: config.max_steps,
            max_admm_steps: config.max_admm_steps,
            batch_size,
            num_workers: config.num_workers,
        },
        globals: config.admm,
        steps: Vec::with_capacity(config.max_steps),
        error: Vec::with_capacity(2 * config.max_steps),
    };

    let bar = if config.progress {
        ProgressBar::new(config.max_steps as u64)
    } else {
        ProgressBar::hidden()
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[ETA {eta_precise}] {bar:40.cyan/blue} {percent:>3}% {pos:>7}/{len:7} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let workers = WorkerPool::new(config.num_workers)?;
    let mut dictionary = init_svd(x, m, &mut rng)?;
    let mut running: Option<EncodingStatistics> = None;

    for t in 1..=config.max_steps {
        let batch = sample_batch(x, batch_size, &mut rng);

        let (a, encoder_diags) =
            workers.encode(&batch.view(), &dictionary, &prox, config.max_admm_steps, &config.admm)?;
        let mse_encode = reconstruction_mse(&dictionary, &a.view(), &batch.view())?;

        let fresh = EncodingStatistics::from_batch(&a.view(), &batch.view())?;
        let stats = match running.take() {
            None => fresh,
            Some(mut stats) => {
                stats.blend(&fresh, forgetting_weight(t, BETA))?;
                stats
            }
        };

        let (mut fitted, dictionary_diags) =
            fit_dictionary(&stats, m, config.max_admm_steps, Some(&dictionary), &config.admm)?;
        running = Some(stats);
        let mse_dictionary = reconstruction_mse(&fitted, &a.view(), &batch.view())?;
        info!(
            "{t:4}| [A] MSE={mse_encode:.3e} | [D] MSE={mse_dictionary:.3e} | [A-D] {:.3e}",
            mse_encode - mse_dictionary
        );

        let patched = if config.patch_zero_codewords {
            patch_zero_codewords(&mut fitted, &batch.view(), &mut rng)?
        } else {
            Vec::new()
        };
        dictionary = normalize_dictionary(&fitted)?;

        diagnostics.error.push(mse_encode);
        diagnostics.error.push(mse_dictionary);
        diagnostics.steps.push(StepDiagnostics {
            step: t,
            encoder: encoder_diags,
            dictionary: dictionary_diags,
            mse_encode,
            mse_dictionary,
            patched,
        });
        bar.set_message(format!("MSE={mse_dictionary:.3e}"));
        bar.inc(1);
    }
    bar.finish();

    let columns = dictionary.columnar();
    let encoder = Encoder::with_workers(
        dictionary,
        config.regularizer.clone(),
        workers,
        config.max_admm_steps,
        config.admm,
    )?;
    Ok((encoder, columns, diagnostics))
}
