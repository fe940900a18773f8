use std::sync::Arc;

use crossbeam_channel;
use log::debug;
use ndarray::*;
use rayon::{self, ThreadPool, ThreadPoolBuilder};

use crate::admm::AdmmDiagnostics;
use crate::blocks::BlockDiagonal;
use crate::config::AdmmConfig;
use crate::encoder::encode;
use crate::error::{CdlError, Result};
use crate::regularizer::Proximal;

struct RangeResult {
    start: usize,
    end: usize,
    outcome: Result<(Array2<f64>, AdmmDiagnostics)>,
}

/// Contiguous column ranges of width `n / num_workers`; the last range
/// holds the remainder and may be narrower.
pub fn column_ranges(n: usize, num_workers: usize) -> Vec<(usize, usize)> {
    let width = (n / num_workers.max(1)).max(1);
    (0..n).step_by(width).map(|i| (i, usize::min(n, i + width))).collect()
}

fn encode_many(
    ranges: &[(usize, usize)],
    tx_ch: &crossbeam_channel::Sender<RangeResult>,
    x: &ArrayView2<'_, f64>,
    dictionary: &BlockDiagonal,
    prox: &Proximal,
    max_iter: usize,
    config: &AdmmConfig,
) {
    match ranges.len() {
        0 => {}
        1 => {
            let (start, end) = ranges[0];
            let outcome = encode(&x.slice(s![.., start..end]), dictionary, prox, max_iter, config);
            // The receiver outlives every sender.
            let _ = tx_ch.send(RangeResult { start, end, outcome });
        }
        _ => {
            let icenter = ranges.len() / 2;
            rayon::join(
                || encode_many(&ranges[..icenter], tx_ch, x, dictionary, prox, max_iter, config),
                || encode_many(&ranges[icenter..], tx_ch, x, dictionary, prox, max_iter, config),
            );
        }
    }
}

/// Worker threads shared by every parallel encode of one learning run or
/// one bound encoder. One extra thread runs the collector.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    num_workers: usize,
    pool: Option<Arc<ThreadPool>>,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> Result<Self> {
        let pool = if num_workers > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(num_workers + 1)
                .build()
                .map_err(|e| CdlError::ThreadPool(e.to_string()))?;
            Some(Arc::new(pool))
        } else {
            None
        };
        Ok(WorkerPool { num_workers, pool })
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Encodes the columns of `x` with up to `num_workers` independent encoders.
    ///
    /// Each worker owns a disjoint column range, so the assembled activations
    /// keep the input column order. If any worker fails the whole batch fails.
    /// Diagnostics come back one per range, ordered by range.
    pub fn encode(
        &self,
        x: &ArrayView2<'_, f64>,
        dictionary: &BlockDiagonal,
        prox: &Proximal,
        max_iter: usize,
        config: &AdmmConfig,
    ) -> Result<(Array2<f64>, Vec<AdmmDiagnostics>)> {
        let n = x.ncols();
        let pool = match &self.pool {
            Some(pool) if n >= self.num_workers => pool,
            _ => {
                let (a, info) = encode(x, dictionary, prox, max_iter, config)?;
                return Ok((a, vec![info]));
            }
        };

        let ranges = column_ranges(n, self.num_workers);
        debug!("encoding {n} signals in {} ranges on {} workers", ranges.len(), self.num_workers);

        let (_, d2m) = dictionary.shape();
        let mut a = Array2::<f64>::zeros((d2m, n));
        let mut infos: Vec<(usize, AdmmDiagnostics)> = Vec::with_capacity(ranges.len());
        let mut failure: Option<CdlError> = None;

        let (tx_rt, rx_rt) = crossbeam_channel::bounded::<RangeResult>(ranges.len());
        pool.install(|| {
            rayon::join(
                // Sender. Owning the only sender lets the receiver stop once every range is done.
                || {
                    let tx_rt = tx_rt;
                    encode_many(&ranges, &tx_rt, x, dictionary, prox, max_iter, config)
                },
                // Receiver.
                || {
                    for RangeResult { start, end, outcome } in rx_rt.iter() {
                        match outcome {
                            Ok((a1, info1)) => {
                                a.slice_mut(s![.., start..end]).assign(&a1);
                                infos.push((start, info1));
                            }
                            Err(source) => {
                                failure.get_or_insert(CdlError::Worker { start, end, source: Box::new(source) });
                            }
                        }
                    }
                },
            )
        });

        if let Some(err) = failure {
            return Err(err);
        }
        if infos.len() != ranges.len() {
            return Err(CdlError::ThreadPool(format!(
                "{} of {} column ranges returned",
                infos.len(),
                ranges.len()
            )));
        }
        infos.sort_by_key(|(start, _)| *start);
        Ok((a, infos.into_iter().map(|(_, info)| info).collect()))
    }
}

/// One-off form of [`WorkerPool::encode`]; builds a pool for this call only.
pub fn encode_parallel(
    x: &ArrayView2<'_, f64>,
    dictionary: &BlockDiagonal,
    prox: &Proximal,
    num_workers: usize,
    max_iter: usize,
    config: &AdmmConfig,
) -> Result<(Array2<f64>, Vec<AdmmDiagnostics>)> {
    WorkerPool::new(num_workers)?.encode(x, dictionary, prox, max_iter, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_cover_every_column_once() {
        assert_eq!(column_ranges(10, 3), vec![(0, 3), (3, 6), (6, 9), (9, 10)]);
        assert_eq!(column_ranges(8, 4), vec![(0, 2), (2, 4), (4, 6), (6, 8)]);
        assert_eq!(column_ranges(5, 1), vec![(0, 5)]);
    }

    #[test]
    fn pool_is_reused_across_batches() {
        let dictionary = BlockDiagonal::from_columnar(&array![[0.6], [0.0], [0.0], [0.8]].view()).unwrap();
        let prox = crate::regularizer::Regularizer::L1Complex { lambda: 0.05 }.prepare(2, 1).unwrap();
        let workers = WorkerPool::new(2).unwrap();
        let x = Array2::from_shape_fn((4, 6), |(r, c)| ((r * 6 + c) as f64 * 0.37).sin());
        let config = AdmmConfig::default();
        let (first, infos) = workers.encode(&x.view(), &dictionary, &prox, 300, &config).unwrap();
        assert_eq!(infos.len(), 2);
        let (second, _) = workers.encode(&x.view(), &dictionary, &prox, 300, &config).unwrap();
        assert_eq!(first, second);
        // fewer signals than workers runs inline
        let (_, infos) = workers.encode(&x.slice(s![.., ..1]), &dictionary, &prox, 300, &config).unwrap();
        assert_eq!(infos.len(), 1);
    }
}
