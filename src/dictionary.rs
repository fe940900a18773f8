use log::{debug, warn};
use ndarray::*;
use ndarray_linalg::{CholeskyFactorized, FactorizeC, SolveC, UPLO};

use crate::admm::{checkup, AdmmDiagnostics, Verdict};
use crate::blocks::BlockDiagonal;
use crate::config::AdmmConfig;
use crate::error::{CdlError, Result};
use crate::soft_threshold::project_unit_ball;
use crate::statistics::{flat_index, EncodingStatistics};

/// Cholesky factors of `StS + rho I`, one per frequency block.
struct Factors {
    blocks: Vec<CholeskyFactorized<OwnedRepr<f64>>>,
}

impl Factors {
    fn new(stats: &EncodingStatistics, rho: f64) -> Result<Self> {
        let sts = stats.blocks();
        let size = sts.shape()[1];
        let ident = Array2::<f64>::eye(size);
        let mut blocks = Vec::with_capacity(sts.shape()[0]);
        for (j, block) in sts.outer_iter().enumerate() {
            if block.iter().any(|e| !e.is_finite()) {
                return Err(CdlError::SingularSystem {
                    context: format!("frequency {j} has non-finite statistics"),
                });
            }
            let system = &block + &(&ident * rho);
            let factor = system.factorizec(UPLO::Lower).map_err(|e| CdlError::SingularSystem {
                context: format!("frequency {j} at rho={rho:.3e}: {e}"),
            })?;
            blocks.push(factor);
        }
        debug!("factorized {} blocks of size {size} at rho={rho:.3e}", blocks.len());
        Ok(Factors { blocks })
    }

    /// Solves `(StS + rho I) v = rhs` for a flattened `2dm` right-hand side.
    fn solve(&self, rhs: &Array1<f64>, d: usize, m: usize) -> Result<Array1<f64>> {
        let mut out = Array1::<f64>::zeros(rhs.len());
        let mut b = Array1::<f64>::zeros(2 * m);
        for (j, factor) in self.blocks.iter().enumerate() {
            for r in 0..2 * m {
                b[r] = rhs[flat_index(r, j, d, m)];
            }
            let v = factor.solvec(&b).map_err(|e| CdlError::SingularSystem {
                context: format!("frequency {j}: {e}"),
            })?;
            for r in 0..2 * m {
                out[flat_index(r, j, d, m)] = v[r];
            }
        }
        if out.iter().any(|e| !e.is_finite()) {
            return Err(CdlError::SingularSystem {
                context: "dictionary solve produced non-finite values".to_string(),
            });
        }
        Ok(out)
    }
}

/// Fits an `m`-codeword dictionary to encoding statistics.
///
/// The split variable is kept inside the unit l2 ball per codeword; it is
/// returned in block operator form. `initial` seeds the split variable.
pub fn fit_dictionary(
    stats: &EncodingStatistics,
    m: usize,
    max_iter: usize,
    initial: Option<&BlockDiagonal>,
    config: &AdmmConfig,
) -> Result<(BlockDiagonal, AdmmDiagnostics)> {
    if stats.num_codewords() != m {
        return Err(CdlError::shape(format!(
            "statistics describe {} codewords, asked for {m}",
            stats.num_codewords()
        )));
    }
    let d = stats.dim();
    let d2m = 2 * d * m;
    let stx = stats.stx().to_owned();

    let mut rho = config.rho_init_dictionary;
    let mut e = match initial {
        Some(dictionary) => {
            if dictionary.shape() != (2 * d, d2m) {
                return Err(CdlError::shape(format!(
                    "initial dictionary has shape {:?}, expected {:?}",
                    dictionary.shape(),
                    (2 * d, d2m)
                )));
            }
            dictionary.flatten()
        }
        None => Array1::<f64>::zeros(d2m),
    };
    let mut w = Array1::<f64>::zeros(d2m);
    let mut factors = Factors::new(stats, rho)?;

    let mut info = AdmmDiagnostics::default();
    for t in 0..max_iter {
        info.iterations = t + 1;
        let rhs = &stx + &((&e - &w) * rho);
        let dict = factors.solve(&rhs, d, m)?;

        let e_old = e;
        e = project_unit_ball(&(&dict + &w).view(), m)?;
        w = w + &dict - &e;

        if t % config.checkup_interval != 0 {
            continue;
        }
        match checkup(config, &mut info, t, rho, &dict, &e, &e_old, &w) {
            Verdict::Converged => {
                info.converged = true;
                break;
            }
            Verdict::Rescale(factor) => {
                rho *= factor;
                w /= factor;
                factors = Factors::new(stats, rho)?;
            }
            Verdict::Continue => {}
        }
    }
    if !info.converged {
        warn!("dictionary solver did not converge in {max_iter} iterations");
    }
    Ok((BlockDiagonal::from_flat(&e.view(), m)?, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::block_diagonal;
    use approx::assert_abs_diff_eq;

    #[test]
    fn factorized_solve_matches_dense_system() {
        let (d, m, n) = (2, 2, 5);
        let a = Array2::from_shape_fn((2 * d * m, n), |(r, c)| ((r * 3 + c * 11) as f64 * 0.23).sin());
        let x = Array2::from_shape_fn((2 * d, n), |(r, c)| ((r * 2 + c) as f64 * 0.41).cos());
        let stats = EncodingStatistics::from_batch(&a.view(), &x.view()).unwrap();
        let rho = 0.3;
        let factors = Factors::new(&stats, rho).unwrap();
        let rhs = Array1::from_shape_fn(2 * d * m, |i| i as f64 - 3.0);
        let v = factors.solve(&rhs, d, m).unwrap();
        let system = stats.to_dense() + Array2::<f64>::eye(2 * d * m) * rho;
        assert_abs_diff_eq!(system.dot(&v), rhs, epsilon = 1e-9);
    }

    #[test]
    fn recovers_a_known_codeword() {
        // d = 2, m = 1; data generated exactly by a unit-norm codeword
        let truth = array![[0.6], [0.0], [0.0], [0.8]];
        let dictionary = block_diagonal(&truth.view()).unwrap();
        let a = Array2::from_shape_fn((4, 6), |(r, c)| ((r + 3 * c) as f64 * 0.7).sin() + 0.1);
        let x = dictionary.apply(&a.view()).unwrap();
        let stats = EncodingStatistics::from_batch(&a.view(), &x.view()).unwrap();

        let (fitted, info) = fit_dictionary(&stats, 1, 500, None, &AdmmConfig::default()).unwrap();
        assert!(info.converged, "{:?}", info.last());
        assert_abs_diff_eq!(fitted.columnar(), truth, epsilon = 1e-2);
        assert!(fitted.codeword_norms()[0] <= 1.0 + 1e-9);
    }

    #[test]
    fn codewords_stay_in_the_ball() {
        let (d, m, n) = (3, 2, 8);
        let a = Array2::from_shape_fn((2 * d * m, n), |(r, c)| ((r * 5 + c * 2) as f64 * 0.13).cos() * 0.1);
        let x = Array2::from_shape_fn((2 * d, n), |(r, c)| ((r + c) as f64).sin() * 10.0);
        let stats = EncodingStatistics::from_batch(&a.view(), &x.view()).unwrap();
        let (fitted, _) = fit_dictionary(&stats, m, 50, None, &AdmmConfig::default()).unwrap();
        assert!(fitted.codeword_norms().iter().all(|&n| n <= 1.0 + 1e-9));
    }

    #[test]
    fn non_finite_activations_fail_the_factorization() {
        let mut a = Array2::from_shape_fn((4, 3), |(r, c)| (r + c) as f64 * 0.5);
        a[[1, 2]] = f64::NAN;
        let x = Array2::<f64>::ones((2, 3));
        let stats = EncodingStatistics::from_batch(&a.view(), &x.view()).unwrap();
        let err = fit_dictionary(&stats, 2, 10, None, &AdmmConfig::default()).unwrap_err();
        assert!(matches!(err, CdlError::SingularSystem { .. }), "{err}");
    }

    #[test]
    fn non_finite_data_fails_the_solve() {
        let a = Array2::from_shape_fn((4, 3), |(r, c)| (r + c) as f64 * 0.5 + 0.1);
        let mut x = Array2::<f64>::ones((4, 3));
        x[[2, 0]] = f64::INFINITY;
        let stats = EncodingStatistics::from_batch(&a.view(), &x.view()).unwrap();
        assert!(stats.blocks().iter().all(|e| e.is_finite()));
        let err = fit_dictionary(&stats, 1, 10, None, &AdmmConfig::default()).unwrap_err();
        assert!(matches!(err, CdlError::SingularSystem { .. }), "{err}");
    }

    #[test]
    fn seed_shape_is_checked() {
        let a = Array2::<f64>::ones((4, 2));
        let x = Array2::<f64>::ones((2, 2));
        let stats = EncodingStatistics::from_batch(&a.view(), &x.view()).unwrap();
        let seed = block_diagonal(&array![[1.0], [0.0]].view()).unwrap();
        assert!(fit_dictionary(&stats, 2, 10, Some(&seed), &AdmmConfig::default()).is_err());
        assert!(fit_dictionary(&stats, 3, 10, None, &AdmmConfig::default()).is_err());
    }
}
