use log::warn;
use ndarray::*;

use crate::admm::{checkup, AdmmDiagnostics, Verdict};
use crate::blocks::BlockDiagonal;
use crate::config::AdmmConfig;
use crate::error::{CdlError, Result};
use crate::regularizer::Proximal;

/// Ridge step of the encoder.
///
/// Solves `(D'D + rho I) a = b` through the Woodbury identity. `D D'` is
/// diagonal for a block dictionary, so the only inverse needed is
/// `inv = (1 + diag(D D') / rho)^-1`, which changes only with `rho`.
fn ridge(dictionary: &BlockDiagonal, b: &Array2<f64>, inv: &Array1<f64>, rho: f64) -> Result<Array2<f64>> {
    let db = dictionary.apply(&b.view())?;
    let scaled = db * &inv.view().insert_axis(Axis(1));
    let correction = dictionary.apply_transpose(&scaled.view())?;
    Ok((b - &(correction / rho)) / rho)
}

fn ridge_inverse(gram: &Array1<f64>, rho: f64) -> Array1<f64> {
    gram.mapv(|g| 1.0 / (1.0 + g / rho))
}

/// Sparse-codes the columns of `x` (`2d x n`) against `dictionary`.
///
/// Returns the constrained activations `Z` (`2dm x n`) and the solve
/// diagnostics.
pub fn encode(
    x: &ArrayView2<'_, f64>,
    dictionary: &BlockDiagonal,
    prox: &Proximal,
    max_iter: usize,
    config: &AdmmConfig,
) -> Result<(Array2<f64>, AdmmDiagnostics)> {
    let (d2, d2m) = dictionary.shape();
    if x.nrows() != d2 {
        return Err(CdlError::shape(format!("data has {} rows, dictionary expects {d2}", x.nrows())));
    }
    if prox.dim() != dictionary.dim() || prox.num_codewords() != dictionary.num_codewords() {
        return Err(CdlError::shape(format!(
            "regularizer is bound to {} codewords of length {}, dictionary has {} of length {}",
            prox.num_codewords(),
            prox.dim(),
            dictionary.num_codewords(),
            dictionary.dim()
        )));
    }
    let n = x.ncols();

    let mut z = Array2::<f64>::zeros((d2m, n));
    let mut o = Array2::<f64>::zeros((d2m, n));
    let mut rho = config.rho_init_encoder;

    let dx = dictionary.apply_transpose(x)?;
    let gram = dictionary.gram_diagonal();
    let mut inv = ridge_inverse(&gram, rho);

    let mut info = AdmmDiagnostics::default();
    for t in 0..max_iter {
        info.iterations = t + 1;
        let b = &dx + &((&z - &o) * rho);
        let a = ridge(dictionary, &b, &inv, rho)?;

        let z_old = z;
        z = prox.apply(&(&a + &o).view(), rho)?;
        o = o + &a - &z;

        if t % config.checkup_interval != 0 {
            continue;
        }
        match checkup(config, &mut info, t, rho, &a, &z, &z_old, &o) {
            Verdict::Converged => {
                info.converged = true;
                break;
            }
            Verdict::Rescale(factor) => {
                rho *= factor;
                o /= factor;
                inv = ridge_inverse(&gram, rho);
            }
            Verdict::Continue => {}
        }
    }
    if !info.converged {
        warn!("encoder did not converge in {max_iter} iterations ({n} signals)");
    }
    Ok((z, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::block_diagonal;
    use crate::regularizer::Regularizer;
    use approx::assert_abs_diff_eq;

    #[test]
    fn ridge_matches_direct_solve() {
        // d = 1, m = 2: D'D + rho I is 4 x 4 and easy to invert by hand
        // through the Woodbury form; compare against the normal equations.
        let dictionary = block_diagonal(&array![[0.6, 0.0], [0.8, 1.0]].view()).unwrap();
        let rho = 0.5;
        let b = array![[1.0], [-2.0], [0.5], [3.0]];
        let inv = ridge_inverse(&dictionary.gram_diagonal(), rho);
        let a = ridge(&dictionary, &b, &inv, rho).unwrap();
        let dense = dictionary.to_dense();
        let lhs = dense.t().dot(&dense) + Array2::<f64>::eye(4) * rho;
        assert_abs_diff_eq!(lhs.dot(&a), b, epsilon = 1e-10);
    }

    #[test]
    fn toy_system_converges_inside_the_least_squares_solution() {
        let dictionary = block_diagonal(&array![[1.0], [0.0]].view()).unwrap();
        let prox = Regularizer::L1Real { lambda: 1e-3, nonneg: false }.prepare(1, 1).unwrap();
        let x = array![[1.0], [0.0]];
        let (a, info) = encode(&x.view(), &dictionary, &prox, 200, &AdmmConfig::default()).unwrap();
        assert!(info.converged);
        assert!(info.iterations <= 200);
        assert!(a[[0, 0]] > 0.0 && a[[0, 0]] < 1.0, "activation {}", a[[0, 0]]);
        assert_abs_diff_eq!(a[[0, 0]], 1.0 - 1e-3, epsilon = 1e-3);
        assert_eq!(a[[1, 0]], 0.0);
    }

    #[test]
    fn strong_penalty_silences_everything() {
        let dictionary = block_diagonal(&array![[1.0, 0.0], [0.0, 1.0]].view()).unwrap();
        let prox = Regularizer::L2Group { lambda: 100.0 }.prepare(1, 2).unwrap();
        let x = array![[0.1, -0.2], [0.05, 0.0]];
        let (a, _) = encode(&x.view(), &dictionary, &prox, 50, &AdmmConfig::default()).unwrap();
        assert!(a.iter().all(|&e| e == 0.0));
    }

    #[test]
    fn exhausting_the_budget_is_not_an_error() {
        let dictionary = block_diagonal(&array![[1.0], [0.5]].view()).unwrap();
        let prox = Regularizer::L1Complex { lambda: 1e-3 }.prepare(1, 1).unwrap();
        let x = array![[1.0, 0.3], [-0.4, 2.0]];
        let (a, info) = encode(&x.view(), &dictionary, &prox, 1, &AdmmConfig::default()).unwrap();
        assert_eq!(info.iterations, 1);
        assert_eq!(info.checkups.len(), 1);
        assert_eq!(a.dim(), (2, 2));
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let dictionary = block_diagonal(&array![[1.0], [0.0]].view()).unwrap();
        let prox = Regularizer::L2Group { lambda: 0.1 }.prepare(1, 2).unwrap();
        let x = array![[1.0], [0.0]];
        assert!(encode(&x.view(), &dictionary, &prox, 10, &AdmmConfig::default()).is_err());
        let prox = Regularizer::L2Group { lambda: 0.1 }.prepare(1, 1).unwrap();
        let x = array![[1.0], [0.0], [2.0], [1.0]];
        assert!(matches!(
            encode(&x.view(), &dictionary, &prox, 10, &AdmmConfig::default()),
            Err(CdlError::Shape { .. })
        ));
    }
}
