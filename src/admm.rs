//! Convergence bookkeeping shared by the encoder and the dictionary solver.

use log::debug;
use ndarray::*;
use ndarray_linalg::Norm;
use serde::{Deserialize, Serialize};

use crate::config::AdmmConfig;

/// One convergence test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Checkup {
    pub iteration: usize,
    pub err_primal: f64,
    pub err_dual: f64,
    pub eps_primal: f64,
    pub eps_dual: f64,
    pub rho: f64,
}

/// Per-solve record. Non-convergence is reported here, never as an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmmDiagnostics {
    pub converged: bool,
    /// Iterations actually performed.
    pub iterations: usize,
    pub checkups: Vec<Checkup>,
}

impl AdmmDiagnostics {
    pub fn last(&self) -> Option<&Checkup> {
        self.checkups.last()
    }
}

/// What the solver must do after a checkup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Verdict {
    Converged,
    /// Multiply rho by the factor and divide the scaled dual by it.
    Rescale(f64),
    Continue,
}

/// Residuals of one checkup: `primal` is the unconstrained iterate, `split`
/// the constrained one before (`split_old`) and after this iteration, and
/// `dual` the scaled dual variable.
pub(crate) fn checkup<D: Dimension>(
    config: &AdmmConfig,
    diagnostics: &mut AdmmDiagnostics,
    iteration: usize,
    rho: f64,
    primal: &Array<f64, D>,
    split: &Array<f64, D>,
    split_old: &Array<f64, D>,
    dual: &Array<f64, D>,
) -> Verdict {
    let err_primal = (primal - split).norm_l2();
    let err_dual = rho * (split - split_old).norm_l2();
    let eps_primal = (primal.len() as f64).sqrt() * config.abs_tol
        + config.rel_tol * primal.norm_l2().max(split.norm_l2());
    let eps_dual = (dual.len() as f64).sqrt() * config.abs_tol + config.rel_tol * dual.norm_l2();

    debug!(
        "admm t={iteration:4} r={err_primal:.3e}/{eps_primal:.3e} s={err_dual:.3e}/{eps_dual:.3e} rho={rho:.3e}"
    );
    diagnostics.checkups.push(Checkup { iteration, err_primal, err_dual, eps_primal, eps_dual, rho });

    if err_primal < eps_primal && err_dual <= eps_dual {
        Verdict::Converged
    } else if err_primal > config.mu * err_dual && rho * config.tau < config.rho_max {
        Verdict::Rescale(config.tau)
    } else if err_dual > config.mu * err_primal && rho / config.tau > config.rho_min {
        Verdict::Rescale(1.0 / config.tau)
    } else {
        Verdict::Continue
    }
}
