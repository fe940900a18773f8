use serde::{Deserialize, Serialize};

use crate::error::{CdlError, Result};
use crate::regularizer::Regularizer;

/// Step-size and stopping parameters shared by both ADMM solvers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdmmConfig {
    /// Initial penalty for the encoder.
    pub rho_init_encoder: f64,
    /// Initial penalty for the dictionary solver.
    pub rho_init_dictionary: f64,
    pub rho_min: f64,
    pub rho_max: f64,
    pub abs_tol: f64,
    pub rel_tol: f64,
    /// Maximum tolerated ratio between primal and dual residuals.
    pub mu: f64,
    /// Factor applied to rho when the residuals drift apart by more than `mu`.
    pub tau: f64,
    /// Iterations between convergence tests.
    pub checkup_interval: usize,
}

impl Default for AdmmConfig {
    fn default() -> Self {
        AdmmConfig {
            rho_init_encoder: 2e-3,
            rho_init_dictionary: 2e-1,
            rho_min: 1e-6,
            rho_max: 1e6,
            abs_tol: 1e-4,
            rel_tol: 1e-3,
            mu: 1e1,
            tau: 2e0,
            checkup_interval: 5,
        }
    }
}

impl AdmmConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("rho_init_encoder", self.rho_init_encoder),
            ("rho_init_dictionary", self.rho_init_dictionary),
            ("rho_min", self.rho_min),
            ("rho_max", self.rho_max),
            ("abs_tol", self.abs_tol),
            ("rel_tol", self.rel_tol),
            ("mu", self.mu),
        ];
        for (name, value) in positive {
            if !(value > 0.0) || !value.is_finite() {
                return Err(CdlError::config(format!("{name} must be positive and finite, got {value}")));
            }
        }
        if !(self.tau > 1.0) {
            return Err(CdlError::config(format!("tau must exceed 1, got {}", self.tau)));
        }
        if self.rho_min >= self.rho_max {
            return Err(CdlError::config("rho_min must be below rho_max"));
        }
        if self.checkup_interval == 0 {
            return Err(CdlError::config("checkup_interval must be at least 1"));
        }
        Ok(())
    }
}

/// Parameters of the outer alternation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LearnConfig {
    pub regularizer: Regularizer,
    /// Number of alternation steps (mini-batches).
    pub max_steps: usize,
    /// Iteration budget of every ADMM sub-solve.
    pub max_admm_steps: usize,
    pub num_workers: usize,
    /// Columns per mini-batch; `None` uses the whole dataset every step.
    pub batch_size: Option<usize>,
    pub seed: Option<u64>,
    /// Replace codewords that collapse to zero with random data columns.
    pub patch_zero_codewords: bool,
    pub progress: bool,
    pub admm: AdmmConfig,
}

impl Default for LearnConfig {
    fn default() -> Self {
        LearnConfig {
            regularizer: Regularizer::default(),
            max_steps: 20,
            max_admm_steps: 200,
            num_workers: 1,
            batch_size: Some(64),
            seed: None,
            patch_zero_codewords: true,
            progress: false,
            admm: AdmmConfig::default(),
        }
    }
}

impl LearnConfig {
    pub fn from_json(document: &str) -> Result<Self> {
        let config: LearnConfig = serde_json::from_str(document)
            .map_err(|e| CdlError::config(format!("cannot parse learn configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.admm.validate()?;
        self.regularizer.validate()?;
        if self.max_steps == 0 || self.max_admm_steps == 0 {
            return Err(CdlError::config("step budgets must be at least 1"));
        }
        if self.batch_size == Some(0) {
            return Err(CdlError::config("batch_size must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(LearnConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = LearnConfig::from_json(
            r#"{"regularizer": {"reg": "l2_group", "lambda": 0.5}, "max_steps": 3, "seed": 7}"#,
        )
        .unwrap();
        assert_eq!(config.max_steps, 3);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.max_admm_steps, 200);
        assert_eq!(config.regularizer, Regularizer::L2Group { lambda: 0.5 });
        assert_eq!(config.admm, AdmmConfig::default());
    }

    #[test]
    fn unknown_regularizer_is_a_configuration_error() {
        let err = LearnConfig::from_json(r#"{"regularizer": {"reg": "l0"}}"#).unwrap_err();
        assert!(matches!(err, CdlError::Configuration(_)));
    }

    #[test]
    fn misspelled_keys_are_rejected() {
        let err = LearnConfig::from_json(r#"{"max_step": 3}"#).unwrap_err();
        assert!(matches!(err, CdlError::Configuration(_)), "{err}");
        let err = LearnConfig::from_json(r#"{"admm": {"rho_maximum": 10.0}}"#).unwrap_err();
        assert!(matches!(err, CdlError::Configuration(_)), "{err}");
    }

    #[test]
    fn rejects_bad_tau() {
        let admm = AdmmConfig { tau: 1.0, ..AdmmConfig::default() };
        assert!(admm.validate().is_err());
    }
}
