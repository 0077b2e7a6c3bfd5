//! Truncated Gamma whose scale depends on a covariate by `theta = exp(b0 + b1 * x)`.
use super::gamma::{is_feasible, ln_truncated_gamma, simplex_with_shape_band};
use super::{CoverageModel, WeightedObservations};
use crate::config::FitConfig;
use crate::error::{FitError, Result};
use crate::observation::Observation;
use crate::optimize::{brent, nelder_mead};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressedGamma {
    pub b0: f64,
    pub b1: f64,
    /// Shape, shared by all the positions.
    pub k: f64,
    pub tp: f64,
}

fn scale(b0: f64, b1: f64, x: f64) -> f64 {
    (b0 + b1 * x).exp()
}

fn neg_log_likelihood(
    data: &WeightedObservations,
    (b0, b1, k): (f64, f64, f64),
    tp: f64,
    config: &FitConfig,
) -> f64 {
    if !(0.0 < k && k.is_finite() && b0.is_finite() && b1.is_finite()) {
        warn!(
            "Regression parameters out of range: b0={}, b1={}, k={}. Try a smaller simplex step.",
            b0, b1, k
        );
        return f64::INFINITY;
    }
    let min_predictor = config.min_predictor;
    -data.weighted_sum(config.min_coverage_to_fit, |obs| {
        let theta = scale(b0, b1, obs.predictor.max(min_predictor));
        if is_feasible(k, theta) {
            ln_truncated_gamma(obs.coverage, k, theta, tp)
        } else {
            f64::NEG_INFINITY
        }
    })
}

impl RegressedGamma {
    pub fn new(b0: f64, b1: f64, k: f64, tp: f64) -> Self {
        Self { b0, b1, k, tp }
    }
    /// Scale at covariate `x`, after clamping `x` by `min_predictor`.
    pub fn theta(&self, x: f64, min_predictor: f64) -> f64 {
        scale(self.b0, self.b1, x.max(min_predictor))
    }
    pub fn mean(&self, x: f64, min_predictor: f64) -> f64 {
        self.k * self.theta(x, min_predictor)
    }
}

impl std::fmt::Display for RegressedGamma {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "b0={:.4}\tb1={:.4}\tk={:.4}\ttp={}",
            self.b0, self.b1, self.k, self.tp
        )
    }
}

impl CoverageModel for RegressedGamma {
    fn truncation_point(&self) -> f64 {
        self.tp
    }
    fn shape(&self) -> f64 {
        self.k
    }
    fn density(&self, obs: &Observation, config: &FitConfig) -> f64 {
        if obs.coverage < self.tp {
            return 0.0;
        }
        let theta = self.theta(obs.predictor, config.min_predictor);
        ln_truncated_gamma(obs.coverage, self.k, theta, self.tp).exp()
    }
    fn update_scale(&mut self, data: &WeightedObservations, config: &FitConfig) -> Result<()> {
        let (k, tp) = (self.k, self.tp);
        let step = [config.simplex_step; 2];
        let min = nelder_mead(
            |xs: &[f64]| neg_log_likelihood(data, (xs[0], xs[1], k), tp, config),
            &[self.b0, self.b1],
            &step,
            config.max_iter_simplex,
            config.simplex_tolerance,
        );
        if !min.value.is_finite() {
            return Err(FitError::optimizer("regression coefficients of the scale", min.value));
        }
        self.b0 = min.argmin[0];
        self.b1 = min.argmin[1];
        Ok(())
    }
    fn update_shape(
        &mut self,
        data: &WeightedObservations,
        (lower, upper): (f64, f64),
        config: &FitConfig,
    ) -> Result<()> {
        let (b0, b1, tp) = (self.b0, self.b1, self.tp);
        let min = brent(
            |k| neg_log_likelihood(data, (b0, b1, k), tp, config),
            lower,
            upper,
            config.max_iter_brent,
        );
        if !min.value.is_finite() {
            return Err(FitError::optimizer("gamma shape", min.value));
        }
        self.k = min.argmin;
        Ok(())
    }
    fn update_joint(
        &mut self,
        data: &WeightedObservations,
        bounds: (f64, f64),
        config: &FitConfig,
    ) -> Result<()> {
        let tp = self.tp;
        let objective = |xs: &[f64]| neg_log_likelihood(data, (xs[0], xs[1], xs[2]), tp, config);
        let start = [self.b0, self.b1, self.k];
        let (params, value) = simplex_with_shape_band(objective, &start, 2, bounds, config);
        if !value.is_finite() {
            return Err(FitError::optimizer("regression coefficients and shape", value));
        }
        self.b0 = params[0];
        self.b1 = params[1];
        self.k = params[2];
        Ok(())
    }
    // Means are compared at the smallest covariate value.
    fn order(background: &mut Self, enriched: &mut Self, config: &FitConfig) -> bool {
        let x = config.min_predictor;
        if background.mean(x, x) > enriched.mean(x, x) {
            std::mem::swap(&mut background.b0, &mut enriched.b0);
            std::mem::swap(&mut background.b1, &mut enriched.b1);
            true
        } else {
            false
        }
    }
    fn converged(&self, prev: &Self, config: &FitConfig) -> bool {
        (self.b0 - prev.b0).abs() <= config.regression_conv
            && (self.b1 - prev.b1).abs() <= config.regression_conv
            && (self.k - prev.k).abs() <= config.gamma_k_conv
    }
}
