//! Left-truncated Gamma distribution of the coverage.
use super::{CoverageModel, WeightedObservations};
use crate::config::FitConfig;
use crate::error::{FitError, Result};
use crate::observation::Observation;
use crate::optimize::{brent, nelder_mead, Simplex};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::{gamma_ur, ln_gamma};

/// Log density of the Gamma distribution with shape `k` and scale `theta`,
/// conditioned on `x >= tp`. `x` should be at least `tp`, and `k`, `theta` positive.
/// Negative infinity if the mass above `tp` underflows.
pub fn ln_truncated_gamma(x: f64, k: f64, theta: f64, tp: f64) -> f64 {
    let upper_tail = upper_tail(k, theta, tp);
    if upper_tail <= 0.0 {
        return f64::NEG_INFINITY;
    }
    (k - 1.0) * x.ln() - x / theta - k * theta.ln() - ln_gamma(k) - upper_tail.ln()
}

// P(X >= tp) for X ~ Gamma(k, theta).
fn upper_tail(k: f64, theta: f64, tp: f64) -> f64 {
    let x = tp / theta;
    if x <= 0.0 {
        1.0
    } else if x.is_infinite() {
        0.0
    } else {
        gamma_ur(k, x)
    }
}

pub(crate) fn is_feasible(k: f64, theta: f64) -> bool {
    0.0 < k && 0.0 < theta && k.is_finite() && theta.is_finite()
}

/// Negative weighted log-likelihood of the informative positions.
/// Infeasible parameters are reported and rejected by +infinity.
fn neg_log_likelihood(data: &WeightedObservations, k: f64, theta: f64, tp: f64, min_coverage: f64) -> f64 {
    if !is_feasible(k, theta) {
        warn!(
            "Gamma parameters out of range: k={}, theta={}. Try a smaller simplex step.",
            k, theta
        );
        return f64::INFINITY;
    }
    -data.weighted_sum(min_coverage, |obs| {
        ln_truncated_gamma(obs.coverage, k, theta, tp)
    })
}

/// Minimize `objective` jointly over all the parameters by the simplex search,
/// checking the shape (`params[shape_idx]`) after every iteration.
/// If it left `bounds`, the shape is pinned to the violated bound and
/// the other parameters are refitted by a smaller simplex search.
/// Return the parameters and the objective value.
pub(crate) fn simplex_with_shape_band<F: Fn(&[f64]) -> f64>(
    objective: F,
    start: &[f64],
    shape_idx: usize,
    bounds: (f64, f64),
    config: &FitConfig,
) -> (Vec<f64>, f64) {
    let step = vec![config.simplex_step; start.len()];
    let mut simplex = Simplex::new(|xs: &[f64]| objective(xs), start, &step);
    let mut pinned = None;
    for _ in 0..config.max_iter_simplex {
        simplex.iterate();
        let converged = simplex.size() < config.simplex_tolerance;
        let (best, value) = simplex.best();
        trace!("SIMPLEX\t{}\t{:?}\t{}", simplex.iterations(), best, value);
        let shape = best[shape_idx];
        if shape < bounds.0 || bounds.1 < shape {
            let bound = if shape < bounds.0 { bounds.0 } else { bounds.1 };
            warn!(
                "Shape parameter {:.4} left [{},{}]. Fixed it to {} and refit the rest.",
                shape, bounds.0, bounds.1, bound
            );
            pinned = Some((best.to_vec(), bound));
            break;
        }
        if converged {
            break;
        }
    }
    match pinned {
        None => {
            let min = simplex.into_minimum();
            (min.argmin, min.value)
        }
        Some((mut best, bound)) => {
            best.remove(shape_idx);
            let with_shape = |xs: &[f64]| {
                let mut params = xs.to_vec();
                params.insert(shape_idx, bound);
                params
            };
            let step = vec![config.simplex_step; best.len()];
            let min = nelder_mead(
                |xs: &[f64]| objective(&with_shape(xs)),
                &best,
                &step,
                config.max_iter_simplex_fixed_shape,
                config.simplex_tolerance,
            );
            (with_shape(&min.argmin), min.value)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruncatedGamma {
    /// Shape
    pub k: f64,
    /// Scale
    pub theta: f64,
    /// Truncation point
    pub tp: f64,
}

impl TruncatedGamma {
    pub fn new(k: f64, theta: f64, tp: f64) -> Self {
        Self { k, theta, tp }
    }
    pub fn mean(&self) -> f64 {
        self.k * self.theta
    }
    /// Density at `x`. Exactly zero below the truncation point.
    pub fn pdf(&self, x: f64) -> f64 {
        if x < self.tp {
            0.0
        } else {
            ln_truncated_gamma(x, self.k, self.theta, self.tp).exp()
        }
    }
}

impl std::fmt::Display for TruncatedGamma {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "k={:.4}\ttheta={:.4}\ttp={}", self.k, self.theta, self.tp)
    }
}

impl CoverageModel for TruncatedGamma {
    fn truncation_point(&self) -> f64 {
        self.tp
    }
    fn shape(&self) -> f64 {
        self.k
    }
    fn density(&self, obs: &Observation, _config: &FitConfig) -> f64 {
        self.pdf(obs.coverage)
    }
    fn update_scale(&mut self, data: &WeightedObservations, config: &FitConfig) -> Result<()> {
        let (k, tp, thr) = (self.k, self.tp, config.min_coverage_to_fit);
        let (lower, upper) = config.theta_bounds;
        let min = brent(
            |theta| neg_log_likelihood(data, k, theta, tp, thr),
            lower,
            upper,
            config.max_iter_brent,
        );
        if !min.value.is_finite() {
            return Err(FitError::optimizer("gamma scale", min.value));
        }
        self.theta = min.argmin;
        Ok(())
    }
    fn update_shape(
        &mut self,
        data: &WeightedObservations,
        (lower, upper): (f64, f64),
        config: &FitConfig,
    ) -> Result<()> {
        let (theta, tp, thr) = (self.theta, self.tp, config.min_coverage_to_fit);
        let min = brent(
            |k| neg_log_likelihood(data, k, theta, tp, thr),
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
        let (tp, thr) = (self.tp, config.min_coverage_to_fit);
        let objective = |xs: &[f64]| neg_log_likelihood(data, xs[1], xs[0], tp, thr);
        let (params, value) =
            simplex_with_shape_band(objective, &[self.theta, self.k], 1, bounds, config);
        if !value.is_finite() {
            return Err(FitError::optimizer("gamma scale and shape", value));
        }
        self.theta = params[0];
        self.k = params[1];
        Ok(())
    }
    fn order(background: &mut Self, enriched: &mut Self, _config: &FitConfig) -> bool {
        if background.mean() > enriched.mean() {
            std::mem::swap(&mut background.theta, &mut enriched.theta);
            true
        } else {
            false
        }
    }
    fn converged(&self, prev: &Self, config: &FitConfig) -> bool {
        (self.theta - prev.theta).abs() <= config.gamma_theta_conv
            && (self.k - prev.k).abs() <= config.gamma_k_conv
    }
}
