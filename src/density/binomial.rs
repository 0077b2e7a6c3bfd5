//! Zero-truncated Binomial distribution of the read-start counts.
use super::{CountModel, WeightedObservations};
use crate::config::FitConfig;
use crate::error::{FitError, Result};
use crate::observation::Observation;
use crate::optimize::brent;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

/// Log probability of `count` successes out of `trials` with success rate `p`, given `count > 0`.
/// `trials` is a real-valued estimate and is raised to `count` if smaller.
pub fn ln_zero_truncated_binomial(count: u32, trials: f64, p: f64) -> f64 {
    let k = count as f64;
    let n = trials.max(k);
    let ln_choose = ln_gamma(n + 1.0) - ln_gamma(k + 1.0) - ln_gamma(n - k + 1.0);
    // 1 - (1-p)^n
    let positive = -(n * (-p).ln_1p()).exp_m1();
    ln_choose + k * p.ln() + (n - k) * (-p).ln_1p() - positive.ln()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZeroTruncatedBinomial {
    pub p: f64,
}

impl ZeroTruncatedBinomial {
    pub fn new(p: f64) -> Self {
        Self { p }
    }
}

impl std::fmt::Display for ZeroTruncatedBinomial {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "p={:.5}", self.p)
    }
}

impl CountModel for ZeroTruncatedBinomial {
    fn density(&self, obs: &Observation) -> f64 {
        if obs.count == 0 {
            0.0
        } else {
            ln_zero_truncated_binomial(obs.count, obs.trials, self.p).exp()
        }
    }
    fn update(&mut self, data: &WeightedObservations, config: &FitConfig) -> Result<()> {
        let thr = config.min_coverage_to_fit;
        let nll = |p: f64| {
            if !(0.0 < p && p < 1.0) {
                warn!("Binomial success rate out of range: p={}", p);
                return f64::INFINITY;
            }
            -data.weighted_sum(thr, |obs| {
                ln_zero_truncated_binomial(obs.count, obs.trials, p)
            })
        };
        let (lower, upper) = config.binomial_p_bounds;
        let min = brent(nll, lower, upper, config.max_iter_brent);
        if !min.value.is_finite() {
            return Err(FitError::optimizer("binomial success rate", min.value));
        }
        self.p = min.argmin;
        Ok(())
    }
    fn order(non_crosslink: &mut Self, crosslink: &mut Self) -> bool {
        if non_crosslink.p > crosslink.p {
            std::mem::swap(non_crosslink, crosslink);
            true
        } else {
            false
        }
    }
    fn converged(&self, prev: &Self, config: &FitConfig) -> bool {
        (self.p - prev.p).abs() <= config.binomial_p_conv
    }
}
