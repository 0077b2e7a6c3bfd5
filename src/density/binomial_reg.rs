//! Zero-truncated Binomial whose success rate follows a logistic regression on the motif score.
//! Each motif group has its own coefficient, while the intercept is shared.
use super::binomial::ln_zero_truncated_binomial;
use super::{CountModel, WeightedObservations};
use crate::config::FitConfig;
use crate::error::{FitError, Result};
use crate::observation::{Observation, ObservationSet};
use crate::optimize::brent;
use serde::{Deserialize, Serialize};

// Keeps the success rate away from 0 and 1, where the logistic function saturates.
const P_EPS: f64 = 1e-12;

fn logistic(z: f64) -> f64 {
    (1.0 / (1.0 + (-z).exp())).max(P_EPS).min(1.0 - P_EPS)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressedBinomial {
    pub b0: f64,
    /// Coefficient of the motif score, one per motif group.
    pub coefficients: Vec<f64>,
}

impl RegressedBinomial {
    pub fn new(b0: f64, coefficients: Vec<f64>) -> Self {
        Self { b0, coefficients }
    }
    pub fn probability(&self, obs: &Observation) -> f64 {
        logistic(self.b0 + self.coefficients[obs.motif_id] * obs.motif_score)
    }
    fn neg_log_likelihood(&self, data: &WeightedObservations, group: Option<usize>, thr: f64) -> f64 {
        if !self.b0.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            warn!("Regression coefficients out of range: {}", self);
            return f64::INFINITY;
        }
        -data.weighted_sum(thr, |obs| match group {
            Some(g) if obs.motif_id != g => 0.0,
            _ => ln_zero_truncated_binomial(obs.count, obs.trials, self.probability(obs)),
        })
    }
}

impl std::fmt::Display for RegressedBinomial {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let coefs: Vec<_> = self.coefficients.iter().map(|c| format!("{:.4}", c)).collect();
        write!(f, "b0={:.4}\tcoefficients=[{}]", self.b0, coefs.join(","))
    }
}

impl CountModel for RegressedBinomial {
    fn density(&self, obs: &Observation) -> f64 {
        if obs.count == 0 {
            0.0
        } else {
            ln_zero_truncated_binomial(obs.count, obs.trials, self.probability(obs)).exp()
        }
    }
    /// Brent search on the intercept, then on each group's coefficient over the positions of that group.
    fn update(&mut self, data: &WeightedObservations, config: &FitConfig) -> Result<()> {
        let thr = config.min_coverage_to_fit;
        let (lower, upper) = config.regression_bounds;
        let mut trial = self.clone();
        let min = brent(
            |b0| {
                trial.b0 = b0;
                trial.neg_log_likelihood(data, None, thr)
            },
            lower,
            upper,
            config.max_iter_brent,
        );
        if !min.value.is_finite() {
            return Err(FitError::optimizer("logistic intercept", min.value));
        }
        self.b0 = min.argmin;
        for group in 0..self.coefficients.len() {
            let mut trial = self.clone();
            let min = brent(
                |c| {
                    trial.coefficients[group] = c;
                    trial.neg_log_likelihood(data, Some(group), thr)
                },
                lower,
                upper,
                config.max_iter_brent,
            );
            if !min.value.is_finite() {
                return Err(FitError::optimizer("motif coefficient", min.value));
            }
            self.coefficients[group] = min.argmin;
        }
        Ok(())
    }
    // Components are ordered by their intercepts, i.e., the success rate at motif score 0.
    fn order(non_crosslink: &mut Self, crosslink: &mut Self) -> bool {
        if non_crosslink.b0 > crosslink.b0 {
            std::mem::swap(non_crosslink, crosslink);
            true
        } else {
            false
        }
    }
    fn converged(&self, prev: &Self, config: &FitConfig) -> bool {
        let tol = config.regression_conv;
        (self.b0 - prev.b0).abs() <= tol
            && self
                .coefficients
                .iter()
                .zip(prev.coefficients.iter())
                .all(|(x, y)| (x - y).abs() <= tol)
    }
    fn check(&self, obs: &ObservationSet) -> Result<()> {
        let groups = obs.num_motifs();
        if self.coefficients.len() < groups {
            Err(FitError::Observation(format!(
                "{} motif groups in the observations, but {} coefficients in the model",
                groups,
                self.coefficients.len()
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::ZeroTruncatedBinomial;
    use crate::observation::Interval;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256StarStar;
    #[test]
    fn no_motif_equals_plain() {
        let reg = RegressedBinomial::new((0.3f64 / 0.7).ln(), vec![1.0, -2.0]);
        let plain = ZeroTruncatedBinomial::new(0.3);
        for count in 1..5 {
            let obs = Observation::new(1.0, count, 6.0).with_motif(1, 0.0);
            assert!((reg.density(&obs) - plain.density(&obs)).abs() < 1e-12);
        }
    }
    #[test]
    fn saturated_rate_is_finite() {
        let reg = RegressedBinomial::new(100.0, vec![0.0]);
        let obs = Observation::new(1.0, 3, 3.0);
        assert!(reg.density(&obs).is_finite());
        let obs = Observation::new(1.0, 1, 3.0);
        assert!(reg.density(&obs) >= 0.0);
    }
    #[test]
    fn recovers_coefficients() {
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(3290);
        let truth = RegressedBinomial::new(-1.0, vec![2.0, -1.0]);
        let trials = 8u32;
        let xs: Vec<_> = (0..3000)
            .filter_map(|i| {
                let obs = Observation::new(1.0, 0, trials as f64)
                    .with_motif(i % 2, rng.gen_range(0.0..1.5));
                let p = truth.probability(&obs);
                let count = (0..trials).filter(|_| rng.gen_bool(p)).count() as u32;
                Some(Observation { count, ..obs }).filter(|o| o.count > 0)
            })
            .collect();
        let obs = ObservationSet::new(vec![Interval::new(0, xs)], vec![]).unwrap();
        let data = WeightedObservations::from_fn(&obs, |_| 1.0);
        let config = FitConfig::default();
        let mut model = RegressedBinomial::new(0.0, vec![0.0, 0.0]);
        model.check(&obs).unwrap();
        for _ in 0..30 {
            model.update(&data, &config).unwrap();
        }
        assert!((model.b0 - truth.b0).abs() < 0.3, "{}", model);
        assert!((model.coefficients[0] - 2.0).abs() < 0.4, "{}", model);
        assert!((model.coefficients[1] + 1.0).abs() < 0.4, "{}", model);
    }
    #[test]
    fn check_groups() {
        let xs = vec![Observation::new(1.0, 1, 2.0).with_motif(3, 1.0)];
        let obs = ObservationSet::new(vec![Interval::new(0, xs)], vec![]).unwrap();
        assert!(RegressedBinomial::new(0.0, vec![0.0; 2]).check(&obs).is_err());
        assert!(RegressedBinomial::new(0.0, vec![0.0; 4]).check(&obs).is_ok());
    }
}
