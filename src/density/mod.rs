//! Emission densities of the four hidden states.
//! A state is a pair of a coverage component (background/enriched)
//! and a count component (non-crosslink/crosslink), and its emission probability is
//! the product of the two component densities.
use crate::config::FitConfig;
use crate::error::{EmissionDiagnostic, Result};
use crate::observation::{Observation, ObservationSet, Strand};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub mod binomial;
pub mod binomial_reg;
pub mod gamma;
pub mod gamma_reg;
pub use binomial::ZeroTruncatedBinomial;
pub use binomial_reg::RegressedBinomial;
pub use gamma::TruncatedGamma;
pub use gamma_reg::RegressedGamma;

/// A density of the (smoothed) coverage.
pub trait CoverageModel: Clone + Send + Sync + std::fmt::Debug + std::fmt::Display {
    /// Coverage below this value has zero density.
    fn truncation_point(&self) -> f64;
    fn shape(&self) -> f64;
    fn density(&self, obs: &Observation, config: &FitConfig) -> f64;
    /// Update the scale (or its regression coefficients), holding the shape.
    fn update_scale(&mut self, data: &WeightedObservations, config: &FitConfig) -> Result<()>;
    /// Update the shape within `bounds`, holding the scale.
    fn update_shape(
        &mut self,
        data: &WeightedObservations,
        bounds: (f64, f64),
        config: &FitConfig,
    ) -> Result<()>;
    /// Update scale and shape at once by the simplex search.
    /// If the shape leaves `bounds`, it is pinned to the violated bound and the scale is refitted.
    fn update_joint(
        &mut self,
        data: &WeightedObservations,
        bounds: (f64, f64),
        config: &FitConfig,
    ) -> Result<()>;
    /// Make the mean of `background` not larger than that of `enriched` by swapping scales.
    /// Return true if swapped.
    fn order(background: &mut Self, enriched: &mut Self, config: &FitConfig) -> bool;
    fn converged(&self, prev: &Self, config: &FitConfig) -> bool;
    /// Check that every observation can be evaluated by this model.
    fn check(&self, _obs: &ObservationSet) -> Result<()> {
        Ok(())
    }
}

/// A density of the positive read-start counts.
pub trait CountModel: Clone + Send + Sync + std::fmt::Debug + std::fmt::Display {
    /// Density of the count. Zero if the count is zero.
    fn density(&self, obs: &Observation) -> f64;
    fn update(&mut self, data: &WeightedObservations, config: &FitConfig) -> Result<()>;
    /// Make `non_crosslink` not more likely to produce counts than `crosslink`. Return true if swapped.
    fn order(non_crosslink: &mut Self, crosslink: &mut Self) -> bool;
    fn converged(&self, prev: &Self, config: &FitConfig) -> bool;
    fn check(&self, _obs: &ObservationSet) -> Result<()> {
        Ok(())
    }
}

/// Responsibility-weighted view of the observations.
/// Weights are laid out in the same way as the observations: strand, interval, position.
#[derive(Debug, Clone)]
pub struct WeightedObservations<'a> {
    observations: &'a ObservationSet,
    weights: [Vec<Vec<f64>>; 2],
}

impl<'a> WeightedObservations<'a> {
    pub fn new(observations: &'a ObservationSet, weights: [Vec<Vec<f64>>; 2]) -> Self {
        for strand in Strand::BOTH.iter() {
            let intervals = observations.strand(*strand);
            let ws = &weights[strand.index()];
            assert_eq!(intervals.len(), ws.len());
            for (interval, w) in intervals.iter().zip(ws.iter()) {
                assert_eq!(interval.len(), w.len());
            }
        }
        Self {
            observations,
            weights,
        }
    }
    /// Weight each position by `f(observation)`.
    pub fn from_fn<F: Fn(&Observation) -> f64>(observations: &'a ObservationSet, f: F) -> Self {
        let mut weights = [vec![], vec![]];
        for strand in Strand::BOTH.iter() {
            weights[strand.index()] = observations
                .strand(*strand)
                .iter()
                .map(|interval| interval.observations.iter().map(|obs| f(obs)).collect())
                .collect();
        }
        Self::new(observations, weights)
    }
    pub fn observations(&self) -> &ObservationSet {
        self.observations
    }
    /// Sum of `weight * f(observation)` over the informative positions with positive weight.
    /// Intervals are summed up in parallel and the partial sums are added serially.
    pub fn weighted_sum<F>(&self, min_coverage: f64, f: F) -> f64
    where
        F: Fn(&Observation) -> f64 + Sync,
    {
        let mut total = 0f64;
        for strand in Strand::BOTH.iter() {
            let partials: Vec<f64> = self
                .observations
                .strand(*strand)
                .par_iter()
                .zip(self.weights[strand.index()].par_iter())
                .map(|(interval, ws)| {
                    interval
                        .observations
                        .iter()
                        .zip(ws.iter())
                        .filter(|&(obs, &w)| 0.0 < w && obs.is_informative(min_coverage))
                        .map(|(obs, w)| w * f(obs))
                        .sum::<f64>()
                })
                .collect();
            total += partials.iter().sum::<f64>();
        }
        total
    }
}

/// Density of the four states at a position, in the order of
/// (background, non-crosslink), (background, crosslink), (enriched, non-crosslink), (enriched, crosslink).
pub type StateProbs = [f64; 4];

/// The four component densities of the hidden states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionModel<C, B> {
    pub background: C,
    pub enriched: C,
    pub non_crosslink: B,
    pub crosslink: B,
}

pub type PlainModel = EmissionModel<TruncatedGamma, ZeroTruncatedBinomial>;
pub type MotifModel = EmissionModel<TruncatedGamma, RegressedBinomial>;
pub type CovariateModel = EmissionModel<RegressedGamma, ZeroTruncatedBinomial>;
pub type FullRegressionModel = EmissionModel<RegressedGamma, RegressedBinomial>;

/// Which component pair is re-estimated in the M-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearnMode {
    Coverage,
    Counts,
}

impl<C: CoverageModel, B: CountModel> EmissionModel<C, B> {
    pub fn new(background: C, enriched: C, non_crosslink: B, crosslink: B) -> Self {
        Self {
            background,
            enriched,
            non_crosslink,
            crosslink,
        }
    }
    pub fn check(&self, obs: &ObservationSet) -> Result<()> {
        self.background.check(obs)?;
        self.enriched.check(obs)?;
        self.non_crosslink.check(obs)?;
        self.crosslink.check(obs)
    }
    /// Component densities at `obs`: ([background, enriched], [non-crosslink, crosslink]).
    /// Coverage below the truncation point is always background,
    /// zero counts are always non-crosslink.
    pub fn components(&self, obs: &Observation, config: &FitConfig) -> ([f64; 2], [f64; 2]) {
        let coverage = if obs.coverage >= self.background.truncation_point() {
            [
                self.background.density(obs, config),
                self.enriched.density(obs, config),
            ]
        } else {
            [1.0, 0.0]
        };
        let count = if obs.count > 0 {
            [
                self.non_crosslink.density(obs),
                self.crosslink.density(obs),
            ]
        } else {
            [1.0, 0.0]
        };
        (coverage, count)
    }
    pub fn state_probs(&self, obs: &Observation, config: &FitConfig) -> StateProbs {
        let ([g1, g2], [b1, b2]) = self.components(obs, config);
        [g1 * b1, g1 * b2, g2 * b1, g2 * b2]
    }
    pub fn diagnose(&self, obs: &Observation, config: &FitConfig) -> EmissionDiagnostic {
        let (coverage_densities, count_densities) = self.components(obs, config);
        EmissionDiagnostic {
            coverage: obs.coverage,
            count: obs.count,
            trials: obs.trials,
            predictor: obs.predictor,
            motif_id: obs.motif_id,
            motif_score: obs.motif_score,
            coverage_densities,
            count_densities,
        }
    }
    /// Refit the coverage components. `background` and `enriched` carry the responsibilities
    /// of states {0,1} and {2,3} respectively.
    pub fn update_coverage(
        &mut self,
        background: &WeightedObservations,
        enriched: &WeightedObservations,
        config: &FitConfig,
    ) -> Result<()> {
        if config.joint_optimization {
            self.background
                .update_joint(background, config.background_shape_bounds, config)?;
            let bounds = self.enriched_shape_bounds(config);
            self.enriched.update_joint(enriched, bounds, config)?;
            self.order_coverage(config);
        } else {
            self.background.update_scale(background, config)?;
            self.enriched.update_scale(enriched, config)?;
            self.order_coverage(config);
            self.background
                .update_shape(background, config.background_shape_bounds, config)?;
            let bounds = self.enriched_shape_bounds(config);
            self.enriched.update_shape(enriched, bounds, config)?;
        }
        Ok(())
    }
    fn enriched_shape_bounds(&self, config: &FitConfig) -> (f64, f64) {
        let (lower, upper) = config.enriched_shape_bounds;
        if config.ordered_shapes {
            let lower = lower.max(self.background.shape());
            // The band must not be empty.
            (lower.min(upper), upper)
        } else {
            (lower, upper)
        }
    }
    fn order_coverage(&mut self, config: &FitConfig) {
        if C::order(&mut self.background, &mut self.enriched, config) {
            warn!("The background coverage component had the larger mean. Swapped the scales.");
            debug!("Background:{}", self.background);
            debug!("Enriched:{}", self.enriched);
        }
    }
    /// Refit the count components. `non_crosslink` and `crosslink` carry the responsibilities
    /// of states 2 and 3 respectively.
    pub fn update_counts(
        &mut self,
        non_crosslink: &WeightedObservations,
        crosslink: &WeightedObservations,
        config: &FitConfig,
    ) -> Result<()> {
        self.non_crosslink.update(non_crosslink, config)?;
        self.crosslink.update(crosslink, config)?;
        if B::order(&mut self.non_crosslink, &mut self.crosslink) {
            warn!("The non-crosslink count component had the larger success rate. Swapped.");
        }
        Ok(())
    }
    /// True if the components refitted under `mode` moved less than the tolerances.
    pub fn converged(&self, prev: &Self, mode: LearnMode, config: &FitConfig) -> bool {
        match mode {
            LearnMode::Coverage => {
                self.background.converged(&prev.background, config)
                    && self.enriched.converged(&prev.enriched, config)
            }
            LearnMode::Counts => {
                self.non_crosslink.converged(&prev.non_crosslink, config)
                    && self.crosslink.converged(&prev.crosslink, config)
            }
        }
    }
}

impl<C: CoverageModel, B: CountModel> std::fmt::Display for EmissionModel<C, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "Background\t{}", self.background)?;
        writeln!(f, "Enriched\t{}", self.enriched)?;
        writeln!(f, "NonCrosslink\t{}", self.non_crosslink)?;
        write!(f, "Crosslink\t{}", self.crosslink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Interval;
    fn model() -> PlainModel {
        EmissionModel::new(
            TruncatedGamma::new(1.0, 0.5, 0.05),
            TruncatedGamma::new(2.0, 2.0, 0.05),
            ZeroTruncatedBinomial::new(0.05),
            ZeroTruncatedBinomial::new(0.5),
        )
    }
    #[test]
    fn state_probs_are_products() {
        let config = FitConfig::default();
        let model = model();
        for &(coverage, count) in &[(0.01, 0), (0.1, 0), (0.3, 1), (4.0, 3), (12.0, 5)] {
            let obs = Observation::new(coverage, count, 5.0);
            let probs = model.state_probs(&obs, &config);
            assert!(probs.iter().all(|&p| p >= 0.0 && p.is_finite()));
            let ([g1, g2], [b1, b2]) = model.components(&obs, &config);
            let sum: f64 = probs.iter().sum();
            let swapped = b1 * g1 + b2 * g1 + b1 * g2 + b2 * g2;
            assert!((sum - swapped).abs() < 1e-12);
            assert!((sum - (g1 + g2) * (b1 + b2)).abs() < 1e-12);
        }
    }
    #[test]
    fn zero_count_and_low_coverage() {
        let config = FitConfig::default();
        let model = model();
        let probs = model.state_probs(&Observation::new(3.0, 0, 5.0), &config);
        assert_eq!(probs[1], 0.0);
        assert_eq!(probs[3], 0.0);
        assert!(probs[0] > 0.0 && probs[2] > 0.0);
        let probs = model.state_probs(&Observation::new(0.01, 2, 5.0), &config);
        assert_eq!(probs[2], 0.0);
        assert_eq!(probs[3], 0.0);
        assert!(probs[0] > 0.0 && probs[1] > 0.0);
    }
    #[test]
    fn weighted_sum_filters() {
        let xs = vec![
            Observation::new(1.0, 1, 2.0),
            Observation::new(2.0, 0, 2.0),
            Observation::new(0.1, 1, 2.0),
            Observation::new(4.0, 2, 2.0),
        ];
        let ys = vec![Observation::new(3.0, 1, 2.0)];
        let obs = ObservationSet::new(vec![Interval::new(0, xs)], vec![Interval::new(5, ys)])
            .unwrap();
        let data = WeightedObservations::from_fn(&obs, |o| if o.coverage > 3.5 { 0.0 } else { 0.5 });
        let sum = data.weighted_sum(0.5, |o| o.coverage);
        // 1.0 and 3.0 contribute; 2.0 has no count, 0.1 is low, 4.0 has no weight.
        assert!((sum - 2.0).abs() < 1e-12, "{}", sum);
    }
    // A narrow cluster around 0.5, which wants a large shape,
    // and a spread-out tail, which wants a small one.
    fn narrow_and_wide() -> ObservationSet {
        let narrow = (0..=10).map(|i| 0.45 + 0.01 * i as f64);
        let wide = vec![0.8, 1.5, 3.0, 6.0, 12.0, 24.0];
        let xs: Vec<_> = narrow
            .chain(wide)
            .map(|x| Observation::new(x, 1, 5.0))
            .collect();
        ObservationSet::new(vec![Interval::new(0, xs)], vec![]).unwrap()
    }
    #[test]
    fn enriched_shape_is_bounded_by_background() {
        let obs = narrow_and_wide();
        let low = WeightedObservations::from_fn(&obs, |o| if o.coverage < 0.7 { 1.0 } else { 0.0 });
        let high = WeightedObservations::from_fn(&obs, |o| if o.coverage < 0.7 { 0.0 } else { 1.0 });
        let start = EmissionModel::new(
            TruncatedGamma::new(8.0, 0.0625, 0.05),
            TruncatedGamma::new(2.0, 4.0, 0.05),
            ZeroTruncatedBinomial::new(0.05),
            ZeroTruncatedBinomial::new(0.5),
        );
        let unordered = FitConfig {
            ordered_shapes: false,
            ..Default::default()
        };
        let mut model = start.clone();
        model.update_coverage(&low, &high, &unordered).unwrap();
        assert!(model.enriched.k < model.background.k, "{}", model);
        let ordered = FitConfig {
            ordered_shapes: true,
            ..Default::default()
        };
        let mut model = start;
        model.update_coverage(&low, &high, &ordered).unwrap();
        assert!(model.enriched.k >= model.background.k, "{}", model);
        assert!(model.background.mean() < model.enriched.mean());
    }
    #[test]
    fn joint_shape_is_pinned_to_lower_bound() {
        let obs = narrow_and_wide();
        let high = WeightedObservations::from_fn(&obs, |o| if o.coverage < 0.7 { 0.0 } else { 1.0 });
        let config = FitConfig {
            simplex_step: 0.1,
            ..Default::default()
        };
        let mut model = TruncatedGamma::new(3.0, 2.6, 0.05);
        model.update_joint(&high, (3.0, 30.0), &config).unwrap();
        assert_eq!(model.k, 3.0, "{}", model);
        assert!(model.theta > 0.0);
    }
    #[test]
    fn coverage_order_is_restored() {
        let config = FitConfig::default();
        let mut model = model();
        std::mem::swap(&mut model.background, &mut model.enriched);
        model.order_coverage(&config);
        assert!(model.background.mean() < model.enriched.mean());
    }
}
