use crate::error::{FitError, Result};
use serde::{Deserialize, Serialize};

/// Parameters of the fitting procedure. Every field has a default,
/// so a JSON file only needs to list what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub max_iter_baum_welch: usize,
    pub max_iter_brent: usize,
    pub max_iter_simplex: usize,
    /// Cap of the one-dimensional simplex run after the shape parameter left its band.
    pub max_iter_simplex_fixed_shape: usize,
    pub simplex_step: f64,
    /// The simplex stops when its size falls below this value.
    pub simplex_tolerance: f64,
    pub gamma_theta_conv: f64,
    pub gamma_k_conv: f64,
    pub binomial_p_conv: f64,
    pub regression_conv: f64,
    /// Bracket of the Brent search on the Gamma scale.
    pub theta_bounds: (f64, f64),
    /// Band of the shape parameter of the background coverage component.
    pub background_shape_bounds: (f64, f64),
    /// Band of the shape parameter of the enriched coverage component.
    pub enriched_shape_bounds: (f64, f64),
    /// If true, the fitted background shape is a lower bound of the enriched shape.
    pub ordered_shapes: bool,
    pub binomial_p_bounds: (f64, f64),
    /// Bracket of the Brent search on the logistic regression coefficients.
    pub regression_bounds: (f64, f64),
    /// Floor of the enriched -> crosslink transition.
    pub min_crosslink_transition: f64,
    /// Positions below this coverage do not take part in the density fitting.
    pub min_coverage_to_fit: f64,
    /// Covariates of the coverage regression are clamped from below to this value.
    pub min_predictor: f64,
    /// Fit scale and shape jointly by the simplex search instead of one by one.
    pub joint_optimization: bool,
    pub initial_self_transition: f64,
    /// Report degenerate positions as warnings instead of aborting.
    pub allow_degenerate: bool,
}

impl std::default::Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iter_baum_welch: 50,
            max_iter_brent: 100,
            max_iter_simplex: 200,
            max_iter_simplex_fixed_shape: 100,
            simplex_step: 0.001,
            simplex_tolerance: 1e-6,
            gamma_theta_conv: 1e-4,
            gamma_k_conv: 1e-3,
            binomial_p_conv: 1e-4,
            regression_conv: 1e-3,
            theta_bounds: (1e-4, 10.0),
            background_shape_bounds: (0.5, 10.0),
            enriched_shape_bounds: (1.0, 30.0),
            ordered_shapes: true,
            binomial_p_bounds: (1e-4, 0.9999),
            regression_bounds: (-20.0, 20.0),
            min_crosslink_transition: 1e-4,
            min_coverage_to_fit: 0.0,
            min_predictor: 0.0,
            joint_optimization: false,
            initial_self_transition: 0.6,
            allow_degenerate: false,
        }
    }
}

impl FitConfig {
    pub fn from_json<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let rdr = std::fs::File::open(path).map(std::io::BufReader::new)?;
        let config: Self = serde_json::from_reader(rdr)?;
        config.validate()?;
        Ok(config)
    }
    pub fn validate(&self) -> Result<()> {
        let bounds = [
            ("theta_bounds", self.theta_bounds),
            ("background_shape_bounds", self.background_shape_bounds),
            ("enriched_shape_bounds", self.enriched_shape_bounds),
            ("binomial_p_bounds", self.binomial_p_bounds),
            ("regression_bounds", self.regression_bounds),
        ];
        for &(name, (lower, upper)) in bounds.iter() {
            if !(lower < upper) || !lower.is_finite() || !upper.is_finite() {
                return Err(FitError::config(format!(
                    "{} must be a finite, non-empty range: ({}, {})",
                    name, lower, upper
                )));
            }
        }
        let lowers = [
            self.theta_bounds.0,
            self.background_shape_bounds.0,
            self.enriched_shape_bounds.0,
        ];
        if lowers.iter().any(|&x| x <= 0.0) {
            return Err(FitError::config("scale and shape bounds must be positive"));
        }
        let (p_min, p_max) = self.binomial_p_bounds;
        if p_min <= 0.0 || 1.0 <= p_max {
            return Err(FitError::config("binomial_p_bounds must lie in (0,1)"));
        }
        let tolerances = [
            self.simplex_step,
            self.simplex_tolerance,
            self.gamma_theta_conv,
            self.gamma_k_conv,
            self.binomial_p_conv,
            self.regression_conv,
        ];
        if tolerances.iter().any(|&x| !(x > 0.0)) {
            return Err(FitError::config("step sizes and tolerances must be positive"));
        }
        let caps = [
            self.max_iter_brent,
            self.max_iter_simplex,
            self.max_iter_simplex_fixed_shape,
        ];
        if caps.contains(&0) {
            return Err(FitError::config("iteration caps must be positive"));
        }
        if !(0.0 < self.initial_self_transition && self.initial_self_transition < 1.0) {
            return Err(FitError::config(format!(
                "initial_self_transition must be in (0,1): {}",
                self.initial_self_transition
            )));
        }
        if !(0.0..1.0).contains(&self.min_crosslink_transition) {
            return Err(FitError::config("min_crosslink_transition must be in [0,1)"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn default_is_valid() {
        assert!(FitConfig::default().validate().is_ok());
    }
    #[test]
    fn partial_json() {
        let json = r#"{"max_iter_baum_welch": 3, "theta_bounds": [0.01, 5.0]}"#;
        let config: FitConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_iter_baum_welch, 3);
        assert_eq!(config.theta_bounds, (0.01, 5.0));
        assert_eq!(config.max_iter_brent, FitConfig::default().max_iter_brent);
    }
    #[test]
    fn invalid_bounds() {
        let config = FitConfig {
            enriched_shape_bounds: (2.0, 1.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = FitConfig {
            initial_self_transition: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
