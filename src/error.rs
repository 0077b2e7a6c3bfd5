use crate::observation::Strand;
use thiserror::Error;

/// Inputs and component densities at a position where the emission probabilities broke down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmissionDiagnostic {
    pub coverage: f64,
    pub count: u32,
    pub trials: f64,
    pub predictor: f64,
    pub motif_id: usize,
    pub motif_score: f64,
    /// Densities of the background and enriched coverage components.
    pub coverage_densities: [f64; 2],
    /// Densities of the non-crosslink and crosslink count components.
    pub count_densities: [f64; 2],
}

impl std::fmt::Display for EmissionDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "coverage={},count={},trials={},predictor={},motif={}:{},",
            self.coverage, self.count, self.trials, self.predictor, self.motif_id, self.motif_score
        )?;
        let [g1, g2] = self.coverage_densities;
        let [b1, b2] = self.count_densities;
        write!(f, "gamma=({},{}),binomial=({},{})", g1, g2, b1, b2)
    }
}

#[derive(Error, Debug)]
pub enum FitError {
    #[error("coverage is zero at {strand}:{interval}:{position}; check the upstream coverage estimate")]
    ZeroCoverage {
        strand: Strand,
        interval: usize,
        position: usize,
    },
    #[error("emission probabilities are all zero or not finite at {strand}:{interval}:{position} ({detail}); check the truncation point")]
    DegenerateEmission {
        strand: Strand,
        interval: usize,
        position: usize,
        detail: EmissionDiagnostic,
    },
    #[error("forward probabilities vanished at {strand}:{interval}:{position}")]
    DegeneratePosterior {
        strand: Strand,
        interval: usize,
        position: usize,
    },
    #[error("optimizer ended at a non-finite objective ({value}) while updating {parameter}")]
    Optimizer { parameter: &'static str, value: f64 },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid observations: {0}")]
    Observation(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FitError>;

impl FitError {
    pub(crate) fn optimizer(parameter: &'static str, value: f64) -> Self {
        Self::Optimizer { parameter, value }
    }
    pub(crate) fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }
}
