//! Observations handed over by the upstream coverage/count extraction.
//! Each strand holds a list of intervals, each interval a run of consecutive positions.
use crate::error::{FitError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    pub const BOTH: [Strand; 2] = [Strand::Forward, Strand::Reverse];
    pub fn index(self) -> usize {
        match self {
            Strand::Forward => 0,
            Strand::Reverse => 1,
        }
    }
}

impl std::fmt::Display for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Strand::Forward => write!(f, "+"),
            Strand::Reverse => write!(f, "-"),
        }
    }
}

/// One position of an interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Smoothed coverage. Should be positive.
    pub coverage: f64,
    /// Number of read starts.
    pub count: u32,
    /// Estimated number of trials for the count model.
    pub trials: f64,
    /// Covariate of the coverage regression.
    pub predictor: f64,
    /// Motif group of the count regression.
    pub motif_id: usize,
    pub motif_score: f64,
}

impl Observation {
    pub fn new(coverage: f64, count: u32, trials: f64) -> Self {
        Self {
            coverage,
            count,
            trials,
            ..Default::default()
        }
    }
    pub fn with_predictor(mut self, predictor: f64) -> Self {
        self.predictor = predictor;
        self
    }
    pub fn with_motif(mut self, motif_id: usize, motif_score: f64) -> Self {
        self.motif_id = motif_id;
        self.motif_score = motif_score;
        self
    }
    /// True if this position should take part in the density parameter fitting.
    pub fn is_informative(&self, min_coverage: f64) -> bool {
        self.coverage >= min_coverage && self.count >= 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Strand-relative coordinate of the first position.
    pub start: usize,
    pub observations: Vec<Observation>,
}

impl Interval {
    pub fn new(start: usize, observations: Vec<Observation>) -> Self {
        Self {
            start,
            observations,
        }
    }
    pub fn len(&self) -> usize {
        self.observations.len()
    }
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Intervals of both strands. Empty intervals are rejected on construction
/// and on deserialization, so every interval has at least one position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawObservationSet")]
pub struct ObservationSet {
    strands: [Vec<Interval>; 2],
}

#[derive(Deserialize)]
struct RawObservationSet {
    strands: [Vec<Interval>; 2],
}

impl std::convert::TryFrom<RawObservationSet> for ObservationSet {
    type Error = FitError;
    fn try_from(raw: RawObservationSet) -> Result<Self> {
        let [forward, reverse] = raw.strands;
        Self::new(forward, reverse)
    }
}

impl ObservationSet {
    pub fn new(forward: Vec<Interval>, reverse: Vec<Interval>) -> Result<Self> {
        for (strand, intervals) in Strand::BOTH.iter().zip([&forward, &reverse].iter()) {
            if let Some(idx) = intervals.iter().position(|i| i.is_empty()) {
                return Err(FitError::Observation(format!(
                    "interval {} on strand {} has no positions",
                    idx, strand
                )));
            }
        }
        Ok(Self {
            strands: [forward, reverse],
        })
    }
    pub fn strand(&self, strand: Strand) -> &[Interval] {
        &self.strands[strand.index()]
    }
    pub fn num_positions(&self) -> usize {
        self.strands.iter().flatten().map(|i| i.len()).sum()
    }
    /// Number of motif groups, i.e., the largest motif id plus one.
    pub fn num_motifs(&self) -> usize {
        self.strands
            .iter()
            .flatten()
            .flat_map(|i| i.observations.iter())
            .map(|obs| obs.motif_id + 1)
            .max()
            .unwrap_or(0)
    }
}
