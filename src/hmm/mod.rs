//! The four-state hidden Markov model of crosslink sites.
//! The engine borrows the observations and owns every per-position quantity:
//! the emission cache, the posteriors, and the initial distribution of each interval.
use crate::config::FitConfig;
use crate::density::{
    CountModel, CoverageModel, EmissionModel, LearnMode, StateProbs, WeightedObservations,
};
use crate::error::{FitError, Result};
use crate::observation::{Observation, ObservationSet, Strand};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

mod decode;
pub mod forward_backward;
pub use decode::Paths;

pub const STATES: usize = 4;
/// Row-stochastic matrix, `[from][to]`.
pub type TransitionMatrix = [[f64; STATES]; STATES];

/// Hidden states. A state is a pair of the coverage component and the count component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Background coverage, no crosslink.
    Background = 0,
    /// Background coverage with read starts.
    BackgroundCounts = 1,
    /// Enriched coverage, no crosslink.
    Enriched = 2,
    /// Enriched coverage with a crosslink.
    Crosslink = 3,
}

impl State {
    pub const ALL: [State; STATES] = [
        State::Background,
        State::BackgroundCounts,
        State::Enriched,
        State::Crosslink,
    ];
    pub fn from_index(idx: u8) -> Option<Self> {
        State::ALL.get(idx as usize).copied()
    }
    pub fn is_enriched(self) -> bool {
        matches!(self, State::Enriched | State::Crosslink)
    }
    pub fn is_crosslink(self) -> bool {
        matches!(self, State::BackgroundCounts | State::Crosslink)
    }
}

/// How a Baum-Welch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub iterations: usize,
    pub converged: bool,
    /// Log-likelihood in the last E-step.
    pub log_likelihood: f64,
}

#[derive(Debug, Clone)]
pub struct CrosslinkHmm<'a> {
    observations: &'a ObservationSet,
    transition: TransitionMatrix,
    // The following are indexed by [strand][interval](position).
    initial: [Vec<StateProbs>; 2],
    emissions: [Vec<Vec<StateProbs>>; 2],
    posteriors: [Vec<Vec<StateProbs>>; 2],
    log_likelihood: f64,
}

impl<'a> CrosslinkHmm<'a> {
    /// Self transitions are `config.initial_self_transition`, the others share the rest evenly.
    /// The initial distributions are uniform.
    pub fn new(observations: &'a ObservationSet, config: &FitConfig) -> Self {
        let stay = config.initial_self_transition;
        let leave = (1.0 - stay) / (STATES - 1) as f64;
        let mut transition = [[leave; STATES]; STATES];
        for (i, row) in transition.iter_mut().enumerate() {
            row[i] = stay;
        }
        let per_position = |init: StateProbs| {
            let mut slots: [Vec<Vec<StateProbs>>; 2] = [vec![], vec![]];
            for strand in Strand::BOTH.iter() {
                slots[strand.index()] = observations
                    .strand(*strand)
                    .iter()
                    .map(|interval| vec![init; interval.len()])
                    .collect();
            }
            slots
        };
        let uniform = [1.0 / STATES as f64; STATES];
        let initial = [
            vec![uniform; observations.strand(Strand::Forward).len()],
            vec![uniform; observations.strand(Strand::Reverse).len()],
        ];
        Self {
            observations,
            transition,
            initial,
            emissions: per_position([1.0; STATES]),
            posteriors: per_position(uniform),
            log_likelihood: 0.0,
        }
    }
    pub fn with_transition(mut self, transition: TransitionMatrix) -> Self {
        self.transition = transition;
        self
    }
    pub fn observations(&self) -> &'a ObservationSet {
        self.observations
    }
    pub fn transition(&self) -> &TransitionMatrix {
        &self.transition
    }
    /// Initial distribution of each interval.
    pub fn initial(&self, strand: Strand) -> &[StateProbs] {
        &self.initial[strand.index()]
    }
    pub fn emissions(&self, strand: Strand) -> &[Vec<StateProbs>] {
        &self.emissions[strand.index()]
    }
    pub fn posteriors(&self, strand: Strand) -> &[Vec<StateProbs>] {
        &self.posteriors[strand.index()]
    }
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }
    /// Recompute the emission cache from `model`.
    pub fn compute_emissions<C: CoverageModel, B: CountModel>(
        &mut self,
        model: &EmissionModel<C, B>,
        config: &FitConfig,
    ) -> Result<()> {
        model.check(self.observations)?;
        for strand in Strand::BOTH.iter().copied() {
            let emissions = self
                .observations
                .strand(strand)
                .par_iter()
                .enumerate()
                .map(|(i, interval)| {
                    interval
                        .observations
                        .iter()
                        .enumerate()
                        .map(|(t, obs)| emission_at(model, obs, config, (strand, i, t)))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?;
            self.emissions[strand.index()] = emissions;
        }
        Ok(())
    }
    /// Forward-backward on every interval. Update the posteriors, the initial distributions,
    /// the log-likelihood, and, if `update_transition` is true, the transition matrix.
    pub fn expectation(&mut self, update_transition: bool, config: &FitConfig) -> Result<()> {
        let transition = self.transition;
        let mut counts = [[0f64; STATES]; STATES];
        let mut log_likelihood = 0f64;
        for strand in Strand::BOTH.iter().copied() {
            let s = strand.index();
            let results = self.emissions[s]
                .par_iter()
                .zip(self.initial[s].par_iter())
                .enumerate()
                .map(|(i, (emissions, initial))| {
                    forward_backward::posterior(initial, &transition, emissions).map_err(
                        |position| FitError::DegeneratePosterior {
                            strand,
                            interval: i,
                            position,
                        },
                    )
                })
                .collect::<Result<Vec<_>>>()?;
            for (i, result) in results.into_iter().enumerate() {
                for (acc, row) in counts.iter_mut().zip(result.transitions.iter()) {
                    acc.iter_mut().zip(row.iter()).for_each(|(a, c)| *a += c);
                }
                log_likelihood += result.log_likelihood;
                self.initial[s][i] = result.posteriors[0];
                self.posteriors[s][i] = result.posteriors;
            }
        }
        self.log_likelihood = log_likelihood;
        if update_transition {
            self.transition =
                reestimate_transition(&counts, &self.transition, config.min_crosslink_transition);
        }
        Ok(())
    }
    /// Posterior mass of each position, aggregated by `f`.
    fn responsibilities<F: Fn(&StateProbs) -> f64>(&self, f: F) -> WeightedObservations<'a> {
        let weights = |s: usize| -> Vec<Vec<f64>> {
            self.posteriors[s]
                .iter()
                .map(|interval| interval.iter().map(|p| f(p)).collect())
                .collect()
        };
        WeightedObservations::new(self.observations, [weights(0), weights(1)])
    }
    /// Refit the components selected by `mode` on the current posteriors.
    pub fn maximization<C: CoverageModel, B: CountModel>(
        &self,
        model: &mut EmissionModel<C, B>,
        mode: LearnMode,
        config: &FitConfig,
    ) -> Result<()> {
        use State::*;
        match mode {
            LearnMode::Coverage => {
                let background =
                    self.responsibilities(|p| p[Background as usize] + p[BackgroundCounts as usize]);
                let enriched = self.responsibilities(|p| p[Enriched as usize] + p[Crosslink as usize]);
                model.update_coverage(&background, &enriched, config)
            }
            LearnMode::Counts => {
                let non_crosslink = self.responsibilities(|p| p[Enriched as usize]);
                let crosslink = self.responsibilities(|p| p[Crosslink as usize]);
                model.update_counts(&non_crosslink, &crosslink, config)
            }
        }
    }
    /// Baum-Welch algorithm. Iterate emissions, E-step, and M-step until the refitted components
    /// move less than the tolerances, or `config.max_iter_baum_welch` times.
    /// Hitting the cap is not an error; the last parameters are kept in `model`.
    pub fn baum_welch<C: CoverageModel, B: CountModel>(
        &mut self,
        model: &mut EmissionModel<C, B>,
        mode: LearnMode,
        config: &FitConfig,
    ) -> Result<FitSummary> {
        config.validate()?;
        model.check(self.observations)?;
        let mut previous = model.clone();
        for iteration in 1..=config.max_iter_baum_welch {
            self.compute_emissions(model, config)?;
            self.expectation(true, config)?;
            self.maximization(model, mode, config)?;
            debug!("BW\t{:?}\t{}\t{:.4}", mode, iteration, self.log_likelihood);
            trace!("Transition:\n{}", self);
            trace!("Model:\n{}", model);
            if model.converged(&previous, mode, config) {
                info!("Baum-Welch ({:?}) converged in {} iterations.", mode, iteration);
                return Ok(FitSummary {
                    iterations: iteration,
                    converged: true,
                    log_likelihood: self.log_likelihood,
                });
            }
            previous = model.clone();
        }
        info!(
            "Baum-Welch ({:?}) did not converge in {} iterations.",
            mode, config.max_iter_baum_welch
        );
        Ok(FitSummary {
            iterations: config.max_iter_baum_welch,
            converged: false,
            log_likelihood: self.log_likelihood,
        })
    }
    /// Recompute the emissions and the posteriors under `model` without touching the transitions.
    pub fn apply_parameters<C: CoverageModel, B: CountModel>(
        &mut self,
        model: &EmissionModel<C, B>,
        config: &FitConfig,
    ) -> Result<()> {
        self.compute_emissions(model, config)?;
        self.expectation(false, config)
    }
}

/// Emission probabilities of the four states at a position.
/// With `config.allow_degenerate`, a degenerate position emits 1 in every state.
fn emission_at<C: CoverageModel, B: CountModel>(
    model: &EmissionModel<C, B>,
    obs: &Observation,
    config: &FitConfig,
    (strand, interval, position): (Strand, usize, usize),
) -> Result<StateProbs> {
    if obs.coverage <= 0.0 {
        let error = FitError::ZeroCoverage {
            strand,
            interval,
            position,
        };
        if !config.allow_degenerate {
            return Err(error);
        }
        warn!("{}", error);
    }
    let probs = model.state_probs(obs, config);
    let degenerate = probs.iter().all(|&p| p == 0.0) || probs.iter().any(|p| !p.is_finite());
    if degenerate {
        let error = FitError::DegenerateEmission {
            strand,
            interval,
            position,
            detail: model.diagnose(obs, config),
        };
        if !config.allow_degenerate {
            return Err(error);
        }
        warn!("{}. Treated as uninformative.", error);
        return Ok([1.0; STATES]);
    }
    Ok(probs)
}

/// Row-normalize the expected transition counts.
/// Zeros are raised to the smallest positive `f64`, rows without any mass keep their previous values,
/// and the enriched -> crosslink transition is kept at least `floor`.
fn reestimate_transition(
    counts: &TransitionMatrix,
    previous: &TransitionMatrix,
    floor: f64,
) -> TransitionMatrix {
    let mut transition = *previous;
    for (from, (row, count)) in transition.iter_mut().zip(counts.iter()).enumerate() {
        let total: f64 = count.iter().sum();
        if !(0.0 < total && total.is_finite()) {
            debug!("No transition from state {}. Kept the previous row.", from);
            continue;
        }
        for (p, c) in row.iter_mut().zip(count.iter()) {
            let prob = c / total;
            *p = if prob > 0.0 { prob } else { f64::MIN_POSITIVE };
        }
    }
    let (enriched, crosslink) = (State::Enriched as usize, State::Crosslink as usize);
    if transition[enriched][crosslink] < floor {
        info!(
            "Transition {}->{} was {:.3e}. Raised to {}.",
            enriched, crosslink, transition[enriched][crosslink], floor
        );
        transition[enriched][crosslink] = floor;
        if transition[crosslink][crosslink] < floor {
            transition[crosslink][crosslink] = floor;
        }
    }
    transition
}

impl<'a> std::fmt::Display for CrosslinkHmm<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (i, row) in self.transition.iter().enumerate() {
            let probs: Vec<_> = row.iter().map(|x| format!("{:.4}", x)).collect();
            if i + 1 < STATES {
                writeln!(f, "{}", probs.join("\t"))?;
            } else {
                write!(f, "{}", probs.join("\t"))?;
            }
        }
        Ok(())
    }
}
