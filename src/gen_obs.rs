//! This module is to generate some random observations to assess the performance.
//! Usually, it would not be used in the real-applications.
use crate::density::TruncatedGamma;
use crate::error::{FitError, Result};
use crate::hmm::{Paths, State, TransitionMatrix, STATES};
use crate::observation::{Interval, Observation, ObservationSet};
use rand::distributions::Distribution;
use rand::seq::SliceRandom;
use rand::Rng;
use statrs::distribution::Gamma;

// Rejection sampling gives up after this many draws.
const MAX_DRAWS: usize = 1000;

#[derive(Debug, Clone)]
pub struct SimulationProfile {
    pub background: TruncatedGamma,
    pub enriched: TruncatedGamma,
    /// Success rate of the read starts outside of crosslink sites.
    pub non_crosslink: f64,
    pub crosslink: f64,
    pub trials: u32,
    pub transition: TransitionMatrix,
}

impl std::default::Default for SimulationProfile {
    fn default() -> Self {
        Self {
            background: TruncatedGamma::new(1.5, 0.4, 0.05),
            enriched: TruncatedGamma::new(4.0, 1.0, 0.05),
            non_crosslink: 0.05,
            crosslink: 0.4,
            trials: 10,
            transition: [
                [0.90, 0.04, 0.05, 0.01],
                [0.50, 0.40, 0.05, 0.05],
                [0.05, 0.01, 0.80, 0.14],
                [0.05, 0.01, 0.34, 0.60],
            ],
        }
    }
}

fn truncated_gamma<R: Rng>(rng: &mut R, model: &TruncatedGamma) -> Result<f64> {
    let gamma = Gamma::new(model.k, 1.0 / model.theta)
        .map_err(|e| FitError::config(format!("{}:{}", model, e)))?;
    let x = (0..MAX_DRAWS)
        .map(|_| gamma.sample(rng))
        .find(|&x| x >= model.tp)
        .unwrap_or(model.tp);
    Ok(x)
}

fn binomial<R: Rng>(rng: &mut R, trials: u32, p: f64) -> u32 {
    (0..trials).filter(|_| rng.gen_bool(p)).count() as u32
}

fn zero_truncated_binomial<R: Rng>(rng: &mut R, trials: u32, p: f64) -> u32 {
    (0..MAX_DRAWS)
        .map(|_| binomial(rng, trials, p))
        .find(|&x| x > 0)
        .unwrap_or(1)
}

/// Sample a state path of length `len` and the observations along it.
pub fn simulate_interval<R: Rng>(
    rng: &mut R,
    profile: &SimulationProfile,
    start: usize,
    len: usize,
) -> Result<(Vec<u8>, Interval)> {
    let mut states = Vec::with_capacity(len);
    let mut observations = Vec::with_capacity(len);
    let mut current = *State::ALL.choose(rng).unwrap_or(&State::Background);
    for _ in 0..len {
        let coverage_model = if current.is_enriched() {
            &profile.enriched
        } else {
            &profile.background
        };
        let coverage = truncated_gamma(rng, coverage_model)?;
        let count = if current.is_crosslink() {
            zero_truncated_binomial(rng, profile.trials, profile.crosslink)
        } else {
            binomial(rng, profile.trials, profile.non_crosslink)
        };
        states.push(current as u8);
        observations.push(Observation::new(coverage, count, profile.trials as f64));
        let row = &profile.transition[current as usize];
        current = *State::ALL
            .choose_weighted(rng, |s| row[*s as usize])
            .map_err(|e| FitError::config(format!("{:?}", e)))?;
    }
    Ok((states, Interval::new(start, observations)))
}

/// Sample `intervals` intervals of length `len`, alternating the strands.
pub fn simulate<R: Rng>(
    rng: &mut R,
    profile: &SimulationProfile,
    intervals: usize,
    len: usize,
) -> Result<(ObservationSet, Paths)> {
    let rates = [profile.non_crosslink, profile.crosslink];
    if rates.iter().any(|p| !(0.0..=1.0).contains(p)) {
        return Err(FitError::config("success rates should be in [0,1]"));
    }
    let mut strands: [Vec<Interval>; 2] = [vec![], vec![]];
    let mut paths: Paths = [vec![], vec![]];
    for i in 0..intervals {
        let (states, interval) = simulate_interval(rng, profile, i * len * 2, len)?;
        strands[i % 2].push(interval);
        paths[i % 2].push(states);
    }
    let [forward, reverse] = strands;
    let obs = ObservationSet::new(forward, reverse)?;
    debug_assert_eq!(obs.num_positions(), intervals * len);
    debug_assert!(paths.iter().flatten().flatten().all(|&s| (s as usize) < STATES));
    Ok((obs, paths))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Strand;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;
    #[test]
    fn simulate_observations() {
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(32);
        let profile = SimulationProfile::default();
        let (obs, paths) = simulate(&mut rng, &profile, 5, 100).unwrap();
        assert_eq!(obs.strand(Strand::Forward).len(), 3);
        assert_eq!(obs.strand(Strand::Reverse).len(), 2);
        for strand in Strand::BOTH.iter().copied() {
            for (interval, path) in obs.strand(strand).iter().zip(paths[strand.index()].iter()) {
                assert_eq!(interval.len(), path.len());
                for (o, &s) in interval.observations.iter().zip(path.iter()) {
                    assert!(o.coverage >= profile.background.tp);
                    if s == State::Crosslink as u8 || s == State::BackgroundCounts as u8 {
                        assert!(o.count > 0);
                    }
                    assert!(o.count <= profile.trials);
                }
            }
        }
    }
    #[test]
    fn enriched_states_have_higher_coverage() {
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(3);
        let profile = SimulationProfile::default();
        let (obs, paths) = simulate(&mut rng, &profile, 4, 500).unwrap();
        let (mut high, mut low) = (vec![], vec![]);
        for strand in Strand::BOTH.iter().copied() {
            for (interval, path) in obs.strand(strand).iter().zip(paths[strand.index()].iter()) {
                for (o, &s) in interval.observations.iter().zip(path.iter()) {
                    match State::from_index(s) {
                        Some(s) if s.is_enriched() => high.push(o.coverage),
                        _ => low.push(o.coverage),
                    }
                }
            }
        }
        let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
        assert!(mean(&low) < mean(&high));
    }
}
