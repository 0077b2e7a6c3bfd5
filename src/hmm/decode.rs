//! Decoding the hidden states.
//! Viterbi in the linear and the log space share the tie-breaking:
//! the first of equally likely predecessors, and the last of equally likely terminal states.
use super::{CrosslinkHmm, TransitionMatrix, STATES};
use crate::density::StateProbs;
use crate::observation::Strand;
use rayon::prelude::*;

/// Decoded states, indexed by [strand][interval][position].
pub type Paths = [Vec<Vec<u8>>; 2];

fn backtrack(last: &StateProbs, tracks: &[[u8; STATES]]) -> (Vec<u8>, f64) {
    let (mut arg, mut max) = (0, last[0]);
    for (k, &v) in last.iter().enumerate().skip(1) {
        if v >= max {
            arg = k;
            max = v;
        }
    }
    let mut path = vec![arg as u8; tracks.len()];
    for t in (0..tracks.len().saturating_sub(1)).rev() {
        path[t] = tracks[t + 1][path[t + 1] as usize];
    }
    (path, max)
}

fn viterbi_interval(
    initial: &StateProbs,
    transition: &TransitionMatrix,
    emissions: &[StateProbs],
) -> (Vec<u8>, f64) {
    let mut tracks = vec![[0u8; STATES]; emissions.len()];
    let mut probs = [0f64; STATES];
    for k in 0..STATES {
        probs[k] = initial[k] * emissions[0][k];
    }
    for (t, emission) in emissions.iter().enumerate().skip(1) {
        let mut next = [0f64; STATES];
        for k in 0..STATES {
            let (mut arg, mut max) = (0, probs[0] * transition[0][k]);
            for j in 1..STATES {
                let v = probs[j] * transition[j][k];
                if v > max {
                    arg = j;
                    max = v;
                }
            }
            next[k] = max * emission[k];
            tracks[t][k] = arg as u8;
        }
        probs = next;
    }
    backtrack(&probs, &tracks)
}

fn viterbi_log_interval(
    initial: &StateProbs,
    transition: &TransitionMatrix,
    emissions: &[StateProbs],
) -> (Vec<u8>, f64) {
    let mut log_transition = [[0f64; STATES]; STATES];
    for (log_row, row) in log_transition.iter_mut().zip(transition.iter()) {
        log_row.iter_mut().zip(row.iter()).for_each(|(l, p)| *l = p.ln());
    }
    let mut tracks = vec![[0u8; STATES]; emissions.len()];
    let mut lks = [0f64; STATES];
    for k in 0..STATES {
        lks[k] = initial[k].ln() + emissions[0][k].ln();
    }
    for (t, emission) in emissions.iter().enumerate().skip(1) {
        let mut next = [0f64; STATES];
        for k in 0..STATES {
            let (mut arg, mut max) = (0, lks[0] + log_transition[0][k]);
            for j in 1..STATES {
                let v = lks[j] + log_transition[j][k];
                if v > max {
                    arg = j;
                    max = v;
                }
            }
            next[k] = max + emission[k].ln();
            tracks[t][k] = arg as u8;
        }
        lks = next;
    }
    backtrack(&lks, &tracks)
}

fn posterior_max(posteriors: &[StateProbs]) -> Vec<u8> {
    posteriors
        .iter()
        .map(|post| {
            let (mut arg, mut max) = (0, 0f64);
            for (k, &p) in post.iter().enumerate() {
                if p > max {
                    arg = k;
                    max = p;
                }
            }
            arg as u8
        })
        .collect()
}

impl<'a> CrosslinkHmm<'a> {
    fn decode_with<F>(&self, f: F) -> (Paths, Vec<f64>)
    where
        F: Fn(&StateProbs, &TransitionMatrix, &[StateProbs]) -> (Vec<u8>, f64) + Sync,
    {
        let mut paths: Paths = [vec![], vec![]];
        let mut scores = vec![];
        for strand in Strand::BOTH.iter().copied() {
            let s = strand.index();
            let (path, score): (Vec<_>, Vec<_>) = self.emissions[s]
                .par_iter()
                .zip(self.initial[s].par_iter())
                .map(|(emissions, initial)| f(initial, &self.transition, emissions))
                .unzip();
            paths[s] = path;
            scores.extend(score);
        }
        (paths, scores)
    }
    /// Viterbi path in the linear space, and the product of the path probabilities of all the intervals.
    /// Underflows on long intervals; use [CrosslinkHmm::viterbi_log] for real data.
    pub fn viterbi(&self) -> (Paths, f64) {
        let (paths, probs) = self.decode_with(viterbi_interval);
        (paths, probs.iter().product())
    }
    /// Viterbi path in the log space, and the sum of the log path probabilities of all the intervals.
    pub fn viterbi_log(&self) -> (Paths, f64) {
        let (paths, lks) = self.decode_with(viterbi_log_interval);
        (paths, lks.iter().sum())
    }
    /// The most probable state at each position.
    pub fn posterior_decoding(&self) -> Paths {
        let mut paths: Paths = [vec![], vec![]];
        for (path, posteriors) in paths.iter_mut().zip(self.posteriors.iter()) {
            *path = posteriors.par_iter().map(|post| posterior_max(post)).collect();
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitConfig;
    use crate::density::*;
    use crate::gen_obs::{simulate, SimulationProfile};
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256StarStar;
    const TRANSITION: TransitionMatrix = [
        [0.8, 0.05, 0.1, 0.05],
        [0.3, 0.5, 0.1, 0.1],
        [0.1, 0.05, 0.6, 0.25],
        [0.05, 0.05, 0.3, 0.6],
    ];
    // All the paths, by brute force.
    fn best_path(initial: &StateProbs, emissions: &[StateProbs]) -> Vec<u8> {
        let len = emissions.len();
        let mut best = (vec![], -1f64);
        for code in 0..STATES.pow(len as u32) {
            let path: Vec<usize> = (0..len).map(|t| (code / STATES.pow(t as u32)) % STATES).collect();
            let mut p = initial[path[0]] * emissions[0][path[0]];
            for t in 1..len {
                p *= TRANSITION[path[t - 1]][path[t]] * emissions[t][path[t]];
            }
            if p > best.1 {
                best = (path.iter().map(|&x| x as u8).collect(), p);
            }
        }
        best.0
    }
    #[test]
    fn viterbi_is_optimal() {
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(8);
        let initial = [0.4, 0.1, 0.3, 0.2];
        for len in 1..=6 {
            let emissions: Vec<StateProbs> = (0..len)
                .map(|_| {
                    let mut e = [0f64; STATES];
                    e.iter_mut().for_each(|x| *x = rng.gen_range(0.01..1.0));
                    e
                })
                .collect();
            let expected = best_path(&initial, &emissions);
            let (path, _) = viterbi_interval(&initial, &TRANSITION, &emissions);
            assert_eq!(path, expected);
            let (path, _) = viterbi_log_interval(&initial, &TRANSITION, &emissions);
            assert_eq!(path, expected);
        }
    }
    #[test]
    fn ties() {
        let initial = [0.25; STATES];
        let emissions = vec![[0.5; STATES]; 3];
        let uniform = [[0.25; STATES]; STATES];
        // Predecessor: the first one. Terminal: the last one.
        let (path, _) = viterbi_interval(&initial, &uniform, &emissions);
        assert_eq!(path, vec![0, 0, 3]);
        let (path, _) = viterbi_log_interval(&initial, &uniform, &emissions);
        assert_eq!(path, vec![0, 0, 3]);
        assert_eq!(posterior_max(&[[0.25; STATES]]), vec![0]);
        assert_eq!(posterior_max(&[[0.1, 0.4, 0.4, 0.1]]), vec![1]);
    }
    #[test]
    fn zero_emissions() {
        let initial = [0.25; STATES];
        let emissions = vec![[0.5, 0.0, 0.5, 0.0], [0.1, 0.0, 0.9, 0.0], [0.9, 0.0, 0.1, 0.0]];
        let (linear, _) = viterbi_interval(&initial, &TRANSITION, &emissions);
        let (log, lk) = viterbi_log_interval(&initial, &TRANSITION, &emissions);
        assert_eq!(linear, log);
        assert!(lk.is_finite());
        assert!(linear.iter().all(|&s| s == 0 || s == 2));
    }
    #[test]
    fn linear_and_log_agree_on_fitted_model() {
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(2);
        let profile = SimulationProfile::default();
        let (obs, truth) = simulate(&mut rng, &profile, 4, 40).unwrap();
        let config = FitConfig {
            max_iter_baum_welch: 3,
            ..Default::default()
        };
        let mut model = EmissionModel::new(
            profile.background,
            profile.enriched,
            ZeroTruncatedBinomial::new(profile.non_crosslink),
            ZeroTruncatedBinomial::new(profile.crosslink),
        );
        let mut hmm = CrosslinkHmm::new(&obs, &config).with_transition(profile.transition);
        hmm.baum_welch(&mut model, LearnMode::Counts, &config).unwrap();
        hmm.apply_parameters(&model, &config).unwrap();
        let (linear, p) = hmm.viterbi();
        let (log, lk) = hmm.viterbi_log();
        assert_eq!(linear, log);
        assert!(p > 0.0);
        assert!((p.ln() - lk).abs() < 1e-6 * lk.abs());
        let posterior = hmm.posterior_decoding();
        let total = obs.num_positions();
        let agree = |paths: &Paths| -> usize {
            paths
                .iter()
                .zip(truth.iter())
                .flat_map(|(xs, ys)| xs.iter().zip(ys.iter()))
                .map(|(x, y)| x.iter().zip(y.iter()).filter(|(a, b)| a == b).count())
                .sum()
        };
        assert!(agree(&log) * 2 > total, "{}/{}", agree(&log), total);
        assert!(agree(&posterior) * 2 > total, "{}/{}", agree(&posterior), total);
    }
}
