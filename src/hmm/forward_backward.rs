//! Scaled forward-backward algorithm on a single interval.
//! The forward probabilities are normalized at every position,
//! and the backward probabilities are divided by the same normalizing constants,
//! so that `forward[t][k] * backward[t][k]` is proportional to the posterior at each `t`.
use super::{TransitionMatrix, STATES};
use crate::density::StateProbs;

/// Scaled forward pass. Return the accumulators before the normalization and the normalized forward probabilities.
/// The sum of the former at `t` is the likelihood of the `t`-th observation given the previous ones.
pub fn forward(
    initial: &StateProbs,
    transition: &TransitionMatrix,
    emissions: &[StateProbs],
) -> (Vec<StateProbs>, Vec<StateProbs>) {
    let mut raw: Vec<StateProbs> = Vec::with_capacity(emissions.len());
    let mut scaled: Vec<StateProbs> = Vec::with_capacity(emissions.len());
    for emission in emissions.iter() {
        let mut alpha = [0f64; STATES];
        match scaled.last() {
            None => {
                for k in 0..STATES {
                    alpha[k] = initial[k] * emission[k];
                }
            }
            Some(prev) => {
                for k in 0..STATES {
                    let sum: f64 = (0..STATES).map(|j| prev[j] * transition[j][k]).sum();
                    alpha[k] = sum * emission[k];
                }
            }
        }
        let norm: f64 = alpha.iter().sum();
        let mut normed = alpha;
        normed.iter_mut().for_each(|x| *x /= norm);
        raw.push(alpha);
        scaled.push(normed);
    }
    (raw, scaled)
}

/// Scaled backward pass. `raw_forward` is the first return value of [forward].
pub fn backward(
    transition: &TransitionMatrix,
    emissions: &[StateProbs],
    raw_forward: &[StateProbs],
) -> Vec<StateProbs> {
    let len = emissions.len();
    let mut betas = vec![[0f64; STATES]; len];
    if len == 0 {
        return betas;
    }
    let norm: f64 = raw_forward[len - 1].iter().sum();
    betas[len - 1] = [1.0 / norm; STATES];
    for t in (0..len - 1).rev() {
        let norm: f64 = raw_forward[t].iter().sum();
        for k in 0..STATES {
            let sum: f64 = (0..STATES)
                .map(|j| betas[t + 1][j] * transition[k][j] * emissions[t + 1][j])
                .sum();
            betas[t][k] = sum / norm;
        }
    }
    betas
}

/// Output of the forward-backward algorithm on an interval.
#[derive(Debug, Clone)]
pub struct IntervalPosterior {
    pub posteriors: Vec<StateProbs>,
    /// Expected number of transitions, `[from][to]`.
    pub transitions: TransitionMatrix,
    pub log_likelihood: f64,
}

/// Posterior probabilities and expected transition counts of an interval.
/// If the forward probabilities vanish (or diverge) at a position, return the position as an error.
pub fn posterior(
    initial: &StateProbs,
    transition: &TransitionMatrix,
    emissions: &[StateProbs],
) -> Result<IntervalPosterior, usize> {
    let (raw, scaled) = forward(initial, transition, emissions);
    let norms: Vec<f64> = raw.iter().map(|alpha| alpha.iter().sum()).collect();
    if let Some(t) = norms.iter().position(|&n| !(0.0 < n && n.is_finite())) {
        return Err(t);
    }
    let betas = backward(transition, emissions, &raw);
    let posteriors: Vec<StateProbs> = scaled
        .iter()
        .zip(betas.iter())
        .map(|(alpha, beta)| {
            let mut post = [0f64; STATES];
            for k in 0..STATES {
                post[k] = alpha[k] * beta[k];
            }
            let sum: f64 = post.iter().sum();
            post.iter_mut().for_each(|x| *x /= sum);
            post
        })
        .collect();
    let mut transitions = [[0f64; STATES]; STATES];
    for t in 1..emissions.len() {
        for (from, row) in transitions.iter_mut().enumerate() {
            for (to, count) in row.iter_mut().enumerate() {
                *count += scaled[t - 1][from]
                    * transition[from][to]
                    * emissions[t][to]
                    * betas[t][to];
            }
        }
    }
    let log_likelihood = norms.iter().map(|n| n.ln()).sum();
    Ok(IntervalPosterior {
        posteriors,
        transitions,
        log_likelihood,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256StarStar;
    const TRANSITION: TransitionMatrix = [
        [0.7, 0.1, 0.1, 0.1],
        [0.2, 0.6, 0.1, 0.1],
        [0.1, 0.1, 0.5, 0.3],
        [0.05, 0.05, 0.3, 0.6],
    ];
    fn random_emissions<R: Rng>(rng: &mut R, len: usize) -> Vec<StateProbs> {
        (0..len)
            .map(|_| {
                let mut e = [0f64; STATES];
                e.iter_mut().for_each(|x| *x = rng.gen_range(0.01..1.0));
                e
            })
            .collect()
    }
    // Textbook recursions without scaling.
    fn naive_forward(initial: &StateProbs, emissions: &[StateProbs]) -> Vec<StateProbs> {
        let mut alphas: Vec<StateProbs> = vec![];
        for (t, e) in emissions.iter().enumerate() {
            let mut alpha = [0f64; STATES];
            for k in 0..STATES {
                alpha[k] = if t == 0 {
                    initial[k] * e[k]
                } else {
                    (0..STATES).map(|j| alphas[t - 1][j] * TRANSITION[j][k]).sum::<f64>() * e[k]
                };
            }
            alphas.push(alpha);
        }
        alphas
    }
    fn naive_backward(emissions: &[StateProbs]) -> Vec<StateProbs> {
        let len = emissions.len();
        let mut betas = vec![[1f64; STATES]; len];
        for t in (0..len - 1).rev() {
            for k in 0..STATES {
                betas[t][k] = (0..STATES)
                    .map(|j| TRANSITION[k][j] * emissions[t + 1][j] * betas[t + 1][j])
                    .sum();
            }
        }
        betas
    }
    #[test]
    fn matches_naive() {
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(4823);
        let initial = [0.25; STATES];
        for len in vec![1, 2, 5, 30] {
            let emissions = random_emissions(&mut rng, len);
            let alphas = naive_forward(&initial, &emissions);
            let betas = naive_backward(&emissions);
            let lk: f64 = alphas[len - 1].iter().sum();
            let result = posterior(&initial, &TRANSITION, &emissions).unwrap();
            assert!((result.log_likelihood - lk.ln()).abs() < 1e-9);
            for t in 0..len {
                for k in 0..STATES {
                    let expected = alphas[t][k] * betas[t][k] / lk;
                    let diff = (result.posteriors[t][k] - expected).abs();
                    assert!(diff < 1e-9, "{}\t{}\t{}", t, k, diff);
                }
            }
            for from in 0..STATES {
                for to in 0..STATES {
                    let expected: f64 = (1..len)
                        .map(|t| {
                            alphas[t - 1][from]
                                * TRANSITION[from][to]
                                * emissions[t][to]
                                * betas[t][to]
                                / lk
                        })
                        .sum();
                    let diff = (result.transitions[from][to] - expected).abs();
                    assert!(diff < 1e-9, "{}\t{}\t{}", from, to, diff);
                }
            }
        }
    }
    #[test]
    fn long_interval_does_not_underflow() {
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(12);
        let initial = [0.25; STATES];
        let emissions: Vec<_> = random_emissions(&mut rng, 5_000)
            .into_iter()
            .map(|e| {
                let mut e = e;
                e.iter_mut().for_each(|x| *x *= 1e-3);
                e
            })
            .collect();
        let result = posterior(&initial, &TRANSITION, &emissions).unwrap();
        assert!(result.log_likelihood.is_finite());
        assert!(result.log_likelihood < -5_000.0 * 3.0 * 10f64.ln() + 1.0);
        for post in result.posteriors.iter() {
            let sum: f64 = post.iter().sum();
            assert!((sum - 1.0).abs() < 1e-10);
        }
        let total: f64 = result.transitions.iter().flatten().sum();
        assert!((total - 4_999.0).abs() < 1e-6, "{}", total);
    }
    #[test]
    fn vanishing_forward() {
        let initial = [0.25; STATES];
        let emissions = vec![[0.5; STATES], [0.0; STATES], [0.5; STATES]];
        assert_eq!(posterior(&initial, &TRANSITION, &emissions).unwrap_err(), 1);
    }
}
