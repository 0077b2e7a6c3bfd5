use super::{sanitize, Minimum};

/// Nelder-Mead simplex search. Exposed step by step, so that a caller can inspect
/// the current best point after each iteration and stop the search on its own terms.
pub struct Simplex<F: FnMut(&[f64]) -> f64> {
    objective: F,
    vertices: Vec<Vec<f64>>,
    values: Vec<f64>,
    iterations: usize,
}

impl<F: FnMut(&[f64]) -> f64> Simplex<F> {
    /// The initial simplex is `start` and `start + step[i] * e_i` for each coordinate `i`.
    pub fn new(mut objective: F, start: &[f64], step: &[f64]) -> Self {
        assert_eq!(start.len(), step.len());
        let mut vertices = vec![start.to_vec()];
        for (i, s) in step.iter().enumerate() {
            let mut vertex = start.to_vec();
            vertex[i] += s;
            vertices.push(vertex);
        }
        let values = vertices.iter().map(|x| sanitize(objective(x))).collect();
        Self {
            objective,
            vertices,
            values,
            iterations: 0,
        }
    }
    pub fn dim(&self) -> usize {
        self.vertices.len() - 1
    }
    pub fn iterations(&self) -> usize {
        self.iterations
    }
    /// The best vertex and its value.
    pub fn best(&self) -> (&[f64], f64) {
        let lo = self.lowest();
        (self.vertices[lo].as_slice(), self.values[lo])
    }
    /// Root mean square distance of the vertices from their centroid.
    pub fn size(&self) -> f64 {
        let center = centroid(self.vertices.iter());
        let sum: f64 = self
            .vertices
            .iter()
            .map(|x| x.iter().zip(center.iter()).map(|(a, b)| (a - b).powi(2)).sum::<f64>())
            .sum();
        (sum / self.vertices.len() as f64).sqrt()
    }
    fn lowest(&self) -> usize {
        let mut lo = 0;
        for (i, &v) in self.values.iter().enumerate() {
            if v < self.values[lo] {
                lo = i;
            }
        }
        lo
    }
    /// Returns the indices of the highest and the second highest vertices.
    fn highest(&self) -> (usize, usize) {
        let (mut hi, mut second) = if self.values[0] < self.values[1] {
            (1, 0)
        } else {
            (0, 1)
        };
        for (i, &v) in self.values.iter().enumerate().skip(2) {
            if self.values[hi] < v {
                second = hi;
                hi = i;
            } else if self.values[second] < v {
                second = i;
            }
        }
        (hi, second)
    }
    // Move the `corner`-th vertex to `c + coef * (x - c)`, where c is the centroid of the others.
    fn corner_move(&mut self, corner: usize, coef: f64) -> (Vec<f64>, f64) {
        let others = self
            .vertices
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != corner)
            .map(|(_, x)| x);
        let center = centroid(others);
        let moved: Vec<_> = self.vertices[corner]
            .iter()
            .zip(center.iter())
            .map(|(x, c)| c + coef * (x - c))
            .collect();
        let value = sanitize((self.objective)(&moved));
        (moved, value)
    }
    fn shrink_to_best(&mut self) {
        let lo = self.lowest();
        let best = self.vertices[lo].clone();
        for i in (0..self.vertices.len()).filter(|&i| i != lo) {
            let shrunk: Vec<_> = self.vertices[i]
                .iter()
                .zip(best.iter())
                .map(|(x, b)| b + 0.5 * (x - b))
                .collect();
            self.values[i] = sanitize((self.objective)(&shrunk));
            self.vertices[i] = shrunk;
        }
    }
    pub fn iterate(&mut self) {
        self.iterations += 1;
        let (hi, second) = self.highest();
        let lo = self.lowest();
        let (reflected, value) = self.corner_move(hi, -1.0);
        if value < self.values[lo] {
            let (expanded, expanded_value) = self.corner_move(hi, -2.0);
            if expanded_value < value {
                self.vertices[hi] = expanded;
                self.values[hi] = expanded_value;
            } else {
                self.vertices[hi] = reflected;
                self.values[hi] = value;
            }
        } else if value > self.values[second] {
            if value <= self.values[hi] {
                self.vertices[hi] = reflected;
                self.values[hi] = value;
            }
            let (contracted, contracted_value) = self.corner_move(hi, 0.5);
            if contracted_value <= self.values[hi] {
                self.vertices[hi] = contracted;
                self.values[hi] = contracted_value;
            } else {
                self.shrink_to_best();
            }
        } else {
            self.vertices[hi] = reflected;
            self.values[hi] = value;
        }
    }
    pub fn into_minimum(self) -> Minimum<Vec<f64>> {
        let (argmin, value) = self.best();
        Minimum {
            argmin: argmin.to_vec(),
            value,
            iterations: self.iterations,
        }
    }
}

fn centroid<'a, I: Iterator<Item = &'a Vec<f64>>>(xs: I) -> Vec<f64> {
    let mut sum: Vec<f64> = vec![];
    let mut count = 0;
    for x in xs {
        if sum.is_empty() {
            sum = vec![0f64; x.len()];
        }
        sum.iter_mut().zip(x.iter()).for_each(|(s, x)| *s += x);
        count += 1;
    }
    sum.iter_mut().for_each(|s| *s /= count as f64);
    sum
}

/// Run the simplex search until its size falls below `tolerance` or `max_iter` iterations.
pub fn nelder_mead<F: FnMut(&[f64]) -> f64>(
    objective: F,
    start: &[f64],
    step: &[f64],
    max_iter: usize,
    tolerance: f64,
) -> Minimum<Vec<f64>> {
    let mut simplex = Simplex::new(objective, start, step);
    for _ in 0..max_iter {
        simplex.iterate();
        if simplex.size() < tolerance {
            break;
        }
    }
    simplex.into_minimum()
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn quadratic_2d() {
        let f = |x: &[f64]| (x[0] - 1.0).powi(2) + 3.0 * (x[1] + 2.0).powi(2);
        let min = nelder_mead(f, &[0.0, 0.0], &[0.1, 0.1], 500, 1e-8);
        assert!((min.argmin[0] - 1.0).abs() < 1e-4, "{:?}", min);
        assert!((min.argmin[1] + 2.0).abs() < 1e-4, "{:?}", min);
        assert!(min.value < 1e-7);
    }
    #[test]
    fn rosenbrock() {
        let f = |x: &[f64]| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let min = nelder_mead(f, &[-1.2, 1.0], &[0.1, 0.1], 2000, 1e-10);
        assert!((min.argmin[0] - 1.0).abs() < 1e-3, "{:?}", min);
        assert!((min.argmin[1] - 1.0).abs() < 1e-3, "{:?}", min);
    }
    #[test]
    fn one_dimensional() {
        let f = |x: &[f64]| (x[0] - 0.25).powi(2);
        let min = nelder_mead(f, &[3.0], &[0.001], 1000, 1e-9);
        assert!((min.argmin[0] - 0.25).abs() < 1e-5, "{:?}", min);
    }
    #[test]
    fn infeasible_region() {
        let f = |x: &[f64]| {
            if x[0] <= 0.0 {
                f64::INFINITY
            } else {
                (x[0].ln()).powi(2) + (x[1] - 1.0).powi(2)
            }
        };
        let min = nelder_mead(f, &[0.05, 0.0], &[0.01, 0.01], 1000, 1e-9);
        assert!(min.value.is_finite());
        assert!((min.argmin[0] - 1.0).abs() < 1e-3, "{:?}", min);
    }
    #[test]
    fn stepwise() {
        let f = |x: &[f64]| x[0] * x[0] + x[1] * x[1];
        let mut simplex = Simplex::new(f, &[1.0, 1.0], &[0.5, 0.5]);
        let (_, start) = simplex.best();
        let mut prev = start;
        for _ in 0..20 {
            simplex.iterate();
            let (_, value) = simplex.best();
            assert!(value <= prev);
            prev = value;
        }
        assert_eq!(simplex.iterations(), 20);
        assert_eq!(simplex.dim(), 2);
        assert!(prev < start);
    }
}
