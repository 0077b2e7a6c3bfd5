//! Derivative-free minimizers used by the parameter updates.
//! Both treat NaN as +infinity, so an objective can reject a point by returning `f64::INFINITY`.
mod brent;
mod simplex;
pub use brent::brent;
pub use simplex::{nelder_mead, Simplex};

/// The best point found within the budget.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum<T> {
    pub argmin: T,
    pub value: f64,
    pub iterations: usize,
}

fn sanitize(x: f64) -> f64 {
    if x.is_nan() {
        f64::INFINITY
    } else {
        x
    }
}
