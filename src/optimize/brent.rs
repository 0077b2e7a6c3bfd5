use super::{sanitize, Minimum};

// (3 - sqrt(5)) / 2
const GOLDEN: f64 = 0.381_966_011_250_105;

/// Minimize `f` on the closed bracket `[lower, upper]` by Brent's method,
/// i.e., golden section search accelerated by parabolic interpolation.
/// Stops when the bracket is narrower than the precision of `f64` around the current point
/// or after `max_iter` evaluations.
pub fn brent<F: FnMut(f64) -> f64>(
    mut f: F,
    lower: f64,
    upper: f64,
    max_iter: usize,
) -> Minimum<f64> {
    let tolerance = f64::EPSILON.sqrt();
    let (mut a, mut b) = (lower.min(upper), lower.max(upper));
    let mut x = a + GOLDEN * (b - a);
    let (mut w, mut v) = (x, x);
    let mut fx = sanitize(f(x));
    let (mut fw, mut fv) = (fx, fx);
    // Step taken by the last and the second last iteration.
    let (mut d, mut e) = (0f64, 0f64);
    let mut iterations = 0;
    while iterations < max_iter {
        let mid = (a + b) / 2.0;
        let tol1 = tolerance * x.abs() + tolerance / 4.0;
        let tol2 = 2.0 * tol1;
        if (x - mid).abs() <= tol2 - (b - a) / 2.0 {
            break;
        }
        iterations += 1;
        let mut golden = true;
        if e.abs() > tol1 {
            let r = (x - w) * (fx - fv);
            let q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            let mut q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            let prev_e = e;
            e = d;
            let acceptable = p.abs() < (0.5 * q * prev_e).abs() && q * (a - x) < p && p < q * (b - x);
            if acceptable {
                d = p / q;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = if x < mid { tol1 } else { -tol1 };
                }
                golden = false;
            }
        }
        if golden {
            e = if x >= mid { a - x } else { b - x };
            d = GOLDEN * e;
        }
        let u = if d.abs() >= tol1 {
            x + d
        } else if d > 0.0 {
            x + tol1
        } else {
            x - tol1
        };
        let fu = sanitize(f(u));
        if fu <= fx {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }
    Minimum {
        argmin: x,
        value: fx,
        iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn quadratic() {
        let min = brent(|x| (x - 2.0).powi(2) + 1.0, 0.0, 5.0, 100);
        assert!((min.argmin - 2.0).abs() < 1e-6, "{:?}", min);
        assert!((min.value - 1.0).abs() < 1e-10, "{:?}", min);
        let min = brent(|x| (x - 2.0).powi(2) + 1.0, 5.0, 0.0, 100);
        assert!((min.argmin - 2.0).abs() < 1e-6, "{:?}", min);
    }
    #[test]
    fn boundary_minimum() {
        let min = brent(|x| x, 1.0, 3.0, 200);
        assert!((min.argmin - 1.0).abs() < 1e-4, "{:?}", min);
    }
    #[test]
    fn non_smooth() {
        let min = brent(|x: f64| (x - 0.3).abs(), -1.0, 1.0, 200);
        assert!((min.argmin - 0.3).abs() < 1e-4, "{:?}", min);
    }
    #[test]
    fn rejected_region() {
        let f = |x: f64| if x < 0.5 { f64::NAN } else { (x - 1.0).powi(2) };
        let min = brent(f, 0.0, 4.0, 100);
        assert!((min.argmin - 1.0).abs() < 1e-6, "{:?}", min);
        assert!(min.value.is_finite());
    }
    #[test]
    fn iteration_cap() {
        let min = brent(|x| (x - 2.0).powi(2), 0.0, 5.0, 3);
        assert!(min.iterations <= 3);
        assert!(0.0 <= min.argmin && min.argmin <= 5.0);
    }
    #[test]
    fn log_gamma_shape() {
        // Minimizer of -ln L for the scale of an exponential with mean 1.5.
        let xs = [0.5, 1.0, 1.5, 2.0, 2.5];
        let nll = |theta: f64| xs.iter().map(|x| x / theta + theta.ln()).sum::<f64>();
        let min = brent(nll, 0.01, 10.0, 100);
        assert!((min.argmin - 1.5).abs() < 1e-5, "{:?}", min);
    }
}
