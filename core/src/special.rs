//! Log-space special functions for the likelihoods.
//!
//! Everything here returns natural logarithms so that the large powers
//! in the Pareto/NBD terms (`(α + T)^(r + x)` and friends) never
//! materialize as raw floats.

pub use statrs::function::gamma::ln_gamma;

const SERIES_EPSILON: f64 = 1e-16;
const SERIES_MAX_TERMS: usize = 100_000;

const QUADRATURE_PANELS: usize = 64;
/// Absolute error target per unit width, relative to the rescaled peak of 1.
const QUADRATURE_EPSILON: f64 = 1e-13;
const QUADRATURE_MAX_DEPTH: usize = 30;

/// ln(eᵃ + eᵇ).
pub fn ln_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// ln(eᵃ − eᵇ) for a ≥ b. Returns −∞ when the difference is zero
/// or negative.
pub fn ln_sub_exp(a: f64, b: f64) -> f64 {
    if b == f64::NEG_INFINITY {
        return a;
    }
    if b >= a {
        return f64::NEG_INFINITY;
    }
    a + (-(b - a).exp_m1()).ln()
}

/// ln ₂F₁(a, b; a + 1; z) for a > 0, b > 0 and 0 ≤ z < 1.
///
/// Evaluated through Euler's transformation
/// ₂F₁(a, b; c; z) = (1 − z)^(c − a − b) ₂F₁(c − a, c − b; c; z),
/// which for c = a + 1 leaves the series ₂F₁(1, a + 1 − b; a + 1; z).
/// Its terms are positive, start at 1 and shrink by at least a factor
/// of z each step, so the sum cannot overflow however large `b` is.
///
/// The series needs on the order of 1 / (1 − z) terms, so callers
/// should keep z well below 1 (see `ln_integral_exp` for the rest).
/// Outside that domain (including NaN inputs from an optimizer probing
/// extreme parameters), or when the term budget runs out before the
/// tail is negligible, the result is NaN.
pub fn ln_hyp2f1_shifted(a: f64, b: f64, z: f64) -> f64 {
    if !(a > 0.0 && b > 0.0 && a.is_finite() && b.is_finite() && (0.0..1.0).contains(&z)) {
        return f64::NAN;
    }
    if z == 0.0 {
        return 0.0;
    }

    let c = a + 1.0;
    let e = c - b;
    let tail_factor = z / (1.0 - z);

    let mut term = 1.0;
    let mut sum = 1.0;
    let mut converged = false;
    for n in 0..SERIES_MAX_TERMS {
        let n = n as f64;
        term *= (e + n) / (c + n) * z;
        sum += term;
        if term.abs() * tail_factor <= SERIES_EPSILON * sum.abs() {
            converged = true;
            break;
        }
    }
    if !converged {
        return f64::NAN;
    }

    (1.0 - b) * (-z).ln_1p() + sum.ln()
}

/// ln ∫ exp(ln_f(u)) du over [lo, hi], by adaptive Simpson on panels
/// of a fixed grid.
///
/// The integrand is rescaled by its largest grid value first, so peaks
/// far outside the f64 range are fine as long as `ln_f` is finite.
/// Returns −∞ for an empty interval and NaN if `ln_f` is NaN anywhere
/// on the grid.
pub fn ln_integral_exp<F>(ln_f: F, lo: f64, hi: f64) -> f64
where
    F: Fn(f64) -> f64,
{
    if !(lo.is_finite() && hi.is_finite()) {
        return f64::NAN;
    }
    if hi <= lo {
        return f64::NEG_INFINITY;
    }

    let width = (hi - lo) / QUADRATURE_PANELS as f64;
    let nodes: Vec<f64> = (0..=2 * QUADRATURE_PANELS)
        .map(|k| ln_f(lo + 0.5 * width * k as f64))
        .collect();
    if nodes.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let shift = nodes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if shift == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if !shift.is_finite() {
        return f64::NAN;
    }

    let f = |u: f64| (ln_f(u) - shift).exp();
    let mut total = 0.0;
    for panel in 0..QUADRATURE_PANELS {
        let a = lo + width * panel as f64;
        let b = a + width;
        let p = Panel::new(
            a,
            b,
            (nodes[2 * panel] - shift).exp(),
            (nodes[2 * panel + 1] - shift).exp(),
            (nodes[2 * panel + 2] - shift).exp(),
        );
        total += adaptive_simpson(&f, p, QUADRATURE_EPSILON * width, 0);
    }
    if !(total.is_finite() && total > 0.0) {
        return if total == 0.0 { f64::NEG_INFINITY } else { f64::NAN };
    }
    shift + total.ln()
}

/// One Simpson interval: endpoints, endpoint and midpoint values, and
/// its three-point estimate.
#[derive(Clone, Copy)]
struct Panel {
    a:     f64,
    b:     f64,
    fa:    f64,
    fm:    f64,
    fb:    f64,
    whole: f64,
}

impl Panel {
    fn new(a: f64, b: f64, fa: f64, fm: f64, fb: f64) -> Self {
        Self { a, b, fa, fm, fb, whole: (b - a) / 6.0 * (fa + 4.0 * fm + fb) }
    }
}

fn adaptive_simpson<F>(f: &F, p: Panel, eps: f64, depth: usize) -> f64
where
    F: Fn(f64) -> f64,
{
    let m = 0.5 * (p.a + p.b);
    let left = Panel::new(p.a, m, p.fa, f(0.5 * (p.a + m)), p.fm);
    let right = Panel::new(m, p.b, p.fm, f(0.5 * (m + p.b)), p.fb);
    let delta = left.whole + right.whole - p.whole;
    if depth >= QUADRATURE_MAX_DEPTH || delta.abs() <= 15.0 * eps {
        return left.whole + right.whole + delta / 15.0;
    }
    adaptive_simpson(f, left, 0.5 * eps, depth + 1) + adaptive_simpson(f, right, 0.5 * eps, depth + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct power series, fine for small z and small b.
    fn naive_hyp2f1(a: f64, b: f64, c: f64, z: f64) -> f64 {
        let mut term = 1.0;
        let mut sum = 1.0;
        for n in 0..10_000 {
            let n = n as f64;
            term *= (a + n) * (b + n) / ((c + n) * (n + 1.0)) * z;
            sum += term;
            if term.abs() < 1e-17 * sum {
                break;
            }
        }
        sum
    }

    #[test]
    fn shifted_series_matches_direct_series() {
        for &(a, b, z) in &[(2.5, 1.5, 0.3), (4.0, 3.0, 0.6), (1.2, 2.2, 0.05), (10.0, 1.7, 0.8)] {
            let expected = naive_hyp2f1(a, b, a + 1.0, z).ln();
            let actual = ln_hyp2f1_shifted(a, b, z);
            assert!(
                (expected - actual).abs() < 1e-10,
                "a={a} b={b} z={z}: expected {expected}, got {actual}"
            );
        }
    }

    #[test]
    fn shifted_series_stays_finite_for_large_b() {
        let v = ln_hyp2f1_shifted(402.0, 400.5, 0.95);
        assert!(v.is_finite() && v > 0.0, "got {v}");
    }

    #[test]
    fn shifted_series_is_nan_outside_domain() {
        assert!(ln_hyp2f1_shifted(2.0, 1.0, 1.0).is_nan());
        assert!(ln_hyp2f1_shifted(2.0, f64::INFINITY, 0.5).is_nan());
        assert!(ln_hyp2f1_shifted(2.0, 1.0, f64::NAN).is_nan());
    }

    /// Near z = 1 the series needs millions of terms; it must say so
    /// instead of returning the truncated sum.
    #[test]
    fn shifted_series_is_nan_when_budget_runs_out() {
        assert!(ln_hyp2f1_shifted(1.0, 0.5, 1.0 - 1e-7).is_nan());
    }

    #[test]
    fn integral_matches_closed_forms() {
        // ∫₀¹ eᵘ du = e − 1
        let v = ln_integral_exp(|u| u, 0.0, 1.0);
        assert!((v - (std::f64::consts::E - 1.0).ln()).abs() < 1e-12, "got {v}");

        // Peaks far beyond f64 range: ∫₀¹ e^(2000 − 50u) du
        let v = ln_integral_exp(|u| 2000.0 - 50.0 * u, 0.0, 1.0);
        let expected = 2000.0 + ((1.0 - (-50f64).exp()) / 50.0).ln();
        assert!((v - expected).abs() < 1e-10, "got {v}, expected {expected}");

        assert_eq!(ln_integral_exp(|u| u, 1.0, 1.0), f64::NEG_INFINITY);
        assert!(ln_integral_exp(|_| f64::NAN, 0.0, 1.0).is_nan());
    }

    #[test]
    fn log_sum_helpers() {
        assert!((ln_add_exp(0.0, 0.0) - 2f64.ln()).abs() < 1e-15);
        assert_eq!(ln_add_exp(f64::NEG_INFINITY, 1.5), 1.5);
        assert!((ln_sub_exp(2f64.ln(), 0.0)).abs() < 1e-15);
        assert_eq!(ln_sub_exp(1.0, 1.0), f64::NEG_INFINITY);
        assert_eq!(ln_sub_exp(1.0, f64::NEG_INFINITY), 1.0);
    }
}
