//! Pareto/NBD purchase-timing model.
//!
//! While alive, a customer buys as a Poisson process with rate λ and
//! drops out after an exponential lifetime with rate μ. Across the
//! population λ ~ Gamma(r, α) and μ ~ Gamma(s, β), independently.
//!
//! Inputs per customer: x = repeat purchases, t_x = recency and T = age,
//! all in the same time unit.

use crate::{
    error::{ClvError, ClvResult},
    optimize::{FitOptions, NelderMead},
    special::{ln_add_exp, ln_gamma, ln_hyp2f1_shifted, ln_integral_exp, ln_sub_exp},
};
use serde::{Deserialize, Serialize};

pub const MODEL_NAME: &str = "pareto_nbd";

/// Below this distance from 1, s is treated as exactly 1 in the
/// conditional expectation (the closed form has a removable 0/0 there).
const UNIT_SHAPE_EPSILON: f64 = 1e-9;

/// Largest ₂F₁ argument handed to the series in `ln_a0`.
const SERIES_Z_LIMIT: f64 = 0.9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ParetoNbdParams {
    pub r:     f64,
    pub alpha: f64,
    pub s:     f64,
    pub beta:  f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ParetoNbdFit {
    pub params:             ParetoNbdParams,
    /// Penalized mean negative log-likelihood at the optimum.
    pub neg_log_likelihood: f64,
    pub iterations:         usize,
    pub customers:          usize,
}

impl ParetoNbdParams {
    pub fn new(r: f64, alpha: f64, s: f64, beta: f64) -> ClvResult<Self> {
        for (name, v) in [("r", r), ("alpha", alpha), ("s", s), ("beta", beta)] {
            if !(v.is_finite() && v > 0.0) {
                return Err(ClvError::InvalidArgument(format!(
                    "{MODEL_NAME} parameter {name} must be positive, got {v}"
                )));
            }
        }
        Ok(Self { r, alpha, s, beta })
    }

    fn from_log(theta: &[f64]) -> Self {
        Self {
            r:     theta[0].exp(),
            alpha: theta[1].exp(),
            s:     theta[2].exp(),
            beta:  theta[3].exp(),
        }
    }

    fn sum_of_squares(&self) -> f64 {
        self.r.powi(2) + self.alpha.powi(2) + self.s.powi(2) + self.beta.powi(2)
    }

    /// Population mean purchase rate, E[λ] = r / α.
    pub fn mean_purchase_rate(&self) -> f64 {
        self.r / self.alpha
    }

    /// Population mean dropout rate, E[μ] = s / β.
    pub fn mean_dropout_rate(&self) -> f64 {
        self.s / self.beta
    }

    /// ln A₀, the dropout-inside-(t_x, T] term of the likelihood.
    /// −∞ when t_x = T: there is no interval left to drop out in.
    ///
    /// A₀ = (r + s + x)·∫ (α+τ)^−(r+x) (β+τ)^−(s+1) dτ over (t_x, T].
    /// The closed form goes through ₂F₁ at z = |α − β| / (max(α, β) + t_x);
    /// past `SERIES_Z_LIMIT` that series is too slow and the integral is
    /// evaluated directly instead.
    fn ln_a0(&self, x: f64, t_x: f64, t: f64) -> f64 {
        if t_x >= t {
            return f64::NEG_INFINITY;
        }
        let Self { r, alpha, s, beta } = *self;
        let rsx = r + s + x;
        let (max_ab, diff, b) = if alpha < beta {
            (beta, beta - alpha, r + x)
        } else {
            (alpha, alpha - beta, s + 1.0)
        };
        let q1 = max_ab + t_x;
        let q2 = max_ab + t;
        if diff / q1 > SERIES_Z_LIMIT {
            return rsx.ln() + self.ln_dropout_integral(x, t_x, t);
        }
        let at_recency = ln_hyp2f1_shifted(rsx, b, diff / q1) - rsx * q1.ln();
        let at_age = ln_hyp2f1_shifted(rsx, b, diff / q2) - rsx * q2.ln();
        ln_sub_exp(at_recency, at_age)
    }

    /// ln ∫ (α+τ)^−(r+x) (β+τ)^−(s+1) dτ over (t_x, T], integrated in
    /// u = ln(min(α, β) + τ) so the near-singular end at small α or β is
    /// spread over a wide range of u.
    fn ln_dropout_integral(&self, x: f64, t_x: f64, t: f64) -> f64 {
        let Self { r, alpha, s, beta } = *self;
        let m = alpha.min(beta);
        let (ln_da, ln_db) = ((alpha - m).ln(), (beta - m).ln());
        let ln_integrand = |u: f64| u - (r + x) * ln_add_exp(ln_da, u) - (s + 1.0) * ln_add_exp(ln_db, u);
        ln_integral_exp(ln_integrand, (m + t_x).ln(), (m + t).ln())
    }

    /// ln of the "still alive at T" weight shared by the likelihood and
    /// the conditional expectation.
    fn ln_alive_term(&self, x: f64, t: f64) -> f64 {
        let Self { r, alpha, s, beta } = *self;
        ln_gamma(r + x) - ln_gamma(r) + r * alpha.ln() + s * beta.ln()
            - (r + x) * (alpha + t).ln()
            - s * (beta + t).ln()
    }

    /// Unpenalized log-likelihood of one customer's (x, t_x, T).
    pub fn log_likelihood(&self, x: f64, t_x: f64, t: f64) -> f64 {
        let Self { r, alpha, s, beta } = *self;
        let rsx = r + s + x;
        let a1 = ln_gamma(r + x) - ln_gamma(r) + r * alpha.ln() + s * beta.ln();
        let alive = -(r + x) * (alpha + t).ln() - s * (beta + t).ln();
        let dropped = s.ln() + self.ln_a0(x, t_x, t) - rsx.ln();
        a1 + ln_add_exp(alive, dropped)
    }

    /// P(alive at T | x, t_x, T).
    ///
    /// A customer whose last purchase is at T (including T = 0, a
    /// single purchase at the observation end) is alive with certainty.
    pub fn probability_alive(&self, x: f64, t_x: f64, t: f64) -> f64 {
        if t_x >= t {
            return 1.0;
        }
        let Self { r, alpha, s, beta } = *self;
        let rsx = r + s + x;
        let ln_odds_dead = s.ln() - rsx.ln()
            + (r + x) * (alpha + t).ln()
            + s * (beta + t).ln()
            + self.ln_a0(x, t_x, t);
        (1.0 / (1.0 + ln_odds_dead.exp())).clamp(0.0, 1.0)
    }

    /// Expected purchases in (T, T + periods] given (x, t_x, T).
    pub fn conditional_expected_transactions(
        &self,
        periods: f64,
        x: f64,
        t_x: f64,
        t: f64,
    ) -> ClvResult<f64> {
        if !(periods.is_finite() && periods > 0.0) {
            return Err(ClvError::InvalidArgument(format!(
                "periods must be positive, got {periods}"
            )));
        }
        Ok(self.expected_purchases_after(periods, x, t_x, t))
    }

    /// Cumulative expectations for 1, 2, …, `periods`.
    pub fn expected_cumulative_transactions(
        &self,
        periods: u32,
        x: f64,
        t_x: f64,
        t: f64,
    ) -> ClvResult<Vec<f64>> {
        if periods == 0 {
            return Err(ClvError::InvalidArgument("periods must be positive".into()));
        }
        Ok((1..=periods)
            .map(|i| self.expected_purchases_after(f64::from(i), x, t_x, t))
            .collect())
    }

    /// Same as `conditional_expected_transactions` but total over
    /// `horizon ≥ 0`, returning 0 for an empty horizon.
    pub(crate) fn expected_purchases_after(&self, horizon: f64, x: f64, t_x: f64, t: f64) -> f64 {
        if horizon <= 0.0 {
            return 0.0;
        }
        let Self { r, alpha, s, beta } = *self;
        let ln_p_alive = self.ln_alive_term(x, t) - self.log_likelihood(x, t_x, t);
        let ln_rate = (r + x).ln() + (beta + t).ln() - (alpha + t).ln();

        let u = (horizon / (beta + t)).ln_1p();
        let k = 1.0 - s;
        let ln_lifetime = if k.abs() < UNIT_SHAPE_EPSILON {
            u.ln()
        } else {
            ((k * u).exp_m1() / k).ln()
        };

        (ln_p_alive + ln_rate + ln_lifetime).exp()
    }
}

/// Fit (r, α, s, β) by penalized maximum likelihood.
pub fn fit(
    frequency: &[f64],
    recency: &[f64],
    t: &[f64],
    options: &FitOptions,
) -> ClvResult<ParetoNbdFit> {
    let n = frequency.len();
    if recency.len() != n || t.len() != n {
        return Err(ClvError::InvalidArgument(format!(
            "column lengths differ: frequency={n} recency={} T={}",
            recency.len(),
            t.len()
        )));
    }
    if n < options.min_customers {
        return Err(ClvError::InsufficientData {
            model:    MODEL_NAME,
            required: options.min_customers,
            found:    n,
        });
    }
    for i in 0..n {
        let (x, t_x, age) = (frequency[i], recency[i], t[i]);
        let valid = x.is_finite() && x >= 0.0 && t_x.is_finite() && t_x >= 0.0 && age.is_finite() && t_x <= age;
        if !valid {
            return Err(ClvError::InvalidArgument(format!(
                "row {i}: need 0 <= recency <= T and frequency >= 0, got x={x} t_x={t_x} T={age}"
            )));
        }
    }

    let penalizer = options.penalizer_coef;
    let objective = |theta: &[f64]| {
        let params = ParetoNbdParams::from_log(theta);
        let total: f64 = (0..n)
            .map(|i| params.log_likelihood(frequency[i], recency[i], t[i]))
            .sum();
        -total / n as f64 + penalizer * params.sum_of_squares()
    };

    let minimum = NelderMead::from_options(options).minimize(objective, &[0.0; 4]);
    if !minimum.converged || !minimum.value.is_finite() {
        log::warn!(
            "{MODEL_NAME}: no convergence after {} iterations (objective {})",
            minimum.iterations, minimum.value
        );
        return Err(ClvError::FitConvergence {
            model:      MODEL_NAME,
            iterations: minimum.iterations,
        });
    }

    let params = ParetoNbdParams::from_log(&minimum.point);
    log::info!(
        "{MODEL_NAME}: fitted r={:.4} alpha={:.4} s={:.4} beta={:.4} on {n} customers ({} iterations)",
        params.r, params.alpha, params.s, params.beta, minimum.iterations
    );
    Ok(ParetoNbdFit {
        params,
        neg_log_likelihood: minimum.value,
        iterations: minimum.iterations,
        customers: n,
    })
}
