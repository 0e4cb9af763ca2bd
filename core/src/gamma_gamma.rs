//! Gamma–Gamma monetary-value model.
//!
//! Each transaction value is Gamma(p, ν) for a customer-specific rate ν,
//! and ν ~ Gamma(q, v) across the population. Spend is assumed
//! independent of the purchase-timing process.

use crate::{
    error::{ClvError, ClvResult},
    optimize::{FitOptions, NelderMead},
    special::ln_gamma,
};
use serde::{Deserialize, Serialize};

pub const MODEL_NAME: &str = "gamma_gamma";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GammaGammaParams {
    pub p: f64,
    pub q: f64,
    pub v: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GammaGammaFit {
    pub params:             GammaGammaParams,
    pub neg_log_likelihood: f64,
    pub iterations:         usize,
    /// Customers with at least one repeat purchase.
    pub customers:          usize,
}

impl GammaGammaParams {
    /// q must exceed 1, otherwise the population mean spend is infinite.
    pub fn new(p: f64, q: f64, v: f64) -> ClvResult<Self> {
        let valid = p.is_finite() && p > 0.0 && q.is_finite() && q > 1.0 && v.is_finite() && v > 0.0;
        if !valid {
            return Err(ClvError::InvalidArgument(format!(
                "{MODEL_NAME} parameters need p > 0, q > 1, v > 0; got p={p} q={q} v={v}"
            )));
        }
        Ok(Self { p, q, v })
    }

    /// θ = (ln p, ln(q − 1), ln v).
    fn from_log(theta: &[f64]) -> Self {
        Self {
            p: theta[0].exp(),
            q: 1.0 + theta[1].exp(),
            v: theta[2].exp(),
        }
    }

    /// E[transaction value] across the population: p·v / (q − 1).
    pub fn population_mean_value(&self) -> f64 {
        self.p * self.v / (self.q - 1.0)
    }

    /// Log density of observing mean spend `m` over `x` repeat purchases.
    pub fn log_likelihood(&self, x: f64, m: f64) -> f64 {
        let Self { p, q, v } = *self;
        let px = p * x;
        ln_gamma(px + q) - ln_gamma(px) - ln_gamma(q) + q * v.ln() + (px - 1.0) * m.ln() + px * x.ln()
            - (px + q) * (x * m + v).ln()
    }

    /// Posterior mean of the customer's average transaction value.
    ///
    /// Blends the population mean and the observed mean with weight
    /// p·x / (p·x + q − 1) on the observed side; with no repeat purchases
    /// this is the population mean.
    pub fn conditional_expected_average_value(&self, x: f64, m: f64) -> f64 {
        let Self { p, q, .. } = *self;
        let individual_weight = p * x / (p * x + q - 1.0);
        let value = (1.0 - individual_weight) * self.population_mean_value() + individual_weight * m;
        value.max(0.0)
    }
}

/// Fit (p, q, v). Rows without repeat purchases, or with no positive
/// spend to average, carry no monetary information and are skipped.
///
/// The penalty applies to θ = (ln p, ln(q − 1), ln v). A penalty on q
/// itself pulls q onto its bound at 1, where the population mean spend
/// p·v / (q − 1) diverges.
pub fn fit(frequency: &[f64], monetary_value: &[f64], options: &FitOptions) -> ClvResult<GammaGammaFit> {
    if frequency.len() != monetary_value.len() {
        return Err(ClvError::InvalidArgument(format!(
            "column lengths differ: frequency={} monetary_value={}",
            frequency.len(),
            monetary_value.len()
        )));
    }

    let (x, m): (Vec<f64>, Vec<f64>) = frequency
        .iter()
        .zip(monetary_value)
        .filter(|(f, mv)| **f > 0.0 && **mv > 0.0 && f.is_finite() && mv.is_finite())
        .map(|(f, mv)| (*f, *mv))
        .unzip();

    let n = x.len();
    if n < options.min_customers {
        return Err(ClvError::InsufficientData {
            model:    MODEL_NAME,
            required: options.min_customers,
            found:    n,
        });
    }
    log::debug!("{MODEL_NAME}: {n} of {} customers have repeat spend", frequency.len());

    let penalizer = options.penalizer_coef;
    let objective = |theta: &[f64]| {
        let params = GammaGammaParams::from_log(theta);
        let total: f64 = x.iter().zip(&m).map(|(xi, mi)| params.log_likelihood(*xi, *mi)).sum();
        -total / n as f64 + penalizer * theta.iter().map(|t| t * t).sum::<f64>()
    };

    let minimum = NelderMead::from_options(options).minimize(objective, &[0.0; 3]);
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

    let params = GammaGammaParams::from_log(&minimum.point);
    if !params.population_mean_value().is_finite() {
        log::warn!("{MODEL_NAME}: optimum has q = {} (infinite mean spend)", params.q);
        return Err(ClvError::FitConvergence {
            model:      MODEL_NAME,
            iterations: minimum.iterations,
        });
    }
    log::info!(
        "{MODEL_NAME}: fitted p={:.4} q={:.4} v={:.4} on {n} customers ({} iterations)",
        params.p, params.q, params.v, minimum.iterations
    );
    Ok(GammaGammaFit {
        params,
        neg_log_likelihood: minimum.value,
        iterations: minimum.iterations,
        customers: n,
    })
}
