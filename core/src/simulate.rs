//! Synthetic customer populations with known ground truth.
//!
//! RULE: nothing here calls a platform RNG. Every draw comes from a
//! `SimRng` seeded from the caller's seed, so one seed and one
//! `PopulationSpec` always give the same transactions.
//!
//! Each customer is acquired uniformly inside the acquisition window,
//! buys once at acquisition, then buys as a Poisson(λ) process until an
//! Exp(μ) dropout or the observation end, whichever comes first.
//! λ ~ Gamma(r, α), μ ~ Gamma(s, β); each amount is Gamma(p, ν) with
//! ν ~ Gamma(q, v).

use crate::{
    error::{ClvError, ClvResult},
    gamma_gamma::GammaGammaParams,
    pareto_nbd::ParetoNbdParams,
    transaction::{MemorySource, Transaction},
    types::TimeUnit,
};
use chrono::{DateTime, Duration, Utc};
use rand::SeedableRng;
use rand_distr::{Distribution, Exp1, Gamma};
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};

/// Bounds runaway loops when a sampled purchase rate is extreme.
pub const MAX_PURCHASES_PER_CUSTOMER: usize = 10_000;

/// A deterministic RNG stream.
pub struct SimRng {
    inner: Pcg64Mcg,
}

impl SimRng {
    /// Streams with different indices from the same seed are independent.
    pub fn new(seed: u64, stream: u64) -> Self {
        let derived_seed = seed ^ stream.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        use rand::RngCore;
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Gamma with the given shape and rate (not scale).
    pub fn gamma(&mut self, shape: f64, rate: f64) -> ClvResult<f64> {
        let dist = Gamma::new(shape, 1.0 / rate).map_err(|e| {
            ClvError::InvalidArgument(format!("gamma(shape={shape}, rate={rate}): {e}"))
        })?;
        Ok(dist.sample(&mut self.inner))
    }

    /// Exponential waiting time with the given rate. Infinite for rate 0.
    pub fn exponential(&mut self, rate: f64) -> f64 {
        let unit: f64 = Exp1.sample(&mut self.inner);
        unit / rate
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PopulationSpec {
    pub customers:          usize,
    pub timing:             ParetoNbdParams,
    pub monetary:           GammaGammaParams,
    pub observation_start:  DateTime<Utc>,
    /// Customers are acquired during [0, acquisition_window).
    pub acquisition_window: f64,
    /// Observation end, measured from `observation_start`.
    pub observation_length: f64,
    pub time_unit:          TimeUnit,
}

#[derive(Debug, Clone)]
pub struct SimulatedPopulation {
    pub transactions:    Vec<Transaction>,
    pub observation_end: DateTime<Utc>,
}

impl SimulatedPopulation {
    pub fn into_source(self) -> MemorySource {
        MemorySource::from_transactions(self.transactions)
    }
}

pub fn customer_id(index: usize) -> String {
    format!("SIM-{index:05}")
}

pub fn simulate_population(spec: &PopulationSpec, seed: u64) -> ClvResult<SimulatedPopulation> {
    if spec.acquisition_window <= 0.0 || spec.observation_length < spec.acquisition_window {
        return Err(ClvError::InvalidArgument(format!(
            "need 0 < acquisition_window <= observation_length, got {} and {}",
            spec.acquisition_window, spec.observation_length
        )));
    }

    let ParetoNbdParams { r, alpha, s, beta } = spec.timing;
    let GammaGammaParams { p, q, v } = spec.monetary;
    let unit_ms = spec.time_unit.seconds() * 1000.0;
    let at = |offset: f64| spec.observation_start + Duration::milliseconds((offset * unit_ms).round() as i64);

    let mut rng = SimRng::new(seed, 0);
    let mut transactions = Vec::new();

    for i in 0..spec.customers {
        let id = customer_id(i);
        let birth = rng.next_f64() * spec.acquisition_window;
        let age = spec.observation_length - birth;

        let lambda = rng.gamma(r, alpha)?;
        let mu = rng.gamma(s, beta)?;
        let active_until = rng.exponential(mu).min(age);
        let spend_rate = rng.gamma(q, v)?;

        let mut elapsed = 0.0;
        let mut purchases = 0;
        loop {
            let amount = rng.gamma(p, spend_rate)?;
            transactions.push(Transaction::new(id.clone(), at(birth + elapsed), amount));
            purchases += 1;

            elapsed += rng.exponential(lambda);
            if elapsed >= active_until || purchases >= MAX_PURCHASES_PER_CUSTOMER {
                break;
            }
        }
    }

    log::debug!(
        "simulated {} customers, {} transactions",
        spec.customers,
        transactions.len()
    );
    Ok(SimulatedPopulation {
        transactions,
        observation_end: at(spec.observation_length),
    })
}
