//! The CLV engine: owns the fitted model state and answers
//! per-customer queries against it.
//!
//! STATE MACHINE:
//!   Unfitted --fit ok--> Fitted --fit ok--> Fitted (parameters replaced)
//!   A failed fit never touches the current state.
//!
//! RULES:
//!   - Both models are fit from the same transaction snapshot and the
//!     same observation end, then swapped in together.
//!   - Fits are serialized by `fit_lock`; the optimization runs without
//!     holding the state lock, so queries keep answering from the
//!     previous parameters until the swap.
//!   - "Now" is always a parameter. Nothing in here reads the clock.

use crate::{
    clv,
    config::EngineConfig,
    error::{ClvError, ClvResult},
    gamma_gamma::{self, GammaGammaFit, GammaGammaParams},
    optimize::FitOptions,
    pareto_nbd::{self, ParetoNbdFit, ParetoNbdParams},
    rfm::{self, RfmSummary, RfmTable},
    transaction::{load_transactions, TransactionSource},
    types::{FitId, TimeUnit},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FittedModels {
    pub timing:   ParetoNbdParams,
    pub monetary: GammaGammaParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ModelState {
    #[default]
    Unfitted,
    Fitted(FittedModels),
}

/// Everything a successful fit produced. Persisted by the store so a
/// restarted process can `restore` without refitting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FitReport {
    pub fit_id:          FitId,
    pub observation_end: DateTime<Utc>,
    pub time_unit:       TimeUnit,
    pub penalizer_coef:  f64,
    pub timing:          ParetoNbdFit,
    pub monetary:        GammaGammaFit,
}

impl FitReport {
    pub fn models(&self) -> FittedModels {
        FittedModels {
            timing:   self.timing.params,
            monetary: self.monetary.params,
        }
    }
}

pub struct ClvEngine {
    config:   EngineConfig,
    state:    RwLock<ModelState>,
    fit_lock: Mutex<()>,
}

impl ClvEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: RwLock::new(ModelState::Unfitted),
            fit_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> ModelState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self.state(), ModelState::Fitted(_))
    }

    /// Current parameter pair, if any fit has succeeded.
    pub fn fitted_params(&self) -> Option<FittedModels> {
        match self.state() {
            ModelState::Fitted(models) => Some(models),
            ModelState::Unfitted => None,
        }
    }

    /// Adopt the parameters of a previously persisted fit.
    pub fn restore(&self, report: &FitReport) -> ClvResult<()> {
        if report.time_unit != self.config.time_unit {
            return Err(ClvError::Config(format!(
                "fit {} was made in {}s, engine is configured for {}s",
                report.fit_id,
                report.time_unit.name(),
                self.config.time_unit.name()
            )));
        }
        let t = report.timing.params;
        let m = report.monetary.params;
        let models = FittedModels {
            timing:   ParetoNbdParams::new(t.r, t.alpha, t.s, t.beta)?,
            monetary: GammaGammaParams::new(m.p, m.q, m.v)?,
        };
        let _guard = self.fit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.swap_state(models);
        log::info!("restored fit {} (observation end {})", report.fit_id, report.observation_end);
        Ok(())
    }

    // ── Fit ───────────────────────────────────────────────────────

    /// Fit both models on every transaction up to `observation_end`.
    pub fn fit(
        &self,
        source: &dyn TransactionSource,
        observation_end: DateTime<Utc>,
    ) -> ClvResult<FitReport> {
        let _guard = self.fit_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let transactions = load_transactions(source)?;
        let rows = rfm::summarize(&transactions, observation_end, self.config.time_unit);
        if rows.is_empty() {
            // Everything was dated after the observation end.
            return Err(ClvError::EmptyDataset);
        }
        let table = RfmTable::from(&rows);
        log::debug!(
            "fitting on {} customers / {} transactions, observation end {observation_end}",
            table.len(),
            transactions.len()
        );

        let timing = pareto_nbd::fit(
            &table.frequency,
            &table.recency,
            &table.t,
            &FitOptions::timing(&self.config),
        )?;
        let monetary = gamma_gamma::fit(
            &table.frequency,
            &table.monetary_value,
            &FitOptions::monetary(&self.config),
        )?;

        let report = FitReport {
            fit_id: Uuid::new_v4().to_string(),
            observation_end,
            time_unit: self.config.time_unit,
            penalizer_coef: self.config.penalizer_coef,
            timing,
            monetary,
        };
        self.swap_state(report.models());
        log::info!(
            "fit {} complete: {} timing customers, {} monetary customers",
            report.fit_id, timing.customers, monetary.customers
        );
        Ok(report)
    }

    fn swap_state(&self, models: FittedModels) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = ModelState::Fitted(models);
    }

    // ── Queries ───────────────────────────────────────────────────

    /// RFM row for one customer. Unknown and transactionless customers
    /// get the all-zero row; this never needs a fitted model.
    pub fn customer_summary(
        &self,
        source: &dyn TransactionSource,
        customer_id: &str,
        observation_end: DateTime<Utc>,
    ) -> ClvResult<RfmSummary> {
        let transactions = source.customer_transactions(customer_id)?;
        Ok(rfm::summarize_customer(
            &transactions,
            customer_id,
            observation_end,
            self.config.time_unit,
        ))
    }

    pub fn probability_alive(
        &self,
        source: &dyn TransactionSource,
        customer_id: &str,
        observation_end: DateTime<Utc>,
    ) -> ClvResult<f64> {
        let models = self.models()?;
        let s = self.model_input(source, customer_id, observation_end)?;
        Ok(models.timing.probability_alive(s.frequency, s.recency, s.t))
    }

    /// Expected purchases in the next `periods` time units.
    pub fn conditional_expected_transactions(
        &self,
        source: &dyn TransactionSource,
        customer_id: &str,
        periods: u32,
        observation_end: DateTime<Utc>,
    ) -> ClvResult<f64> {
        let models = self.models()?;
        let s = self.model_input(source, customer_id, observation_end)?;
        models
            .timing
            .conditional_expected_transactions(f64::from(periods), s.frequency, s.recency, s.t)
    }

    /// Element i is the expected purchase count through period i + 1.
    pub fn expected_cumulative_transactions(
        &self,
        source: &dyn TransactionSource,
        customer_id: &str,
        periods: u32,
        observation_end: DateTime<Utc>,
    ) -> ClvResult<Vec<f64>> {
        let models = self.models()?;
        let s = self.model_input(source, customer_id, observation_end)?;
        models
            .timing
            .expected_cumulative_transactions(periods, s.frequency, s.recency, s.t)
    }

    pub fn expected_average_value(
        &self,
        source: &dyn TransactionSource,
        customer_id: &str,
        observation_end: DateTime<Utc>,
    ) -> ClvResult<f64> {
        let models = self.models()?;
        let s = self.model_input(source, customer_id, observation_end)?;
        Ok(models
            .monetary
            .conditional_expected_average_value(s.frequency, s.monetary_value))
    }

    /// Undiscounted CLV over `horizon` months.
    pub fn customer_lifetime_value(
        &self,
        source: &dyn TransactionSource,
        customer_id: &str,
        horizon: u32,
        observation_end: DateTime<Utc>,
    ) -> ClvResult<f64> {
        let models = self.models()?;
        let s = self.model_input(source, customer_id, observation_end)?;
        clv::customer_lifetime_value(
            &models.timing,
            &models.monetary,
            &s,
            horizon,
            self.config.time_unit,
        )
    }

    fn models(&self) -> ClvResult<FittedModels> {
        self.fitted_params().ok_or(ClvError::ModelNotFitted)
    }

    /// RFM row for a model query. Unlike `customer_summary`, a missing
    /// customer or an empty history is an error here.
    fn model_input(
        &self,
        source: &dyn TransactionSource,
        customer_id: &str,
        observation_end: DateTime<Utc>,
    ) -> ClvResult<RfmSummary> {
        let transactions = source.customer_transactions(customer_id)?;
        if !transactions.iter().any(|t| t.date <= observation_end) {
            return Err(if source.customer_exists(customer_id)? {
                ClvError::NoTransactionHistory {
                    customer_id: customer_id.to_string(),
                }
            } else {
                ClvError::CustomerNotFound {
                    customer_id: customer_id.to_string(),
                }
            });
        }
        Ok(rfm::summarize_customer(
            &transactions,
            customer_id,
            observation_end,
            self.config.time_unit,
        ))
    }
}

impl Default for ClvEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
