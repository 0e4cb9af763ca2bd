use crate::types::TimeUnit;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PENALIZER: f64 = 0.5;
pub const DEFAULT_PERIODS: u32 = 30;

/// Engine settings. Fixed at construction; nothing here is per-call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// L2 penalty applied to every fitted parameter.
    pub penalizer_coef:         f64,
    /// Unit for recency and T in the RFM summary.
    pub time_unit:              TimeUnit,
    /// Nelder–Mead iteration bound per model fit.
    pub max_iterations:         usize,
    /// Simplex spread at which the optimizer stops.
    pub tolerance:              f64,
    pub min_timing_customers:   usize,
    pub min_monetary_customers: usize,
    /// Horizon used by callers that do not pass one.
    pub default_periods:        u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            penalizer_coef:         DEFAULT_PENALIZER,
            time_unit:              TimeUnit::Day,
            max_iterations:         5_000,
            tolerance:              1e-8,
            min_timing_customers:   5,
            min_monetary_customers: 3,
            default_periods:        DEFAULT_PERIODS,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Config for unit tests: unpenalized so synthetic fits recover
    /// their ground truth.
    pub fn default_test() -> Self {
        Self {
            penalizer_coef: 0.0,
            ..Self::default()
        }
    }

    pub fn with_penalizer(mut self, penalizer_coef: f64) -> Self {
        self.penalizer_coef = penalizer_coef;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.penalizer_coef.is_finite() && self.penalizer_coef >= 0.0) {
            anyhow::bail!("penalizer_coef must be a non-negative number, got {}", self.penalizer_coef);
        }
        if self.max_iterations == 0 {
            anyhow::bail!("max_iterations must be positive");
        }
        if !(self.tolerance > 0.0) {
            anyhow::bail!("tolerance must be positive, got {}", self.tolerance);
        }
        if self.min_timing_customers < 1 || self.min_monetary_customers < 1 {
            anyhow::bail!("minimum customer counts must be at least 1");
        }
        if self.default_periods == 0 {
            anyhow::bail!("default_periods must be positive");
        }
        Ok(())
    }
}
