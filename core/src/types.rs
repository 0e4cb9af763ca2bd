//! Shared primitive types used across the engine.

use serde::{Deserialize, Serialize};

/// Opaque customer identifier, as stored by the sales database.
pub type CustomerId = String;

/// Identifier of a persisted model fit.
pub type FitId = String;

/// Unit in which recency and customer age are expressed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

impl TimeUnit {
    /// Length of one unit in seconds. A month is 30 days.
    pub fn seconds(&self) -> f64 {
        match self {
            Self::Hour  => 3_600.0,
            Self::Day   => 86_400.0,
            Self::Week  => 604_800.0,
            Self::Month => 2_592_000.0,
        }
    }

    /// How many units make up one CLV horizon month.
    ///
    /// These are the conventional factors of the lifetimes CLV routine:
    /// hours and days assume a 30-day month while weeks use
    /// 365.25 / 12 / 7 ≈ 4.345, so a weekly month spans about 30.4 days.
    /// `Month` and the `seconds()` of each unit are unaffected.
    pub fn per_month(&self) -> f64 {
        match self {
            Self::Hour  => 720.0,
            Self::Day   => 30.0,
            Self::Week  => 4.345,
            Self::Month => 1.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hour  => "hour",
            Self::Day   => "day",
            Self::Week  => "week",
            Self::Month => "month",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_factors() {
        assert_eq!(TimeUnit::Hour.per_month(), 720.0);
        assert_eq!(TimeUnit::Day.per_month(), 30.0);
        assert_eq!(TimeUnit::Month.per_month(), 1.0);
        // Weekly months are the calendar average, not 30 days.
        let week_days = TimeUnit::Week.per_month() * 7.0;
        assert!((week_days - 365.25 / 12.0).abs() < 0.05, "got {week_days}");
        assert!(week_days > TimeUnit::Day.per_month());
    }
}
