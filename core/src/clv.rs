//! Monetary CLV: expected purchases per horizon month times expected
//! spend per purchase, summed without discounting.

use crate::{
    error::{ClvError, ClvResult},
    gamma_gamma::GammaGammaParams,
    pareto_nbd::ParetoNbdParams,
    rfm::RfmSummary,
    types::TimeUnit,
};

/// CLV over `horizon` months for one customer's RFM row, where the row
/// is expressed in `unit`.
pub fn customer_lifetime_value(
    timing: &ParetoNbdParams,
    monetary: &GammaGammaParams,
    summary: &RfmSummary,
    horizon: u32,
    unit: TimeUnit,
) -> ClvResult<f64> {
    if horizon == 0 {
        return Err(ClvError::InvalidArgument("horizon must be positive".into()));
    }
    let RfmSummary { frequency, recency, t, monetary_value } = *summary;

    let avg_value = monetary.conditional_expected_average_value(frequency, monetary_value);
    let per_month = unit.per_month();

    let mut clv = 0.0;
    let mut previous = 0.0;
    for month in 1..=horizon {
        let cumulative = timing.expected_purchases_after(f64::from(month) * per_month, frequency, recency, t);
        clv += avg_value * (cumulative - previous).max(0.0);
        previous = cumulative;
    }
    Ok(clv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models() -> (ParetoNbdParams, GammaGammaParams) {
        (
            ParetoNbdParams::new(0.55, 10.58, 0.61, 11.67).unwrap(),
            GammaGammaParams::new(6.25, 3.74, 15.44).unwrap(),
        )
    }

    #[test]
    fn flat_sum_equals_total_expected_spend() {
        let (timing, monetary) = models();
        let summary = RfmSummary { frequency: 3.0, recency: 20.0, t: 30.0, monetary_value: 17.5 };

        let clv = customer_lifetime_value(&timing, &monetary, &summary, 12, TimeUnit::Day).unwrap();
        let purchases = timing.expected_purchases_after(360.0, 3.0, 20.0, 30.0);
        let spend = monetary.conditional_expected_average_value(3.0, 17.5);
        assert!((clv - purchases * spend).abs() < 1e-9 * clv.max(1.0));
    }

    #[test]
    fn longer_horizon_is_worth_more() {
        let (timing, monetary) = models();
        let summary = RfmSummary { frequency: 1.0, recency: 5.0, t: 40.0, monetary_value: 22.0 };
        let short = customer_lifetime_value(&timing, &monetary, &summary, 3, TimeUnit::Day).unwrap();
        let long = customer_lifetime_value(&timing, &monetary, &summary, 24, TimeUnit::Day).unwrap();
        assert!(short > 0.0 && long > short);
    }

    #[test]
    fn zero_horizon_is_rejected() {
        let (timing, monetary) = models();
        let err = customer_lifetime_value(&timing, &monetary, &RfmSummary::default(), 0, TimeUnit::Day).unwrap_err();
        assert!(matches!(err, ClvError::InvalidArgument(_)));
    }
}
