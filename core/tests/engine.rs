//! ClvEngine: state machine, error taxonomy and per-customer queries.

use chrono::{Duration, TimeZone, Utc};
use clv_core::{
    engine::ModelState,
    gamma_gamma::GammaGammaParams,
    pareto_nbd::ParetoNbdParams,
    simulate::{customer_id, simulate_population, PopulationSpec, SimulatedPopulation},
    types::TimeUnit,
    ClvEngine, ClvError, EngineConfig, MemorySource, RfmSummary, Transaction,
};

// ── Helpers ──────────────────────────────────────────────────────────────

fn small_population(customers: usize, seed: u64) -> SimulatedPopulation {
    let spec = PopulationSpec {
        customers,
        timing: ParetoNbdParams::new(0.8, 12.0, 0.7, 40.0).unwrap(),
        monetary: GammaGammaParams::new(6.0, 4.0, 15.0).unwrap(),
        observation_start: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
        acquisition_window: 120.0,
        observation_length: 365.0,
        time_unit: TimeUnit::Day,
    };
    simulate_population(&spec, seed).unwrap()
}

fn fitted_engine() -> (ClvEngine, MemorySource, chrono::DateTime<Utc>) {
    let population = small_population(200, 11);
    let end = population.observation_end;
    let source = population.into_source();
    let engine = ClvEngine::default();
    engine.fit(&source, end).expect("fit on simulated population");
    (engine, source, end)
}

// ── State machine ────────────────────────────────────────────────────────

/// Every model query fails with ModelNotFitted before the first fit,
/// even for customers that do not exist.
#[test]
fn queries_before_fit_are_rejected() {
    let population = small_population(20, 1);
    let end = population.observation_end;
    let source = population.into_source();
    let engine = ClvEngine::default();
    let id = customer_id(0);

    assert!(!engine.is_fitted());
    assert!(engine.fitted_params().is_none());
    assert!(matches!(engine.probability_alive(&source, &id, end), Err(ClvError::ModelNotFitted)));
    assert!(matches!(
        engine.conditional_expected_transactions(&source, &id, 30, end),
        Err(ClvError::ModelNotFitted)
    ));
    assert!(matches!(
        engine.expected_cumulative_transactions(&source, &id, 30, end),
        Err(ClvError::ModelNotFitted)
    ));
    assert!(matches!(engine.expected_average_value(&source, &id, end), Err(ClvError::ModelNotFitted)));
    assert!(matches!(
        engine.customer_lifetime_value(&source, "nobody", 12, end),
        Err(ClvError::ModelNotFitted)
    ));
}

/// After a fit every query answers with sane values.
#[test]
fn fitted_engine_answers_queries() {
    let (engine, source, end) = fitted_engine();
    let id = customer_id(3);

    let alive = engine.probability_alive(&source, &id, end).unwrap();
    assert!((0.0..=1.0).contains(&alive));

    let expected = engine.conditional_expected_transactions(&source, &id, 30, end).unwrap();
    let curve = engine.expected_cumulative_transactions(&source, &id, 30, end).unwrap();
    assert_eq!(curve.len(), 30);
    assert!((curve[29] - expected).abs() < 1e-9);

    let value = engine.expected_average_value(&source, &id, end).unwrap();
    assert!(value > 0.0);

    let clv = engine.customer_lifetime_value(&source, &id, 12, end).unwrap();
    assert!(clv >= 0.0 && clv.is_finite());
}

/// An empty ledger is EmptyDataset and leaves the state untouched.
#[test]
fn empty_dataset_keeps_state() {
    let engine = ClvEngine::default();
    let end = Utc::now();
    let err = engine.fit(&MemorySource::new(), end).unwrap_err();
    assert!(matches!(err, ClvError::EmptyDataset));
    assert_eq!(engine.state(), ModelState::Unfitted);

    let (engine, _, end) = fitted_engine();
    let before = engine.state();
    assert!(matches!(engine.fit(&MemorySource::new(), end), Err(ClvError::EmptyDataset)));
    assert_eq!(engine.state(), before, "a failed fit must not replace the models");
}

/// Convergence and data-size failures on a fitted engine keep the
/// previous models as well.
#[test]
fn failed_refit_keeps_state() {
    let (fitted, source, end) = fitted_engine();
    let report = fitted.fit(&source, end).unwrap();

    let engine = ClvEngine::new(EngineConfig { max_iterations: 3, ..EngineConfig::default() });
    engine.restore(&report).unwrap();
    let before = engine.state();

    let err = engine.fit(&source, end).unwrap_err();
    assert!(matches!(err, ClvError::FitConvergence { iterations: 3, .. }), "got {err:?}");
    assert_eq!(engine.state(), before, "a non-converged fit must not replace the models");

    let tiny = MemorySource::from_transactions(vec![
        Transaction::new("A", end - Duration::days(9), 5.0),
        Transaction::new("A", end - Duration::days(3), 7.0),
    ]);
    let err = engine.fit(&tiny, end).unwrap_err();
    assert!(matches!(err, ClvError::InsufficientData { found: 1, .. }), "got {err:?}");
    assert_eq!(engine.state(), before, "an undersized fit must not replace the models");
}

/// Sales that all happen after the observation end leave nothing to fit.
#[test]
fn only_future_sales_is_empty_dataset() {
    let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut source = MemorySource::new();
    source.push(Transaction::new("A", end + Duration::days(1), 10.0));
    source.push(Transaction::new("B", end + Duration::days(2), 12.0));
    assert_eq!(source.len(), 2);
    let err = ClvEngine::default().fit(&source, end).unwrap_err();
    assert!(matches!(err, ClvError::EmptyDataset));
}

#[test]
fn too_few_customers_is_insufficient_data() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let source = MemorySource::from_transactions(
        (0..3)
            .map(|i| Transaction::new(format!("C{i}"), start + Duration::days(i), 10.0))
            .collect(),
    );
    let err = ClvEngine::default().fit(&source, start + Duration::days(30)).unwrap_err();
    assert!(matches!(err, ClvError::InsufficientData { found: 3, .. }), "got {err:?}");
}

/// A refit with the same data replaces the parameters with the same values.
#[test]
fn refit_is_stable() {
    let (engine, source, end) = fitted_engine();
    let first = engine.state();
    let report = engine.fit(&source, end).unwrap();
    assert_eq!(engine.state(), first);
    assert_eq!(engine.fitted_params(), Some(report.models()));
}

/// A report made in another time unit cannot be restored.
#[test]
fn restore_rejects_other_time_unit() {
    let (engine, source, end) = fitted_engine();
    let report = engine.fit(&source, end).unwrap();

    let weekly = ClvEngine::new(EngineConfig { time_unit: TimeUnit::Week, ..EngineConfig::default() });
    assert!(matches!(weekly.restore(&report), Err(ClvError::Config(_))));
    assert!(!weekly.is_fitted());

    let daily = ClvEngine::default();
    daily.restore(&report).unwrap();
    assert_eq!(daily.state(), engine.state());
}

// ── Customer lookups ─────────────────────────────────────────────────────

/// Unknown customers and known-but-silent customers are different errors.
#[test]
fn missing_customer_and_missing_history_differ() {
    let (engine, mut source, end) = fitted_engine();
    source.add_customer("SILENT");

    assert!(matches!(
        engine.probability_alive(&source, "GHOST", end),
        Err(ClvError::CustomerNotFound { .. })
    ));
    assert!(matches!(
        engine.probability_alive(&source, "SILENT", end),
        Err(ClvError::NoTransactionHistory { .. })
    ));
}

/// The summary never fails and never needs a fitted model.
#[test]
fn summary_works_without_fit() {
    let population = small_population(20, 5);
    let end = population.observation_end;
    let source = population.into_source();
    let engine = ClvEngine::default();

    assert_eq!(engine.customer_summary(&source, "GHOST", end).unwrap(), RfmSummary::degenerate());
    let row = engine.customer_summary(&source, &customer_id(0), end).unwrap();
    assert!(row.t > 0.0 && row.recency <= row.t);
}

#[test]
fn zero_horizon_is_invalid() {
    let (engine, source, end) = fitted_engine();
    let err = engine.customer_lifetime_value(&source, &customer_id(0), 0, end).unwrap_err();
    assert!(matches!(err, ClvError::InvalidArgument(_)));
}

// ── Concurrency ──────────────────────────────────────────────────────────

#[test]
fn engine_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ClvEngine>();
}

/// Queries running alongside a refit always see a complete model pair.
#[test]
fn queries_during_refit_see_consistent_models() {
    let (engine, source, end) = fitted_engine();
    let id = customer_id(1);

    std::thread::scope(|scope| {
        scope.spawn(|| engine.fit(&source, end).unwrap());
        for _ in 0..20 {
            let p = engine.probability_alive(&source, &id, end).unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
    });
    assert!(engine.is_fitted());
}
