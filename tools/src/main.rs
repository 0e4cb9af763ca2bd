//! clv-runner: headless driver for the CLV engine.
//!
//! Usage:
//!   clv-runner --db sales.db                       fit once and print parameters
//!   clv-runner --db sales.db --ipc-mode            JSON-lines commands on stdin
//!   clv-runner --demo 500 --seed 7 --ipc-mode      seed a simulated ledger first
//!
//! `--db` falls back to the DB_URL environment variable, then `:memory:`.

use anyhow::Result;
use chrono::{Duration, Utc};
use clv_core::{
    engine::{ClvEngine, FitReport},
    gamma_gamma::GammaGammaParams,
    pareto_nbd::ParetoNbdParams,
    rfm::RfmSummary,
    simulate::{customer_id, simulate_population, PopulationSpec},
    store::{ClvStore, CustomerRecord, ProductRecord, SaleRecord},
    types::TimeUnit,
    ClvError, ClvResult, EngineConfig, TransactionSource,
};
use std::collections::BTreeSet;
use std::env;
use std::io::{self, BufRead, Write};

/// Demo ledgers price everything as cents of a single product.
const DEMO_PRODUCT_ID: i64 = 1;
const DEMO_UNIT_PRICE: f64 = 0.01;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Fit,
    Summary {
        customer_id: String,
    },
    ProbAlive {
        customer_id: String,
    },
    Conditional {
        customer_id: String,
        periods:     Option<u32>,
    },
    Cumulative {
        customer_id: String,
        periods:     Option<u32>,
    },
    AvgValue {
        customer_id: String,
    },
    Clv {
        customer_id: String,
        time:        Option<u32>,
    },
    Quit,
}

#[derive(serde::Serialize)]
struct ModelParams {
    fit_id:      String,
    pnbd_params: ParetoNbdParams,
    gg_params:   GammaGammaParams,
}

#[derive(serde::Serialize)]
struct ProbabilityAlive {
    customer_id: String,
    prob_alive:  f64,
}

#[derive(serde::Serialize)]
struct ExpectedConditional {
    customer_id: String,
    periods:     u32,
    expected:    f64,
}

#[derive(serde::Serialize)]
struct ExpectedCumulative {
    customer_id: String,
    periods:     u32,
    cumulative:  Vec<f64>,
}

#[derive(serde::Serialize)]
struct ExpectedAvgValue {
    customer_id:        String,
    expected_avg_value: f64,
}

#[derive(serde::Serialize)]
struct CustomerLifetimeValue {
    customer_id: String,
    time:        u32,
    clv:         f64,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let seed = parse_arg(&args, "--seed", 42u64);
    let demo = parse_arg(&args, "--demo", 0usize);
    let db = string_arg(&args, "--db")
        .or_else(|| env::var("DB_URL").ok())
        .unwrap_or_else(|| ":memory:".to_string());

    let config = match string_arg(&args, "--config") {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };

    if !ipc_mode {
        println!("clv-runner");
        println!("  db:         {db}");
        println!("  penalizer:  {}", config.penalizer_coef);
        println!("  time unit:  {}", config.time_unit.name());
        println!();
    }

    let mut store = ClvStore::open(&db)?;
    store.migrate()?;
    if demo > 0 {
        seed_demo_ledger(&mut store, demo, seed, config.time_unit)?;
    }

    let engine = ClvEngine::new(config);
    if let Some(report) = store.latest_fit()? {
        if let Err(e) = engine.restore(&report) {
            log::warn!("Ignoring stored fit {}: {e}", report.fit_id);
        }
    }

    if ipc_mode {
        run_ipc_loop(&engine, &store)?;
    } else {
        let report = engine.fit(&store, Utc::now())?;
        store.record_fit(&report)?;
        print_summary(&store, &report)?;
    }
    Ok(())
}

fn run_ipc_loop(engine: &ClvEngine, store: &ClvStore) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string(), "kind": "bad_command" });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let response = match handle_command(engine, store, cmd) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("command failed: {e}");
                serde_json::json!({ "error": e.to_string(), "kind": e.kind() })
            }
        };
        writeln!(stdout, "{}", response)?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &ClvEngine, store: &ClvStore, cmd: IpcCommand) -> ClvResult<serde_json::Value> {
    let now = Utc::now();
    let default_periods = engine.config().default_periods;

    let value = match cmd {
        IpcCommand::Fit => {
            let report = engine.fit(store, now)?;
            store.record_fit(&report)?;
            serde_json::to_value(ModelParams {
                fit_id:      report.fit_id.clone(),
                pnbd_params: report.timing.params,
                gg_params:   report.monetary.params,
            })?
        }
        IpcCommand::Summary { customer_id } => {
            if !store.customer_exists(&customer_id)? {
                return Err(ClvError::CustomerNotFound { customer_id });
            }
            let summary: RfmSummary = engine.customer_summary(store, &customer_id, now)?;
            serde_json::to_value(summary)?
        }
        IpcCommand::ProbAlive { customer_id } => {
            let prob_alive = engine.probability_alive(store, &customer_id, now)?;
            serde_json::to_value(ProbabilityAlive { customer_id, prob_alive })?
        }
        IpcCommand::Conditional { customer_id, periods } => {
            let periods = positive(periods.unwrap_or(default_periods), "periods")?;
            let expected = engine.conditional_expected_transactions(store, &customer_id, periods, now)?;
            serde_json::to_value(ExpectedConditional { customer_id, periods, expected })?
        }
        IpcCommand::Cumulative { customer_id, periods } => {
            let periods = positive(periods.unwrap_or(default_periods), "periods")?;
            let cumulative = engine.expected_cumulative_transactions(store, &customer_id, periods, now)?;
            serde_json::to_value(ExpectedCumulative { customer_id, periods, cumulative })?
        }
        IpcCommand::AvgValue { customer_id } => {
            let expected_avg_value = engine.expected_average_value(store, &customer_id, now)?;
            serde_json::to_value(ExpectedAvgValue { customer_id, expected_avg_value })?
        }
        IpcCommand::Clv { customer_id, time } => {
            let time = positive(time.unwrap_or(default_periods), "time")?;
            let clv = engine.customer_lifetime_value(store, &customer_id, time, now)?;
            serde_json::to_value(CustomerLifetimeValue { customer_id, time, clv })?
        }
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(value)
}

fn positive(n: u32, name: &str) -> ClvResult<u32> {
    if n == 0 {
        return Err(ClvError::InvalidArgument(format!("'{name}' must be a positive integer")));
    }
    Ok(n)
}

/// Fill the store with a simulated year of sales ending now. A store
/// that already holds a demo ledger is left as it is.
fn seed_demo_ledger(store: &mut ClvStore, customers: usize, seed: u64, unit: TimeUnit) -> Result<()> {
    if store.has_customer(&customer_id(0))? {
        log::info!("demo ledger already present ({} customers), not reseeding", store.customer_count()?);
        return Ok(());
    }
    let per_day = 86_400.0 / unit.seconds();
    let spec = PopulationSpec {
        customers,
        timing: ParetoNbdParams::new(0.55, 10.58 / per_day, 0.61, 11.67 / per_day)?,
        monetary: GammaGammaParams::new(6.25, 3.74, 15.44)?,
        observation_start: Utc::now() - Duration::days(365),
        acquisition_window: 180.0 * per_day,
        observation_length: 365.0 * per_day,
        time_unit: unit,
    };
    let population = simulate_population(&spec, seed)?;

    if !store.ensure_product(&ProductRecord {
        product_id: DEMO_PRODUCT_ID,
        name:       "demo unit".into(),
        price:      DEMO_UNIT_PRICE,
    })? {
        log::warn!("product {DEMO_PRODUCT_ID} already exists; demo sales use its stored price");
    }
    let ids: BTreeSet<&str> = population.transactions.iter().map(|t| t.customer_id.as_str()).collect();
    for id in &ids {
        store.insert_customer(&CustomerRecord {
            customer_id:  id.to_string(),
            company_name: format!("Simulated {id}"),
            city:         None,
            country:      None,
            is_active:    true,
        })?;
    }
    let sales: Vec<SaleRecord> = population
        .transactions
        .iter()
        .map(|t| SaleRecord {
            customer_id: t.customer_id.clone(),
            product_id:  Some(DEMO_PRODUCT_ID),
            date:        t.date,
            qty:         (t.amount / DEMO_UNIT_PRICE).round() as i64,
        })
        .collect();
    store.insert_sales(&sales)?;
    log::info!("seeded {} customers and {} sales (seed {seed})", ids.len(), sales.len());
    Ok(())
}

fn print_summary(store: &ClvStore, report: &FitReport) -> Result<()> {
    let t = &report.timing;
    let m = &report.monetary;

    println!("=== FIT SUMMARY ===");
    println!("  fit_id:          {}", report.fit_id);
    println!("  observation end: {}", report.observation_end);
    println!("  customers:       {}", store.customer_count()?);
    println!("  sales:           {}", store.sale_count()?);
    println!("  stored fits:     {}", store.fit_count()?);
    println!();
    println!("=== PARETO/NBD ({} customers, {} iterations) ===", t.customers, t.iterations);
    println!(
        "  r={:.4} alpha={:.4} s={:.4} beta={:.4}",
        t.params.r, t.params.alpha, t.params.s, t.params.beta
    );
    println!();
    println!("=== GAMMA-GAMMA ({} customers, {} iterations) ===", m.customers, m.iterations);
    println!(
        "  p={:.4} q={:.4} v={:.4}  (population mean spend {:.2})",
        m.params.p,
        m.params.q,
        m.params.v,
        m.params.population_mean_value()
    );
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn string_arg(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}
