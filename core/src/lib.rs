//! Customer lifetime value engine.
//!
//! Turns a sales ledger into per-customer RFM summaries, fits a
//! Pareto/NBD purchase-timing model and a Gamma–Gamma spend model to
//! them, and answers per-customer forecasts from the fitted pair.

pub mod clv;
pub mod config;
pub mod engine;
pub mod error;
pub mod gamma_gamma;
pub mod optimize;
pub mod pareto_nbd;
pub mod rfm;
pub mod simulate;
pub mod special;
pub mod store;
pub mod transaction;
pub mod types;

pub use config::EngineConfig;
pub use engine::{ClvEngine, FitReport, FittedModels, ModelState};
pub use error::{ClvError, ClvResult};
pub use rfm::RfmSummary;
pub use store::ClvStore;
pub use transaction::{MemorySource, Transaction, TransactionSource};
