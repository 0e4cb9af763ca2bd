//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The engine reads through the `TransactionSource` trait and never
//! executes SQL directly.

use crate::{
    error::ClvResult,
    transaction::{Transaction, TransactionSource},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::{types::Type, Connection};

mod model_fit;
mod sales;

pub use sales::{CustomerRecord, ProductRecord, SaleRecord};

pub struct ClvStore {
    conn: Connection,
}

impl ClvStore {
    pub fn open(path: &str) -> ClvResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ClvResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ClvResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_sales.sql"))?;
        Ok(())
    }
}

impl TransactionSource for ClvStore {
    fn all_transactions(&self) -> ClvResult<Vec<Transaction>> {
        self.priced_transactions()
    }

    fn customer_transactions(&self, customer_id: &str) -> ClvResult<Vec<Transaction>> {
        self.priced_transactions_for(customer_id)
    }

    fn customer_exists(&self, customer_id: &str) -> ClvResult<bool> {
        self.has_customer(customer_id)
    }
}

/// Sales dates are written as RFC 3339, but imported ledgers often hold
/// naive `YYYY-MM-DD HH:MM:SS` or bare dates; those are read as UTC.
pub(crate) fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}
