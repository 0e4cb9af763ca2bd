//! Transaction loading.
//!
//! The engine never reads the database directly. It asks a
//! `TransactionSource` for rows; `ClvStore` is the SQLite source,
//! `MemorySource` backs tests and the simulator.

use crate::{
    error::{ClvError, ClvResult},
    types::CustomerId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One priced sale: amount is quantity × unit price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub customer_id: CustomerId,
    pub date:        DateTime<Utc>,
    pub amount:      f64,
}

impl Transaction {
    pub fn new(customer_id: impl Into<CustomerId>, date: DateTime<Utc>, amount: f64) -> Self {
        Self {
            customer_id: customer_id.into(),
            date,
            amount,
        }
    }
}

/// Read contract the engine needs from the persistence layer.
pub trait TransactionSource {
    /// Every transaction with a resolved customer and price.
    fn all_transactions(&self) -> ClvResult<Vec<Transaction>>;

    /// Transactions for a single customer, any order.
    fn customer_transactions(&self, customer_id: &str) -> ClvResult<Vec<Transaction>>;

    /// Whether the customer is known, with or without transactions.
    fn customer_exists(&self, customer_id: &str) -> ClvResult<bool>;
}

/// Load the full transaction table. An empty table is an error:
/// no model can be fit on it.
pub fn load_transactions(source: &dyn TransactionSource) -> ClvResult<Vec<Transaction>> {
    let rows = source.all_transactions()?;
    if rows.is_empty() {
        return Err(ClvError::EmptyDataset);
    }
    log::debug!("loaded {} transactions", rows.len());
    Ok(rows)
}

/// In-memory transaction source.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    customers:    BTreeSet<CustomerId>,
    transactions: Vec<Transaction>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_transactions(transactions: Vec<Transaction>) -> Self {
        let customers = transactions.iter().map(|t| t.customer_id.clone()).collect();
        Self { customers, transactions }
    }

    /// Register a customer who may have no transactions.
    pub fn add_customer(&mut self, customer_id: impl Into<CustomerId>) {
        self.customers.insert(customer_id.into());
    }

    pub fn push(&mut self, txn: Transaction) {
        self.customers.insert(txn.customer_id.clone());
        self.transactions.push(txn);
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl TransactionSource for MemorySource {
    fn all_transactions(&self) -> ClvResult<Vec<Transaction>> {
        Ok(self.transactions.clone())
    }

    fn customer_transactions(&self, customer_id: &str) -> ClvResult<Vec<Transaction>> {
        Ok(self
            .transactions
            .iter()
            .filter(|t| t.customer_id == customer_id)
            .cloned()
            .collect())
    }

    fn customer_exists(&self, customer_id: &str) -> ClvResult<bool> {
        Ok(self.customers.contains(customer_id))
    }
}
