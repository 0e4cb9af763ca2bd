//! RFM summary: one row of (frequency, recency, T, monetary value)
//! per customer, derived from the raw transaction table.
//!
//! RULE: the population path and the single-customer path both run
//! `summarize_group`, so a customer's row never depends on which
//! other customers were loaded alongside it.

use crate::{
    transaction::Transaction,
    types::{CustomerId, TimeUnit},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct RfmSummary {
    /// Repeat transactions: count − 1.
    pub frequency:      f64,
    /// First to last transaction.
    pub recency:        f64,
    /// First transaction to observation end.
    #[serde(rename = "T")]
    pub t:              f64,
    /// Mean amount over repeat transactions; 0.0 without repeats.
    pub monetary_value: f64,
}

impl RfmSummary {
    /// Row for a customer with no transactions.
    pub fn degenerate() -> Self {
        Self::default()
    }
}

/// Columnar view of a population summary, ordered by customer id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RfmTable {
    pub customer_ids:   Vec<CustomerId>,
    pub frequency:      Vec<f64>,
    pub recency:        Vec<f64>,
    pub t:              Vec<f64>,
    pub monetary_value: Vec<f64>,
}

impl RfmTable {
    pub fn len(&self) -> usize {
        self.customer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customer_ids.is_empty()
    }
}

impl From<&BTreeMap<CustomerId, RfmSummary>> for RfmTable {
    fn from(rows: &BTreeMap<CustomerId, RfmSummary>) -> Self {
        let mut table = RfmTable::default();
        for (id, row) in rows {
            table.customer_ids.push(id.clone());
            table.frequency.push(row.frequency);
            table.recency.push(row.recency);
            table.t.push(row.t);
            table.monetary_value.push(row.monetary_value);
        }
        table
    }
}

/// Summarize every customer present in `transactions`.
/// Transactions after `observation_end` are ignored.
pub fn summarize(
    transactions: &[Transaction],
    observation_end: DateTime<Utc>,
    unit: TimeUnit,
) -> BTreeMap<CustomerId, RfmSummary> {
    let mut groups: BTreeMap<&str, Vec<&Transaction>> = BTreeMap::new();
    for txn in transactions.iter().filter(|t| t.date <= observation_end) {
        groups.entry(txn.customer_id.as_str()).or_default().push(txn);
    }

    groups
        .into_iter()
        .map(|(id, group)| (id.to_string(), summarize_group(group, observation_end, unit)))
        .collect()
}

/// Summarize one customer. Unknown or transactionless customers get
/// the degenerate row.
pub fn summarize_customer(
    transactions: &[Transaction],
    customer_id: &str,
    observation_end: DateTime<Utc>,
    unit: TimeUnit,
) -> RfmSummary {
    let group: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.customer_id == customer_id && t.date <= observation_end)
        .collect();
    if group.is_empty() {
        return RfmSummary::degenerate();
    }
    summarize_group(group, observation_end, unit)
}

/// `group` is non-empty and holds one customer's transactions.
fn summarize_group(
    mut group: Vec<&Transaction>,
    observation_end: DateTime<Utc>,
    unit: TimeUnit,
) -> RfmSummary {
    // Same-instant ties break on amount so the row does not depend on
    // the order the source returned them in.
    group.sort_by(|a, b| a.date.cmp(&b.date).then(a.amount.total_cmp(&b.amount)));

    let first = group[0].date;
    let last = group[group.len() - 1].date;
    let repeats = &group[1..];

    let monetary_value = if repeats.is_empty() {
        0.0
    } else {
        repeats.iter().map(|t| t.amount).sum::<f64>() / repeats.len() as f64
    };

    RfmSummary {
        frequency: repeats.len() as f64,
        recency: elapsed(first, last, unit),
        t: elapsed(first, observation_end, unit),
        monetary_value,
    }
}

fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>, unit: TimeUnit) -> f64 {
    let millis = (to - from).num_milliseconds().max(0);
    millis as f64 / 1000.0 / unit.seconds()
}
