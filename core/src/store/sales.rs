use super::{parse_timestamp, ClvStore};
use crate::{error::ClvResult, transaction::Transaction};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerRecord {
    pub customer_id:  String,
    pub company_name: String,
    pub city:         Option<String>,
    pub country:      Option<String>,
    pub is_active:    bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRecord {
    pub product_id: i64,
    pub name:       String,
    pub price:      f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaleRecord {
    pub customer_id: String,
    /// None when the sale's product was never priced.
    pub product_id:  Option<i64>,
    pub date:        DateTime<Utc>,
    pub qty:         i64,
}

const PRICED_SALES: &str =
    "SELECT s.customer_id, s.date, s.qty * p.price
     FROM sale s JOIN product p ON p.product_id = s.product_id";

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let raw_date: String = row.get(1)?;
    Ok(Transaction {
        customer_id: row.get(0)?,
        date:        parse_timestamp(1, &raw_date)?,
        amount:      row.get(2)?,
    })
}

impl ClvStore {
    // ── Customer / product ────────────────────────────────────────

    pub fn insert_customer(&self, c: &CustomerRecord) -> ClvResult<()> {
        self.conn.execute(
            "INSERT INTO customer (customer_id, company_name, city, country, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &c.customer_id,
                &c.company_name,
                &c.city,
                &c.country,
                if c.is_active { 1 } else { 0 }
            ],
        )?;
        Ok(())
    }

    pub fn insert_product(&self, p: &ProductRecord) -> ClvResult<()> {
        self.conn.execute(
            "INSERT INTO product (product_id, name, price) VALUES (?1, ?2, ?3)",
            params![p.product_id, &p.name, p.price],
        )?;
        Ok(())
    }

    /// Insert the product unless its id is already taken. Returns whether
    /// a row was written; an existing product keeps its name and price.
    pub fn ensure_product(&self, p: &ProductRecord) -> ClvResult<bool> {
        let written = self.conn.execute(
            "INSERT OR IGNORE INTO product (product_id, name, price) VALUES (?1, ?2, ?3)",
            params![p.product_id, &p.name, p.price],
        )?;
        Ok(written > 0)
    }

    pub fn has_product(&self, product_id: i64) -> ClvResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM product WHERE product_id = ?1",
                params![product_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn has_customer(&self, customer_id: &str) -> ClvResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM customer WHERE customer_id = ?1",
                params![customer_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn customer_count(&self) -> ClvResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM customer", [], |row| row.get(0))?;
        Ok(n)
    }

    // ── Sales ─────────────────────────────────────────────────────

    pub fn insert_sale(&self, s: &SaleRecord) -> ClvResult<()> {
        self.conn.execute(
            "INSERT INTO sale (customer_id, product_id, date, qty) VALUES (?1, ?2, ?3, ?4)",
            params![&s.customer_id, s.product_id, s.date.to_rfc3339(), s.qty],
        )?;
        Ok(())
    }

    /// Insert many sales in one transaction.
    pub fn insert_sales(&mut self, sales: &[SaleRecord]) -> ClvResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sale (customer_id, product_id, date, qty) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for s in sales {
                stmt.execute(params![&s.customer_id, s.product_id, s.date.to_rfc3339(), s.qty])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn sale_count(&self) -> ClvResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM sale", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Every sale joined with its product price; unpriced sales are
    /// dropped by the inner join.
    pub fn priced_transactions(&self) -> ClvResult<Vec<Transaction>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PRICED_SALES} ORDER BY s.date ASC, s.sale_id ASC"))?;
        let rows = stmt.query_map([], transaction_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn priced_transactions_for(&self, customer_id: &str) -> ClvResult<Vec<Transaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PRICED_SALES} WHERE s.customer_id = ?1 ORDER BY s.date ASC, s.sale_id ASC"
        ))?;
        let rows = stmt.query_map(params![customer_id], transaction_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
