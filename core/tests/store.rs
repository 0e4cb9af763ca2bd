//! SQLite store: schema, priced-sales join, date parsing and fit
//! persistence.

use chrono::{Duration, TimeZone, Utc};
use clv_core::{
    store::{ClvStore, CustomerRecord, ProductRecord, SaleRecord},
    ClvEngine, ClvError, TransactionSource,
};

// ── Helpers ──────────────────────────────────────────────────────────────

fn migrated_store() -> ClvStore {
    let store = ClvStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn customer(id: &str) -> CustomerRecord {
    CustomerRecord {
        customer_id:  id.into(),
        company_name: format!("{id} Trading"),
        city:         Some("Lisbon".into()),
        country:      Some("Portugal".into()),
        is_active:    true,
    }
}

/// Six customers with two or three priced sales each, one unpriced
/// sale, and one customer who never bought anything.
fn seeded_store() -> ClvStore {
    let mut store = migrated_store();
    store.insert_product(&ProductRecord { product_id: 1, name: "Widget".into(), price: 2.5 }).unwrap();
    store.insert_product(&ProductRecord { product_id: 2, name: "Gadget".into(), price: 10.0 }).unwrap();

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
    let mut sales = Vec::new();
    for i in 0..6i64 {
        let id = format!("C{i}");
        store.insert_customer(&customer(&id)).unwrap();
        for k in 0..(2 + i % 2) {
            sales.push(SaleRecord {
                customer_id: id.clone(),
                product_id:  Some(1 + (i + k) % 2),
                date:        start + Duration::days(i * 3 + k * (7 + i)),
                qty:         1 + k,
            });
        }
    }
    sales.push(SaleRecord {
        customer_id: "C0".into(),
        product_id:  None,
        date:        start + Duration::days(40),
        qty:         5,
    });
    store.insert_sales(&sales).unwrap();
    store.insert_customer(&customer("IDLE")).unwrap();
    store
}

// ── Tests ────────────────────────────────────────────────────────────────

#[test]
fn migration_is_idempotent() {
    let store = migrated_store();
    store.migrate().expect("second migration");
    assert_eq!(store.customer_count().unwrap(), 0);
}

/// Re-seeding an existing ledger keeps the first product row and does
/// not trip the primary key.
#[test]
fn ensure_product_keeps_existing_row() {
    let store = seeded_store();
    assert!(store.has_product(1).unwrap());
    assert!(!store.has_product(3).unwrap());

    let written = store
        .ensure_product(&ProductRecord { product_id: 1, name: "Other".into(), price: 99.0 })
        .unwrap();
    assert!(!written);
    let written = store
        .ensure_product(&ProductRecord { product_id: 3, name: "Gizmo".into(), price: 4.0 })
        .unwrap();
    assert!(written);
    assert!(store.has_product(3).unwrap());

    let c0 = store.customer_transactions("C0").unwrap();
    assert!((c0[0].amount - 2.5).abs() < 1e-9, "existing price must be kept");
}

/// Amount is qty × price; sales without a priced product are dropped.
#[test]
fn priced_join_drops_unpriced_sales() {
    let store = seeded_store();
    assert_eq!(store.sale_count().unwrap(), 16);

    let all = store.all_transactions().unwrap();
    assert_eq!(all.len(), 15, "the unpriced sale must not be returned");

    let c0 = store.customer_transactions("C0").unwrap();
    assert_eq!(c0.len(), 2);
    assert!((c0[0].amount - 2.5).abs() < 1e-9);
    assert!((c0[1].amount - 20.0).abs() < 1e-9);
    assert!(c0[0].date <= c0[1].date);
}

#[test]
fn customer_existence_is_independent_of_sales() {
    let store = seeded_store();
    assert!(store.customer_exists("IDLE").unwrap());
    assert!(store.customer_transactions("IDLE").unwrap().is_empty());
    assert!(!store.customer_exists("GHOST").unwrap());
}

#[test]
fn sale_for_unknown_customer_violates_foreign_key() {
    let store = migrated_store();
    let err = store
        .insert_sale(&SaleRecord {
            customer_id: "GHOST".into(),
            product_id:  None,
            date:        Utc::now(),
            qty:         1,
        })
        .unwrap_err();
    assert!(matches!(err, ClvError::Database(_)));
}

/// Imported ledgers may hold naive timestamps or bare dates.
#[test]
fn naive_and_bare_dates_are_read_as_utc() {
    let store = ClvStore::open("file:naive_dates?mode=memory&cache=shared").unwrap();
    store.migrate().unwrap();
    store.insert_customer(&customer("C1")).unwrap();
    store.insert_product(&ProductRecord { product_id: 1, name: "Widget".into(), price: 1.0 }).unwrap();

    // Write raw strings through a second connection to the same database.
    let raw = rusqlite::Connection::open_with_flags(
        "file:naive_dates?mode=memory&cache=shared",
        rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE | rusqlite::OpenFlags::SQLITE_OPEN_URI,
    )
    .unwrap();
    raw.execute_batch(
        "INSERT INTO sale (customer_id, product_id, date, qty) VALUES ('C1', 1, '2024-03-01', 1);
         INSERT INTO sale (customer_id, product_id, date, qty) VALUES ('C1', 1, '2024-03-02 12:30:00', 1);",
    )
    .unwrap();

    let txns = store.customer_transactions("C1").unwrap();
    assert_eq!(txns.len(), 2);
    assert_eq!(txns[0].date, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    assert_eq!(txns[1].date, Utc.with_ymd_and_hms(2024, 3, 2, 12, 30, 0).unwrap());
}

/// A recorded fit comes back intact and can be restored into a fresh
/// engine that then answers queries without refitting.
#[test]
fn recorded_fit_restores_into_new_engine() {
    let store = seeded_store();
    assert!(store.latest_fit().unwrap().is_none());

    let end = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let engine = ClvEngine::default();
    let first = engine.fit(&store, end).expect("fit on seeded store");
    store.record_fit(&first).unwrap();
    let second = engine.fit(&store, end).unwrap();
    store.record_fit(&second).unwrap();
    assert_eq!(store.fit_count().unwrap(), 2);

    let latest = store.latest_fit().unwrap().expect("a stored fit");
    assert_eq!(latest.fit_id, second.fit_id);
    assert_ne!(latest.fit_id, first.fit_id);
    assert_eq!(latest.observation_end, end);
    assert!((latest.timing.params.r - second.timing.params.r).abs() < 1e-12);
    assert!((latest.monetary.params.q - second.monetary.params.q).abs() < 1e-12);

    let restored = ClvEngine::default();
    restored.restore(&latest).unwrap();
    let a = engine.probability_alive(&store, "C1", end).unwrap();
    let b = restored.probability_alive(&store, "C1", end).unwrap();
    assert!((a - b).abs() < 1e-9, "restored {b} vs fitted {a}");
}
