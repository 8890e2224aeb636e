//! PostgreSQL integration tests for the ledger store.
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p ledger --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::NaiveDate;
use ledger::{
    EntryId, EntryType, LedgerError, LedgerStore, Money, Nature, NewEntry, PostgresLedgerStore,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresLedgerStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool, cleared tables and the default entry types.
async fn get_test_store() -> PostgresLedgerStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE ledger_entries, entry_types RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .unwrap();

    let store = PostgresLedgerStore::new(pool);
    store
        .add_entry_type(EntryType::new(1, "Sale", Nature::Credit))
        .await
        .unwrap();
    store
        .add_entry_type(EntryType::new(2, "Supplier payment", Nature::Debit))
        .await
        .unwrap();
    store
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
}

#[tokio::test]
#[serial]
async fn insert_and_read_back_entry() {
    let store = get_test_store().await;

    let committed = store
        .insert(NewEntry::new("Sale", 1, Money::from_cents(15050), date(30)))
        .await
        .unwrap();

    assert_eq!(committed.id, EntryId::new(1));
    assert_eq!(committed.nature, Nature::Credit);

    let loaded = store.get_entry(committed.id).await.unwrap().unwrap();
    assert_eq!(loaded.amount, Money::from_cents(15050));
    assert_eq!(loaded.date, date(30));
    assert!(!loaded.processed);
}

#[tokio::test]
#[serial]
async fn nature_comes_from_entry_type() {
    let store = get_test_store().await;

    let debit = store
        .insert(NewEntry::new("Rent", 2, Money::from_cents(3000), date(30)))
        .await
        .unwrap();

    assert_eq!(debit.nature, Nature::Debit);
}

#[tokio::test]
#[serial]
async fn unknown_entry_type_is_rejected() {
    let store = get_test_store().await;

    let result = store
        .insert(NewEntry::new("x", 42, Money::from_cents(100), date(1)))
        .await;

    assert!(matches!(result, Err(LedgerError::EntryTypeNotFound(42))));
}

#[tokio::test]
#[serial]
async fn entries_by_date_returns_only_that_day() {
    let store = get_test_store().await;
    store
        .insert(NewEntry::new("a", 1, Money::from_cents(100), date(1)))
        .await
        .unwrap();
    store
        .insert(NewEntry::new("b", 2, Money::from_cents(50), date(1)))
        .await
        .unwrap();
    store
        .insert(NewEntry::new("c", 1, Money::from_cents(70), date(2)))
        .await
        .unwrap();

    let entries = store.entries_by_date(date(1)).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].description, "a");
    assert_eq!(entries[1].description, "b");
}

#[tokio::test]
#[serial]
async fn mark_processed_updates_flag() {
    let store = get_test_store().await;
    let entry = store
        .insert(NewEntry::new("a", 1, Money::from_cents(100), date(1)))
        .await
        .unwrap();

    store.mark_processed(&[entry.id]).await.unwrap();

    assert!(store.get_entry(entry.id).await.unwrap().unwrap().processed);
}
