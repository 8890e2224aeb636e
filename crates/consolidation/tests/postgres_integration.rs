//! PostgreSQL integration tests for the aggregate store and reprocessing.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p consolidation --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::NaiveDate;
use common::{EntryId, Money, Nature};
use consolidation::{
    AggregateStore, ApplyOutcome, ConsolidationError, DEFAULT_CACHE_TTL, DailyAggregate,
    MokaReadCache, PostgresAggregateStore, ReprocessingOrchestrator,
};
use futures_util::future::join_all;
use ledger::{EntryType, LedgerStore, NewEntry, PostgresLedgerStore};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

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

/// Fresh pool with empty tables and the default entry types.
async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;
    let pool = PgPool::connect(&info.connection_string).await.unwrap();
    sqlx::query(
        "TRUNCATE daily_aggregates, consolidated_entries, ledger_entries, entry_types RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await
    .unwrap();

    let ledger = PostgresLedgerStore::new(pool.clone());
    ledger
        .add_entry_type(EntryType::new(1, "Sale", Nature::Credit))
        .await
        .unwrap();
    ledger
        .add_entry_type(EntryType::new(2, "Supplier payment", Nature::Debit))
        .await
        .unwrap();
    pool
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
}

#[tokio::test]
#[serial]
async fn test_upsert_additive_increments() {
    let store = PostgresAggregateStore::new(get_test_pool().await);

    store
        .upsert_additive(date(30), Money::from_cents(15050), Money::zero())
        .await
        .unwrap();
    let agg = store
        .upsert_additive(date(30), Money::zero(), Money::from_cents(3000))
        .await
        .unwrap();

    assert_eq!(agg.balance(), Money::from_cents(12050));
    assert_eq!(store.get_by_date(date(30)).await.unwrap(), Some(agg));
}

#[tokio::test]
#[serial]
async fn test_apply_entry_dedups() {
    let store = PostgresAggregateStore::new(get_test_pool().await);
    let id = EntryId::new(42);

    let first = store
        .apply_entry(id, date(1), Money::from_cents(100), Money::zero())
        .await
        .unwrap();
    let second = store
        .apply_entry(id, date(1), Money::from_cents(100), Money::zero())
        .await
        .unwrap();

    assert!(matches!(first, ApplyOutcome::Applied(_)));
    assert_eq!(second, ApplyOutcome::Duplicate);
    assert!(store.is_consolidated(id).await.unwrap());
    let agg = store.get_by_date(date(1)).await.unwrap().unwrap();
    assert_eq!(agg.total_credits(), Money::from_cents(100));
}

#[tokio::test]
#[serial]
async fn test_concurrent_applies_are_atomic() {
    let store = PostgresAggregateStore::new(get_test_pool().await);

    let handles = (0..20).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .apply_entry(EntryId::new(i % 10), date(2), Money::from_cents(100), Money::zero())
                .await
        })
    });
    for result in join_all(handles).await {
        result.unwrap().unwrap();
    }

    let agg = store.get_by_date(date(2)).await.unwrap().unwrap();
    assert_eq!(agg.total_credits(), Money::from_cents(1000));
}

#[tokio::test]
#[serial]
async fn test_overflowing_apply_rolls_back_dedup_record() {
    let store = PostgresAggregateStore::new(get_test_pool().await);
    store
        .apply_entry(EntryId::new(1), date(4), Money::from_cents(i64::MAX - 50), Money::zero())
        .await
        .unwrap();

    let err = store
        .apply_entry(EntryId::new(2), date(4), Money::from_cents(100), Money::zero())
        .await
        .unwrap_err();

    assert!(matches!(err, ConsolidationError::Overflow { .. }), "{err:?}");
    assert!(!err.is_transient());
    assert!(!store.is_consolidated(EntryId::new(2)).await.unwrap());
    let agg = store.get_by_date(date(4)).await.unwrap().unwrap();
    assert_eq!(agg.total_credits(), Money::from_cents(i64::MAX - 50));
}

#[tokio::test]
#[serial]
async fn test_replace_and_range() {
    let store = PostgresAggregateStore::new(get_test_pool().await);
    store
        .upsert_additive(date(1), Money::from_cents(5), Money::zero())
        .await
        .unwrap();

    let rebuilt = DailyAggregate::new(date(1), Money::from_cents(700), Money::from_cents(200));
    store
        .replace(&rebuilt, &[EntryId::new(1), EntryId::new(2)])
        .await
        .unwrap();
    store
        .upsert_additive(date(3), Money::zero(), Money::from_cents(50))
        .await
        .unwrap();

    let range = store.get_range(date(1), date(3)).await.unwrap();
    assert_eq!(range.len(), 2);
    assert_eq!(range[0], rebuilt);
    assert!(store.is_consolidated(EntryId::new(2)).await.unwrap());

    assert!(matches!(
        store.get_range(date(3), date(1)).await,
        Err(ConsolidationError::InvalidRange { .. })
    ));
}

#[tokio::test]
#[serial]
async fn test_reprocess_against_postgres() {
    let pool = get_test_pool().await;
    let ledger = PostgresLedgerStore::new(pool.clone());
    let store = PostgresAggregateStore::new(pool);
    ledger
        .insert(NewEntry::new("Sale", 1, Money::from_cents(15050), date(30)))
        .await
        .unwrap();
    ledger
        .insert(NewEntry::new("Rent", 2, Money::from_cents(3000), date(30)))
        .await
        .unwrap();

    let orchestrator = ReprocessingOrchestrator::new(
        ledger.clone(),
        store.clone(),
        MokaReadCache::default(),
        DEFAULT_CACHE_TTL,
    );
    let first = orchestrator.reprocess(date(29), date(30)).await.unwrap();
    let second = orchestrator.reprocess(date(29), date(30)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.dates_skipped, vec![date(29)]);
    let agg = store.get_by_date(date(30)).await.unwrap().unwrap();
    assert_eq!(agg.balance().to_string(), "120.50");
    assert!(
        ledger
            .entries_by_date(date(30))
            .await
            .unwrap()
            .iter()
            .all(|e| e.processed)
    );
}
