use async_trait::async_trait;
use chrono::NaiveDate;
use common::{EntryId, Money};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::store::{AggregateStore, ApplyOutcome};
use crate::{ConsolidationError, DailyAggregate, Result};

/// PostgreSQL-backed aggregate store.
///
/// Increments run as a single `INSERT .. ON CONFLICT DO UPDATE` so Postgres
/// serializes concurrent writers on the row lock. The dedup record in
/// `consolidated_entries` and the increment share one transaction.
#[derive(Clone)]
pub struct PostgresAggregateStore {
    pool: PgPool,
}

impl PostgresAggregateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_aggregate(row: PgRow) -> Result<DailyAggregate> {
        let aggregate = DailyAggregate::new(
            row.try_get("aggregate_date")?,
            Money::from_cents(row.try_get("total_credits_cents")?),
            Money::from_cents(row.try_get("total_debits_cents")?),
        );

        let stored_balance: i64 = row.try_get("balance_cents")?;
        if stored_balance != aggregate.balance().cents() {
            tracing::warn!(
                date = %aggregate.date(),
                stored_balance,
                "stored balance disagrees with totals, using recomputed value"
            );
        }
        Ok(aggregate)
    }

    async fn increment(
        conn: &mut PgConnection,
        date: NaiveDate,
        credits_delta: Money,
        debits_delta: Money,
    ) -> Result<DailyAggregate> {
        let row = sqlx::query(
            r#"
            INSERT INTO daily_aggregates (aggregate_date, total_credits_cents, total_debits_cents, balance_cents)
            VALUES ($1, $2, $3, $2 - $3)
            ON CONFLICT (aggregate_date) DO UPDATE SET
                total_credits_cents = daily_aggregates.total_credits_cents + EXCLUDED.total_credits_cents,
                total_debits_cents  = daily_aggregates.total_debits_cents + EXCLUDED.total_debits_cents,
                balance_cents       = daily_aggregates.balance_cents + EXCLUDED.balance_cents,
                updated_at          = now()
            RETURNING aggregate_date, total_credits_cents, total_debits_cents, balance_cents
            "#,
        )
        .bind(date)
        .bind(credits_delta.cents())
        .bind(debits_delta.cents())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| overflow_or_database(e, date))?;

        Self::row_to_aggregate(row)
    }
}

/// SQLSTATE `numeric_value_out_of_range`, raised when a BIGINT total overflows.
const NUMERIC_OUT_OF_RANGE: &str = "22003";

fn overflow_or_database(err: sqlx::Error, date: NaiveDate) -> ConsolidationError {
    let out_of_range = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == NUMERIC_OUT_OF_RANGE);
    if out_of_range {
        ConsolidationError::Overflow { date }
    } else {
        ConsolidationError::Database(err)
    }
}

#[async_trait]
impl AggregateStore for PostgresAggregateStore {
    async fn get_by_date(&self, date: NaiveDate) -> Result<Option<DailyAggregate>> {
        let row = sqlx::query(
            r#"
            SELECT aggregate_date, total_credits_cents, total_debits_cents, balance_cents
            FROM daily_aggregates
            WHERE aggregate_date = $1
            "#,
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_aggregate).transpose()
    }

    async fn upsert_additive(
        &self,
        date: NaiveDate,
        credits_delta: Money,
        debits_delta: Money,
    ) -> Result<DailyAggregate> {
        let mut conn = self.pool.acquire().await?;
        Self::increment(&mut *conn, date, credits_delta, debits_delta).await
    }

    #[tracing::instrument(skip(self))]
    async fn apply_entry(
        &self,
        entry_id: EntryId,
        date: NaiveDate,
        credits_delta: Money,
        debits_delta: Money,
    ) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        let recorded = sqlx::query(
            r#"
            INSERT INTO consolidated_entries (entry_id, aggregate_date)
            VALUES ($1, $2)
            ON CONFLICT (entry_id) DO NOTHING
            "#,
        )
        .bind(entry_id.as_i64())
        .bind(date)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if recorded == 0 {
            tx.rollback().await?;
            return Ok(ApplyOutcome::Duplicate);
        }

        let aggregate = Self::increment(&mut *tx, date, credits_delta, debits_delta).await?;
        tx.commit().await?;
        Ok(ApplyOutcome::Applied(aggregate))
    }

    #[tracing::instrument(skip(self, aggregate, entries), fields(date = %aggregate.date(), entries = entries.len()))]
    async fn replace(&self, aggregate: &DailyAggregate, entries: &[EntryId]) -> Result<()> {
        let ids: Vec<i64> = entries.iter().map(EntryId::as_i64).collect();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO daily_aggregates (aggregate_date, total_credits_cents, total_debits_cents, balance_cents)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (aggregate_date) DO UPDATE SET
                total_credits_cents = EXCLUDED.total_credits_cents,
                total_debits_cents  = EXCLUDED.total_debits_cents,
                balance_cents       = EXCLUDED.balance_cents,
                updated_at          = now()
            "#,
        )
        .bind(aggregate.date())
        .bind(aggregate.total_credits().cents())
        .bind(aggregate.total_debits().cents())
        .bind(aggregate.balance().cents())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO consolidated_entries (entry_id, aggregate_date)
            SELECT id, $2 FROM UNNEST($1::BIGINT[]) AS t(id)
            ON CONFLICT (entry_id) DO NOTHING
            "#,
        )
        .bind(&ids)
        .bind(aggregate.date())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyAggregate>> {
        if start > end {
            return Err(ConsolidationError::InvalidRange { start, end });
        }

        let rows = sqlx::query(
            r#"
            SELECT aggregate_date, total_credits_cents, total_debits_cents, balance_cents
            FROM daily_aggregates
            WHERE aggregate_date BETWEEN $1 AND $2
            ORDER BY aggregate_date ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_aggregate).collect()
    }

    async fn is_consolidated(&self, entry_id: EntryId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM consolidated_entries WHERE entry_id = $1)",
        )
        .bind(entry_id.as_i64())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
