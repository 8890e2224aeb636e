use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::store::{LedgerStore, require_active, validate_new_entry};
use crate::{EntryId, EntryType, LedgerEntry, Money, Nature, NewEntry, Result};

/// PostgreSQL-backed ledger store implementation.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations for every table in the workspace schema.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn parse_nature(raw: &str) -> std::result::Result<Nature, sqlx::Error> {
        raw.parse().map_err(|e| sqlx::Error::Decode(Box::new(e)))
    }

    fn row_to_entry(row: PgRow) -> Result<LedgerEntry> {
        let nature: String = row.try_get("nature")?;
        Ok(LedgerEntry {
            id: EntryId::new(row.try_get("id")?),
            description: row.try_get("description")?,
            entry_type_id: row.try_get("entry_type_id")?,
            amount: Money::from_cents(row.try_get("amount_cents")?),
            nature: Self::parse_nature(&nature)?,
            date: row.try_get("entry_date")?,
            processed: row.try_get("processed")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_entry_type(row: PgRow) -> Result<EntryType> {
        let nature: String = row.try_get("nature")?;
        Ok(EntryType {
            id: row.try_get("id")?,
            description: row.try_get("description")?,
            nature: Self::parse_nature(&nature)?,
            active: row.try_get("active")?,
        })
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn insert(&self, entry: NewEntry) -> Result<LedgerEntry> {
        validate_new_entry(&entry)?;

        let mut tx = self.pool.begin().await?;

        let type_row = sqlx::query(
            "SELECT id, description, nature, active FROM entry_types WHERE id = $1 FOR SHARE",
        )
        .bind(entry.entry_type_id)
        .fetch_optional(&mut *tx)
        .await?;
        let entry_type = type_row.map(Self::row_to_entry_type).transpose()?;
        let entry_type = require_active(entry_type, entry.entry_type_id)?;

        let row = sqlx::query(
            r#"
            INSERT INTO ledger_entries (description, entry_type_id, amount_cents, nature, entry_date)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, description, entry_type_id, amount_cents, nature, entry_date, processed, created_at
            "#,
        )
        .bind(&entry.description)
        .bind(entry_type.id)
        .bind(entry.amount.cents())
        .bind(entry_type.nature.to_string())
        .bind(entry.date)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let committed = Self::row_to_entry(row)?;
        tracing::debug!(entry_id = %committed.id, date = %committed.date, "ledger entry committed");
        Ok(committed)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, description, entry_type_id, amount_cents, nature, entry_date, processed, created_at
            FROM ledger_entries
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_entry).transpose()
    }

    async fn entries_by_date(&self, date: NaiveDate) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, description, entry_type_id, amount_cents, nature, entry_date, processed, created_at
            FROM ledger_entries
            WHERE entry_date = $1
            ORDER BY id ASC
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn mark_processed(&self, ids: &[EntryId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let raw: Vec<i64> = ids.iter().map(EntryId::as_i64).collect();
        sqlx::query("UPDATE ledger_entries SET processed = TRUE WHERE id = ANY($1)")
            .bind(raw)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_entry_type(&self, id: i32) -> Result<Option<EntryType>> {
        let row = sqlx::query("SELECT id, description, nature, active FROM entry_types WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_entry_type).transpose()
    }

    async fn add_entry_type(&self, entry_type: EntryType) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entry_types (id, description, nature, active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                description = EXCLUDED.description,
                nature = EXCLUDED.nature,
                active = EXCLUDED.active
            "#,
        )
        .bind(entry_type.id)
        .bind(&entry_type.description)
        .bind(entry_type.nature.to_string())
        .bind(entry_type.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
