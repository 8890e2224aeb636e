use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tokio::sync::{Mutex, Notify};

use crate::{
    ChannelError, ChannelSettings, DeadLetter, DeadLetterReason, Delivery, DeliveryMode,
    DeliveryTag, EventChannel, MessageId, MessageProperties, Result,
};

/// A delivery held by this consumer, keyed by its local tag.
#[derive(Debug, Clone, Copy)]
struct Lease {
    message_id: MessageId,
    attempt: i32,
    lease_until: DateTime<Utc>,
}

/// PostgreSQL-backed durable broker.
///
/// Messages live in the `message_queue` table until acknowledged or
/// dead-lettered into `dead_letters`, so they survive process restarts.
/// Consumers claim rows with `FOR UPDATE SKIP LOCKED`, which lets several
/// processes share a queue without double delivery.
#[derive(Clone)]
pub struct PostgresBroker {
    pool: PgPool,
    settings: Arc<ChannelSettings>,
    leases: Arc<Mutex<HashMap<DeliveryTag, Lease>>>,
    next_tag: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::days(365))
}

fn attempts_from(raw: i32) -> u32 {
    u32::try_from(raw).unwrap_or_default()
}

impl PostgresBroker {
    /// Creates a broker over an existing pool. Run migrations first.
    pub fn new(pool: PgPool, settings: ChannelSettings) -> Self {
        Self {
            pool,
            settings: Arc::new(settings),
            leases: Arc::new(Mutex::new(HashMap::new())),
            next_tag: Arc::new(AtomicU64::new(1)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Number of messages waiting for delivery on this queue.
    pub async fn ready_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM message_queue WHERE queue = $1 AND state = 'ready'",
        )
        .bind(&self.settings.queue)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Dead-letters expired messages and returns stale leases to the queue.
    #[tracing::instrument(skip(self))]
    async fn sweep(&self, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let expired = sqlx::query(
            r#"
            WITH expired AS (
                DELETE FROM message_queue
                WHERE queue = $1
                  AND expires_at <= $2
                  AND (state = 'ready' OR lease_until <= $2)
                RETURNING id, body, attempts, published_at
            )
            INSERT INTO dead_letters (id, queue, body, reason, attempts, published_at, dead_lettered_at)
            SELECT id, $3, body, 'expired', attempts, published_at, $2 FROM expired
            "#,
        )
        .bind(&self.settings.queue)
        .bind(now)
        .bind(&self.settings.dead_letter_queue)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let released = sqlx::query(
            r#"
            UPDATE message_queue
            SET state = 'ready', lease_until = NULL, visible_at = $2
            WHERE queue = $1 AND state = 'delivered' AND lease_until <= $2
            "#,
        )
        .bind(&self.settings.queue)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if expired > 0 {
            tracing::warn!(count = expired, "expired messages dead-lettered");
            metrics::counter!("messaging_dead_lettered_total", "reason" => DeadLetterReason::Expired.as_str())
                .increment(expired);
        }
        if released > 0 {
            tracing::warn!(count = released, "unsettled deliveries returned to queue");
        }

        self.leases.lock().await.retain(|_, lease| lease.lease_until > now);
        Ok(())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<PgRow>> {
        let lease_until = now + to_delta(self.settings.message_ttl);
        let row = sqlx::query(
            r#"
            UPDATE message_queue
            SET state = 'delivered', lease_until = $3, attempts = attempts + 1
            WHERE id = (
                SELECT id FROM message_queue
                WHERE queue = $1 AND state = 'ready' AND visible_at <= $2 AND expires_at > $2
                ORDER BY published_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, body, persistent, published_at, expires_at, attempts, lease_until
            "#,
        )
        .bind(&self.settings.queue)
        .bind(now)
        .bind(lease_until)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn row_to_delivery(&self, row: PgRow) -> Result<Delivery> {
        let message_id = MessageId::from_uuid(row.try_get("id")?);
        let persistent: bool = row.try_get("persistent")?;
        let published_at: DateTime<Utc> = row.try_get("published_at")?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
        let attempt: i32 = row.try_get("attempts")?;
        let lease_until: DateTime<Utc> = row.try_get("lease_until")?;

        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        self.leases.lock().await.insert(
            tag,
            Lease {
                message_id,
                attempt,
                lease_until,
            },
        );

        Ok(Delivery {
            tag,
            message_id,
            body: row.try_get("body")?,
            properties: MessageProperties {
                delivery_mode: if persistent {
                    DeliveryMode::Persistent
                } else {
                    DeliveryMode::Transient
                },
                ttl: (expires_at - published_at).to_std().unwrap_or_default(),
                dead_letter_exchange: self.settings.dead_letter_exchange.clone(),
                published_at,
            },
            attempt: attempts_from(attempt),
        })
    }

    async fn take_lease(&self, tag: DeliveryTag) -> Result<Lease> {
        self.leases
            .lock()
            .await
            .remove(&tag)
            .ok_or(ChannelError::UnknownDeliveryTag(tag))
    }

    fn row_to_dead_letter(row: PgRow) -> Result<DeadLetter> {
        let reason: String = row.try_get("reason")?;
        let reason = reason
            .parse::<DeadLetterReason>()
            .map_err(ChannelError::Malformed)?;
        Ok(DeadLetter {
            message_id: MessageId::from_uuid(row.try_get("id")?),
            body: row.try_get("body")?,
            reason,
            attempts: attempts_from(row.try_get("attempts")?),
            published_at: row.try_get("published_at")?,
            dead_lettered_at: row.try_get("dead_lettered_at")?,
        })
    }
}

#[async_trait]
impl EventChannel for PostgresBroker {
    #[tracing::instrument(skip(self, body), fields(queue = %self.settings.queue))]
    async fn publish(&self, body: Vec<u8>) -> Result<MessageId> {
        let id = MessageId::new();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO message_queue (id, queue, body, persistent, published_at, expires_at, visible_at)
            VALUES ($1, $2, $3, TRUE, $4, $5, $4)
            "#,
        )
        .bind(id.as_uuid())
        .bind(&self.settings.queue)
        .bind(&body)
        .bind(now)
        .bind(now + to_delta(self.settings.message_ttl))
        .execute(&self.pool)
        .await?;

        self.notify.notify_one();
        Ok(id)
    }

    async fn receive(&self) -> Result<Delivery> {
        loop {
            let now = Utc::now();
            self.sweep(now).await?;
            let has_capacity = self.leases.lock().await.len() < self.settings.prefetch;

            if has_capacity {
                if let Some(row) = self.claim_next(now).await? {
                    return self.row_to_delivery(row).await;
                }
            }

            tokio::select! {
                () = self.notify.notified() => {}
                () = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        let lease = self.take_lease(tag).await?;

        let deleted = sqlx::query(
            "DELETE FROM message_queue WHERE id = $1 AND state = 'delivered' AND attempts = $2",
        )
        .bind(lease.message_id.as_uuid())
        .bind(lease.attempt)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if deleted == 0 {
            tracing::warn!(
                delivery_tag = tag,
                message_id = %lease.message_id,
                "ack for a delivery whose lease was already reclaimed"
            );
        }

        self.notify.notify_one();
        Ok(())
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<()> {
        let lease = self.take_lease(tag).await?;
        let now = Utc::now();

        let affected = if requeue {
            sqlx::query(
                r#"
                UPDATE message_queue
                SET state = 'ready', lease_until = NULL, visible_at = $3
                WHERE id = $1 AND state = 'delivered' AND attempts = $2
                "#,
            )
            .bind(lease.message_id.as_uuid())
            .bind(lease.attempt)
            .bind(now + to_delta(self.settings.redelivery_delay))
            .execute(&self.pool)
            .await?
            .rows_affected()
        } else {
            let moved = sqlx::query(
                r#"
                WITH rejected AS (
                    DELETE FROM message_queue
                    WHERE id = $1 AND state = 'delivered' AND attempts = $2
                    RETURNING id, body, attempts, published_at
                )
                INSERT INTO dead_letters (id, queue, body, reason, attempts, published_at, dead_lettered_at)
                SELECT id, $3, body, 'rejected', attempts, published_at, $4 FROM rejected
                "#,
            )
            .bind(lease.message_id.as_uuid())
            .bind(lease.attempt)
            .bind(&self.settings.dead_letter_queue)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if moved > 0 {
                tracing::warn!(message_id = %lease.message_id, "message rejected to dead-letter queue");
                metrics::counter!("messaging_dead_lettered_total", "reason" => DeadLetterReason::Rejected.as_str())
                    .increment(moved);
            }
            moved
        };

        if affected == 0 {
            tracing::warn!(
                delivery_tag = tag,
                message_id = %lease.message_id,
                "nack for a delivery whose lease was already reclaimed"
            );
        }

        self.notify.notify_one();
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query(
            r#"
            SELECT id, body, reason, attempts, published_at, dead_lettered_at
            FROM dead_letters
            WHERE queue = $1
            ORDER BY dead_lettered_at ASC, published_at ASC
            "#,
        )
        .bind(&self.settings.dead_letter_queue)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_dead_letter).collect()
    }

    fn settings(&self) -> &ChannelSettings {
        &self.settings
    }
}
