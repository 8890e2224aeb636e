//! Cache-aside layer for daily aggregates.
//!
//! The cache is never a source of truth: entries are written after the
//! aggregate store commits, read before falling back to it, and expire on a
//! TTL so a missed refresh corrects itself. Concurrent writers follow
//! last-writer-wins.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use moka::Expiry;
use moka::future::Cache;

use crate::{CacheError, DailyAggregate};

/// Default lifetime of a cached aggregate (30 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Default cache capacity (number of days).
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Read cache keyed by date.
#[async_trait]
pub trait ReadCache: Send + Sync {
    async fn get(&self, date: NaiveDate) -> Result<Option<DailyAggregate>, CacheError>;

    /// Stores the aggregate under its date for `ttl`.
    async fn set(&self, aggregate: &DailyAggregate, ttl: Duration) -> Result<(), CacheError>;
}

#[async_trait]
impl<T: ReadCache + ?Sized> ReadCache for Arc<T> {
    async fn get(&self, date: NaiveDate) -> Result<Option<DailyAggregate>, CacheError> {
        (**self).get(date).await
    }

    async fn set(&self, aggregate: &DailyAggregate, ttl: Duration) -> Result<(), CacheError> {
        (**self).set(aggregate, ttl).await
    }
}

#[derive(Debug, Clone)]
struct CachedAggregate {
    aggregate: DailyAggregate,
    ttl: Duration,
}

/// Expires each entry after the TTL it was stored with.
struct PerEntryTtl;

impl Expiry<NaiveDate, CachedAggregate> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &NaiveDate,
        value: &CachedAggregate,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &NaiveDate,
        value: &CachedAggregate,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process read cache backed by moka.
#[derive(Clone)]
pub struct MokaReadCache {
    cache: Cache<NaiveDate, CachedAggregate>,
    unavailable: Arc<AtomicBool>,
}

impl MokaReadCache {
    /// Creates a cache holding at most `capacity` days.
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .expire_after(PerEntryTtl)
                .build(),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every operation fail with [`CacheError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drops a cached day.
    pub async fn invalidate(&self, date: NaiveDate) {
        self.cache.invalidate(&date).await;
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable(
                "read cache marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MokaReadCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[async_trait]
impl ReadCache for MokaReadCache {
    async fn get(&self, date: NaiveDate) -> Result<Option<DailyAggregate>, CacheError> {
        self.check_available()?;
        Ok(self.cache.get(&date).await.map(|cached| cached.aggregate))
    }

    async fn set(&self, aggregate: &DailyAggregate, ttl: Duration) -> Result<(), CacheError> {
        self.check_available()?;
        self.cache
            .insert(
                aggregate.date(),
                CachedAggregate {
                    aggregate: aggregate.clone(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::Money;

    use super::*;

    fn aggregate(cents: i64) -> DailyAggregate {
        DailyAggregate::new(
            NaiveDate::from_ymd_opt(2024, 4, 30).unwrap(),
            Money::from_cents(cents),
            Money::zero(),
        )
    }

    #[tokio::test]
    async fn set_then_get() {
        let cache = MokaReadCache::default();
        let agg = aggregate(100);

        cache.set(&agg, DEFAULT_CACHE_TTL).await.unwrap();

        assert_eq!(cache.get(agg.date()).await.unwrap(), Some(agg));
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let cache = MokaReadCache::default();
        cache.set(&aggregate(100), DEFAULT_CACHE_TTL).await.unwrap();
        cache.set(&aggregate(250), DEFAULT_CACHE_TTL).await.unwrap();

        let cached = cache.get(aggregate(0).date()).await.unwrap().unwrap();
        assert_eq!(cached.total_credits(), Money::from_cents(250));
    }

    #[tokio::test]
    async fn entries_expire_after_their_ttl() {
        let cache = MokaReadCache::default();
        let agg = aggregate(100);

        cache.set(&agg, Duration::from_millis(50)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.get(agg.date()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = MokaReadCache::default();
        let agg = aggregate(100);
        cache.set(&agg, DEFAULT_CACHE_TTL).await.unwrap();

        cache.invalidate(agg.date()).await;

        assert_eq!(cache.get(agg.date()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unavailable_cache_reports_errors() {
        let cache = MokaReadCache::default();
        cache.set_unavailable(true);

        assert!(cache.set(&aggregate(1), DEFAULT_CACHE_TTL).await.is_err());
        assert!(cache.get(aggregate(1).date()).await.is_err());
    }
}
