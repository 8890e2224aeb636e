//! Daily balance consolidation.
//!
//! This crate turns entry-created events into per-day rollups and serves them:
//! - [`DailyAggregate`] and [`RangeSummary`], the derived read models
//! - [`AggregateStore`] with in-memory and PostgreSQL implementations
//! - [`ReadCache`], a TTL-bounded cache-aside layer backed by moka
//! - [`ConsolidationEngine`] and [`ConsolidationWorker`], the idempotent
//!   event consumer and its bounded worker loop
//! - [`ReprocessingOrchestrator`] for rebuilding days from the ledger
//! - [`BalanceService`], the query surface

pub mod aggregate;
pub mod cache;
pub mod engine;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod reprocess;
pub mod store;
pub mod worker;

pub use aggregate::{DailyAggregate, RangeSummary};
pub use cache::{DEFAULT_CACHE_TTL, MokaReadCache, ReadCache};
pub use engine::{ConsolidationEngine, Disposition, HandleOutcome};
pub use error::{CacheError, ConsolidationError, ReprocessError, Result};
pub use memory::InMemoryAggregateStore;
pub use postgres::PostgresAggregateStore;
pub use query::{BalanceService, ReprocessTicket};
pub use reprocess::{ReprocessReport, ReprocessingOrchestrator};
pub use store::{AggregateStore, ApplyOutcome};
pub use worker::ConsolidationWorker;
