//! HTTP surface and process wiring for the daily balance consolidation service.
//!
//! Provides REST endpoints for recording ledger entries, reading daily
//! balances and range reports, triggering reprocessing and inspecting the
//! dead-letter queue, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use consolidation::{
    AggregateStore, BalanceService, ConsolidationEngine, ConsolidationWorker,
    InMemoryAggregateStore, MokaReadCache, PostgresAggregateStore, ReadCache,
};
use ledger::{EntryType, InMemoryLedgerStore, LedgerStore, PostgresLedgerStore};
use messaging::{EventChannel, EventPublisher, InMemoryBroker, PostgresBroker};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

pub type SharedLedger = Arc<dyn LedgerStore>;
pub type SharedAggregates = Arc<dyn AggregateStore>;
pub type SharedCache = Arc<dyn ReadCache>;
pub type SharedChannel = Arc<dyn EventChannel>;

pub type Balances = BalanceService<SharedAggregates, SharedCache, SharedLedger>;
pub type Worker = ConsolidationWorker<SharedChannel, SharedAggregates, SharedCache, SharedLedger>;

/// Errors that abort process startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Long-lived stores and broker, constructed once at startup and shared by
/// the HTTP handlers and the consolidation worker.
#[derive(Clone)]
pub struct Backends {
    pub ledger: SharedLedger,
    pub aggregates: SharedAggregates,
    pub cache: SharedCache,
    pub channel: SharedChannel,
}

impl Backends {
    /// PostgreSQL when `DATABASE_URL` is set, in-memory otherwise.
    pub async fn from_config(config: &Config) -> Result<Self, StartupError> {
        match &config.database_url {
            Some(url) => Self::postgres(url, config).await,
            None => Ok(Self::in_memory(config).await),
        }
    }

    /// Everything in process memory, seeded with the default entry types.
    pub async fn in_memory(config: &Config) -> Self {
        Self {
            ledger: Arc::new(InMemoryLedgerStore::with_entry_types(EntryType::defaults()).await),
            aggregates: Arc::new(InMemoryAggregateStore::new()),
            cache: Arc::new(MokaReadCache::new(config.cache_capacity)),
            channel: Arc::new(InMemoryBroker::new(config.channel.clone())),
        }
    }

    /// Connects, runs migrations and builds the durable stores and broker.
    pub async fn postgres(url: &str, config: &Config) -> Result<Self, StartupError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(url)
            .await?;

        let ledger = PostgresLedgerStore::new(pool.clone());
        ledger.run_migrations().await?;
        tracing::info!("database migrations applied");

        Ok(Self {
            ledger: Arc::new(ledger),
            aggregates: Arc::new(PostgresAggregateStore::new(pool.clone())),
            cache: Arc::new(MokaReadCache::new(config.cache_capacity)),
            channel: Arc::new(PostgresBroker::new(pool, config.channel.clone())),
        })
    }

    /// Builds the consolidation worker consuming this backend's channel.
    pub fn worker(&self, cache_ttl: Duration) -> Worker {
        let engine = Arc::new(ConsolidationEngine::new(
            self.aggregates.clone(),
            self.cache.clone(),
            self.ledger.clone(),
            cache_ttl,
        ));
        ConsolidationWorker::new(self.channel.clone(), engine)
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub ledger: SharedLedger,
    pub publisher: EventPublisher<SharedChannel>,
    pub balances: Balances,
}

impl AppState {
    /// Wires the handlers' view of the backends. Background reprocess runs
    /// stop at the next date once `shutdown` is cancelled.
    pub fn new(backends: &Backends, cache_ttl: Duration, shutdown: CancellationToken) -> Self {
        Self {
            ledger: backends.ledger.clone(),
            publisher: EventPublisher::new(backends.channel.clone()),
            balances: BalanceService::new(
                backends.aggregates.clone(),
                backends.cache.clone(),
                backends.ledger.clone(),
                cache_ttl,
            )
            .with_shutdown(shutdown),
        }
    }

    pub fn channel(&self) -> &SharedChannel {
        self.publisher.channel()
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/entries", post(routes::entries::create))
        .route("/entries/{id}", get(routes::entries::get))
        .route("/balances", get(routes::balances::range))
        .route("/balances/reprocess", post(routes::balances::reprocess))
        .route("/balances/{date}", get(routes::balances::daily))
        .route("/dead-letters", get(routes::dead_letters::list))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// In-memory backends plus the state built on them, for tests and local runs.
pub async fn create_in_memory_state(config: &Config) -> (Arc<AppState>, Backends) {
    let backends = Backends::in_memory(config).await;
    let state = Arc::new(AppState::new(
        &backends,
        config.cache_ttl,
        CancellationToken::new(),
    ));
    (state, backends)
}
