use std::net::SocketAddr;
use std::sync::Arc;

use airwave_cache::{CacheRuntime, TieredCache, create_cache, spawn_sweeper};
use airwave_monitor::{
    HealthReporter, QueryInstrumentation, ReportInputs, SystemMemoryProbe, spawn_periodic,
};
use async_trait::async_trait;
use axum::{Router, middleware, routing::get};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::ServerError;
use crate::handlers;
use crate::middleware::{RequestCounters, track_requests};
use crate::queries::QueryLayer;

/// Reachability check for the store the cached queries are computed from.
///
/// An unreachable primary store makes the health report critical.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub queries: QueryLayer,
    pub reporter: Arc<HealthReporter>,
    pub requests: Arc<RequestCounters>,
    /// Whether a shared tier was configured; only then is its reachability reported.
    pub redis_configured: bool,
    pub primary_store: Option<Arc<dyn PrimaryStore>>,
}

impl AppState {
    pub fn new(queries: QueryLayer, reporter: Arc<HealthReporter>, redis_configured: bool) -> Self {
        Self {
            queries,
            reporter,
            requests: Arc::new(RequestCounters::new()),
            redis_configured,
            primary_store: None,
        }
    }

    /// Build the instrumentation and reporter described by `cfg` around `cache`.
    pub fn from_config(cfg: &AppConfig, cache: TieredCache) -> Self {
        let instrumentation = Arc::new(QueryInstrumentation::new(
            cfg.monitor.slow_query_threshold(),
        ));
        let reporter = Arc::new(HealthReporter::new(
            Arc::clone(&instrumentation),
            Arc::new(SystemMemoryProbe::with_budget(cfg.monitor.memory_budget())),
            cfg.monitor.thresholds(),
        ));
        let queries = QueryLayer::new(cache, instrumentation, cfg.cache.clone());
        Self::new(queries, reporter, cfg.redis.enabled)
    }

    pub fn with_primary_store(mut self, store: Arc<dyn PrimaryStore>) -> Self {
        self.primary_store = Some(store);
        self
    }

    /// Live inputs for a health report.
    pub async fn report_inputs(&self) -> ReportInputs {
        let primary_store_reachable = match &self.primary_store {
            Some(store) => Some(store.is_reachable().await),
            None => None,
        };
        let cache_reachable = if self.redis_configured {
            Some(self.queries.cache().is_remote_available().await)
        } else {
            None
        };
        ReportInputs {
            error_rate: self.requests.error_rate(),
            primary_store_reachable,
            cache_reachable,
        }
    }
}

/// Health and metrics endpoints plus the application `routes`.
pub fn build_app(state: AppState, routes: Router<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .merge(routes)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.requests),
            track_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct AirwaveServer {
    addr: SocketAddr,
    app: Router,
    background: Vec<JoinHandle<()>>,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    routes: Router<AppState>,
    primary_store: Option<Arc<dyn PrimaryStore>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            routes: Router::new(),
            primary_store: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Application routes served next to the health endpoints.
    pub fn with_routes(mut self, routes: Router<AppState>) -> Self {
        self.routes = routes;
        self
    }

    /// Store checked by `/health`; without one its reachability is not reported.
    pub fn with_primary_store(mut self, store: Arc<dyn PrimaryStore>) -> Self {
        self.primary_store = Some(store);
        self
    }

    /// Connect the cache and start the background tasks.
    pub async fn build(self) -> Result<AirwaveServer, ServerError> {
        self.config.validate().map_err(ServerError::Config)?;

        let CacheRuntime { cache, listener } =
            create_cache(&self.config.cache, &self.config.redis).await;
        let mut background: Vec<JoinHandle<()>> = listener.into_iter().collect();

        let mut state = AppState::from_config(&self.config, cache);
        if let Some(store) = self.primary_store {
            state = state.with_primary_store(store);
        }

        if let Some(every) = self.config.cache.sweep_interval() {
            background.push(spawn_sweeper(
                Arc::clone(state.queries.cache().local()),
                every,
            ));
        }

        if let Some(every) = self.config.monitor.report_interval() {
            let inputs_state = state.clone();
            background.push(spawn_periodic(
                Arc::clone(&state.reporter),
                every,
                move || {
                    let state = inputs_state.clone();
                    async move { state.report_inputs().await }
                },
            ));
        }

        tracing::info!(
            cache_mode = state.queries.cache().stats().mode,
            background_tasks = background.len(),
            "server initialized"
        );

        Ok(AirwaveServer {
            addr: self.addr,
            app: build_app(state, self.routes),
            background,
        })
    }
}

impl AirwaveServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn run(self) -> Result<(), ServerError> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr,
                source,
            })?;
        tracing::info!("listening on {}", self.addr);

        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        for task in &self.background {
            task.abort();
        }
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
