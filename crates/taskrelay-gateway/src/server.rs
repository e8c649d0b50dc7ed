//! HTTP server implementation using Axum.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::{get, post};
use taskrelay_core::config::GatewayConfig;
use taskrelay_core::{Result, WorkerRegistry};
use taskrelay_dispatch::{CycleScheduler, CycleStats, FaultLog, SinkHealth};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::admission::AdmissionGateway;

/// Shared state for the gateway server.
pub struct AppState {
    pub admission: Arc<AdmissionGateway>,
    pub registry: Arc<WorkerRegistry>,
    pub stats: Arc<CycleStats>,
    pub health: Arc<SinkHealth>,
    pub faults: Arc<FaultLog>,
    /// Peers whose client-identity headers are believed.
    pub trusted_proxies: Vec<IpAddr>,
    pub start_time: Instant,
}

impl AppState {
    /// State sharing the scheduler's counters, health and fault log.
    pub fn from_scheduler(scheduler: &CycleScheduler, admission: Arc<AdmissionGateway>) -> Self {
        Self {
            admission,
            registry: Arc::clone(scheduler.registry()),
            stats: Arc::clone(scheduler.stats()),
            health: Arc::clone(scheduler.health()),
            faults: Arc::clone(scheduler.faults()),
            trusted_proxies: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn with_trusted_proxies(mut self, trusted_proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/stats", get(super::routes::stats))
        .route("/api/v1/tasks", post(super::routes::create_task))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically purge expired rate windows and idempotency records.
pub fn spawn_sweeper(
    admission: Arc<AdmissionGateway>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick is immediate and would find nothing to purge
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            let (windows, records) = admission.sweep();
            if windows + records > 0 {
                tracing::debug!("🧹 Swept {} rate windows, {} idempotency records", windows, records);
            }
        }
    })
}

/// Bind and serve until `shutdown` flips to `true`.
pub async fn start(
    config: &GatewayConfig,
    state: Arc<AppState>,
    sweep_every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let sweeper = spawn_sweeper(Arc::clone(&state.admission), sweep_every, shutdown.clone());
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway listening on http://{}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    if let Err(e) = sweeper.await {
        tracing::warn!("⚠️ Sweeper task ended abnormally: {}", e);
    }
    tracing::info!("🛑 Gateway stopped");
    Ok(())
}
