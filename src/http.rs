//! Read-only JSON API (ambient, C10): exposes cache stats, recent log
//! entries and the active blocklist size for operational visibility. No
//! mutation endpoints — every route is a plain read against the components
//! the proxy already holds.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::cache::{Cache, Stats as CacheStats};
use crate::hijack::HijackEngine;
use crate::log::{LogWriter, LoggedEntry};

#[derive(Clone)]
struct ApiState {
    cache: Arc<Cache>,
    hijack: Arc<HijackEngine>,
    log: Arc<LogWriter>,
}

#[derive(Debug, serde::Deserialize)]
struct LogQuery {
    #[serde(default = "LogQuery::default_n")]
    n: u32,
}

impl LogQuery {
    fn default_n() -> u32 {
        50
    }
}

#[derive(Debug, serde::Serialize)]
struct BlocklistReport {
    size: usize,
}

async fn cache_stats(State(state): State<ApiState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

async fn log_entries(
    State(state): State<ApiState>,
    Query(query): Query<LogQuery>,
) -> Json<Vec<LoggedEntry>> {
    Json(state.log.get(query.n).await)
}

async fn blocklist_report(State(state): State<ApiState>) -> Json<BlocklistReport> {
    let matcher = state.hijack.snapshot().await;
    Json(BlocklistReport { size: matcher.len() })
}

fn router(cache: Arc<Cache>, hijack: Arc<HijackEngine>, log: Arc<LogWriter>) -> Router {
    Router::new()
        .route("/stats/cache", get(cache_stats))
        .route("/stats/log", get(log_entries))
        .route("/stats/blocklist", get(blocklist_report))
        .with_state(ApiState { cache, hijack, log })
}

/// Serves the read-only API at `address` until the process is terminated.
/// Callers only start this when `dns.listen_http` is configured.
pub async fn serve(
    address: SocketAddr,
    cache: Arc<Cache>,
    hijack: Arc<HijackEngine>,
    log: Arc<LogWriter>,
) -> axum::hyper::Result<()> {
    tracing::info!("http api listening on {address}");
    axum::Server::bind(&address)
        .serve(router(cache, hijack, log).into_make_service())
        .await
}
