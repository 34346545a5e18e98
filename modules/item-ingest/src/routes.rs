//! Operator HTTP surface: health, readiness, metrics
//!
//! `/health` answers 200 for as long as the process is alive; `/ready` probes
//! the channel and the store without consuming or mutating anything and names
//! the failing dependency on 503. Neither is on the data-processing path.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{SecondsFormat, Utc};
use event_channel::DeliveryChannel;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::stats::StatsTracker;
use crate::store::ItemStore;

pub const SERVICE_NAME: &str = "item-ingest";

#[derive(Clone)]
pub struct AppState {
    pub stats: Arc<StatsTracker>,
    pub channel: Arc<dyn DeliveryChannel>,
    pub store: Arc<dyn ItemStore>,
}

pub fn operator_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.stats.snapshot();
    let now = Utc::now();

    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": now.to_rfc3339_opts(SecondsFormat::Millis, true),
        "uptime": snapshot.uptime_seconds(now),
        "stats": snapshot,
    }))
}

async fn ready(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (channel, store) = tokio::join!(state.channel.check_connection(), state.store.ping());

    let checks = json!({
        "channel": match &channel {
            Ok(()) => "connected".to_string(),
            Err(e) => format!("error: {e}"),
        },
        "store": match &store {
            Ok(()) => "connected".to_string(),
            Err(e) => format!("error: {e}"),
        },
    });

    if channel.is_err() || store.is_err() {
        let failing: Vec<&str> = [
            channel.is_err().then_some("channel"),
            store.is_err().then_some("store"),
        ]
        .into_iter()
        .flatten()
        .collect();

        tracing::warn!(failing = ?failing, "readiness check failed");

        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not ready",
                "failing": failing,
                "checks": checks,
            })),
        ));
    }

    Ok(Json(json!({
        "status": "ready",
        "checks": checks,
    })))
}

async fn metrics(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.stats.snapshot();
    let now = Utc::now();

    Json(json!({
        "timestamp": now.to_rfc3339_opts(SecondsFormat::Millis, true),
        "uptime": snapshot.uptime_seconds(now),
        "processingRate": snapshot.processing_rate(now),
        "stats": snapshot,
    }))
}
