use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use mediarelay_core::{Stage, WorkerStatus};

use super::items::{store_error, ApiError};
use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Pipeline overview
#[derive(Serialize)]
pub struct StatusResponse {
    /// Item count for every stage, zero included.
    pub items: BTreeMap<String, i64>,
    pub total_items: i64,
    pub workers: Vec<WorkerStatus>,
}

pub async fn status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let counts = state.store().count_by_stage().map_err(store_error)?;

    let items: BTreeMap<String, i64> = Stage::ALL
        .iter()
        .map(|stage| {
            (
                stage.as_str().to_string(),
                counts.get(stage).copied().unwrap_or(0),
            )
        })
        .collect();
    let total_items = items.values().sum();

    Ok(Json(StatusResponse {
        items,
        total_items,
        workers: state.worker_statuses(),
    }))
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
