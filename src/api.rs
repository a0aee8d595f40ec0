use crate::cache::LocalCache;
use crate::pipeline::IngestPipeline;
use crate::types::{Position, Reading};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    pub cache: Arc<LocalCache>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/trucks", get(index_handler))
        .route("/trucks/record", post(record_handler))
        .route("/trucks/:device_id/route", get(route_handler))
        .route("/trucks/:device_id/latest", get(latest_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    pub device_id: String,
    pub battery_v1: f64,
    pub battery_v2: f64,
    #[serde(default)]
    pub status: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct OkBody {
    status: &'static str,
}

/// Validate an incoming record request, failing fast on the first invalid
/// field.
pub fn validate(req: &RecordRequest) -> Result<(), String> {
    if req.device_id.trim().is_empty() {
        return Err("device_id is required".to_string());
    }
    if !req.device_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err("device_id format is invalid".to_string());
    }
    if !req.battery_v1.is_finite() {
        return Err("battery_v1 must be a valid float value".to_string());
    }
    if !req.battery_v2.is_finite() {
        return Err("battery_v2 must be a valid float value".to_string());
    }
    if !req.latitude.is_finite() {
        return Err("latitude must be a valid float value".to_string());
    }
    if !req.longitude.is_finite() {
        return Err("longitude must be a valid float value".to_string());
    }
    if req.battery_v1 < 0.0 || req.battery_v1 > 100.0 {
        return Err("battery_v1 must be between 0 and 100".to_string());
    }
    if req.battery_v2 < 0.0 || req.battery_v2 > 100.0 {
        return Err("battery_v2 must be between 0 and 100".to_string());
    }
    if req.latitude < -90.0 || req.latitude > 90.0 {
        return Err("latitude must be between -90 and 90".to_string());
    }
    if req.longitude < -180.0 || req.longitude > 180.0 {
        return Err("longitude must be between -180 and 180".to_string());
    }
    Ok(())
}

async fn index_handler() -> &'static str {
    "Trucks API is live"
}

async fn record_handler(
    State(state): State<AppState>,
    Json(req): Json<RecordRequest>,
) -> impl IntoResponse {
    if let Err(message) = validate(&req) {
        log::error!("Rejected record for {:?}: {}", req.device_id, message);
        return (StatusCode::BAD_REQUEST, Json(ErrorBody { error: message })).into_response();
    }

    let reading = Reading {
        timestamp: Utc::now(),
        battery_v1: req.battery_v1,
        battery_v2: req.battery_v2,
        latitude: req.latitude,
        longitude: req.longitude,
        status: req.status,
    };

    // The response reflects only the storage of the reading; detection and
    // alerting inside the pipeline are best-effort side effects.
    match state.pipeline.ingest(&req.device_id, reading).await {
        Ok(()) => (StatusCode::OK, Json(OkBody { status: "ok" })).into_response(),
        Err(e) => {
            log::error!("Failed to store reading for {}: {}", req.device_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "Failed to store reading".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Short-window track projection for mapping consumers: the cached readings
/// reduced to ordered coordinate pairs.
async fn route_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Json<Vec<Position>> {
    let positions: Vec<Position> = state
        .cache
        .read_all(&device_id)
        .await
        .iter()
        .map(|r| r.position())
        .collect();
    Json(positions)
}

async fn latest_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    match state.cache.latest(&device_id).await {
        Some(reading) => (StatusCode::OK, Json(reading)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("No data found for device {}", device_id),
            }),
        )
            .into_response(),
    }
}
