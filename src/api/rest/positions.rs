use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, put};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::position::{GeoPoint, NearbyUser, PositionReading, UserCategory, UserPosition};
use crate::state::AppState;
use crate::tracker::DEFAULT_RADIUS_KM;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/positions", get(list_positions))
        .route("/positions/:user_id", put(report_position))
        .route("/nearby", get(find_nearby))
}

#[derive(Deserialize)]
pub struct ReportPositionRequest {
    pub location: GeoPoint,
    pub accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub category: UserCategory,
}

#[derive(Deserialize)]
pub struct NearbyParams {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
    pub category: Option<UserCategory>,
}

async fn report_position(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<ReportPositionRequest>,
) -> Result<Json<UserPosition>, AppError> {
    validate_point(&payload.location)?;

    let reading = PositionReading {
        point: payload.location,
        accuracy: payload.accuracy,
        heading: payload.heading,
        speed: payload.speed,
        timestamp: Utc::now(),
    };

    let row = state.upsert_position(user_id, payload.category, &reading);
    Ok(Json(row))
}

async fn list_positions(State(state): State<Arc<AppState>>) -> Json<Vec<UserPosition>> {
    let rows = state
        .positions
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(rows)
}

async fn find_nearby(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NearbyParams>,
) -> Result<Json<Vec<NearbyUser>>, AppError> {
    let origin = GeoPoint {
        lat: params.lat,
        lng: params.lng,
    };
    validate_point(&origin)?;

    let radius_km = params.radius_km.unwrap_or(DEFAULT_RADIUS_KM);
    if !(radius_km >= 0.0) {
        return Err(AppError::BadRequest("radius_km must be >= 0".to_string()));
    }

    let rows = state.find_nearby(&origin, radius_km, params.category);
    Ok(Json(rows))
}

pub(super) fn validate_point(point: &GeoPoint) -> Result<(), AppError> {
    if !point.lat.is_finite() || !(-90.0..=90.0).contains(&point.lat) {
        return Err(AppError::BadRequest(format!(
            "latitude out of range: {}",
            point.lat
        )));
    }
    if !point.lng.is_finite() || !(-180.0..=180.0).contains(&point.lng) {
        return Err(AppError::BadRequest(format!(
            "longitude out of range: {}",
            point.lng
        )));
    }
    Ok(())
}
