use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::positions::validate_point;
use crate::error::AppError;
use crate::geo::{eta_minutes, haversine_km};
use crate::models::delivery::{DeliveryRecord, DeliveryStatus};
use crate::models::position::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", post(create_delivery))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/position", patch(update_driver_position))
        .route("/deliveries/:id/status", patch(update_status))
        .route("/deliveries/:id/eta", get(get_eta))
}

#[derive(Deserialize)]
pub struct CreateDeliveryRequest {
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub customer_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

#[derive(Deserialize)]
pub struct UpdatePositionRequest {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DeliveryStatus,
}

#[derive(Serialize)]
pub struct EtaResponse {
    /// None until the driver's position is first reported.
    pub minutes: Option<i64>,
}

async fn create_delivery(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDeliveryRequest>,
) -> Result<Json<DeliveryRecord>, AppError> {
    validate_point(&payload.pickup)?;
    validate_point(&payload.dropoff)?;

    let record = state.create_delivery(
        payload.order_id,
        payload.driver_id,
        payload.customer_id,
        payload.pickup,
        payload.dropoff,
    );

    Ok(Json(record))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryRecord>, AppError> {
    state
        .fetch_delivery(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", id)))
}

async fn update_driver_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePositionRequest>,
) -> Result<Json<DeliveryRecord>, AppError> {
    let point = GeoPoint {
        lat: payload.lat,
        lng: payload.lng,
    };
    validate_point(&point)?;

    state
        .update_driver_position(id, point)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", id)))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<DeliveryRecord>, AppError> {
    state
        .update_delivery_status(id, payload.status)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", id)))
}

async fn get_eta(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<EtaResponse>, AppError> {
    let record = state
        .fetch_delivery(id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", id)))?;

    let minutes = record
        .current
        .map(|current| eta_minutes(haversine_km(&current, &record.dropoff)));

    Ok(Json(EtaResponse { minutes }))
}
