//! reservations.rs
//!
//! HTTP surface for the Reservation Coordinator (§4.D). The original design specifies this
//! as a gRPC `ReservationService`; nothing in this workspace's stack pulls in `tonic`, so it
//! is reimplemented as a JSON API under `/api/reservations` — same five operations, same
//! error taxonomy (§7), carried over as HTTP status codes via `CoordinatorError`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoordinatorError;
use crate::middleware::UserId;
use crate::models::{ReservationView, SeatCoordinate};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reservations", post(create_hold).get(list_reservations))
        .route("/reservations/{id}", get(get_reservation).delete(cancel_reservation))
        .route("/reservations/{id}/confirm", post(confirm_reservation))
        .route("/reservations/by-session/{sessionId}", get(get_reservation_by_payment_session))
}

#[derive(Debug, Deserialize)]
struct CreateHoldRequest {
    #[serde(rename = "eventId")]
    event_id: String,
    seats: Vec<SeatCoordinate>,
    #[serde(rename = "totalPrice")]
    total_price: Decimal,
}

#[derive(Debug, Serialize)]
struct CreateHoldResponse {
    #[serde(rename = "reservationId")]
    reservation_id: Uuid,
}

async fn create_hold(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Json(body): Json<CreateHoldRequest>,
) -> Result<Json<CreateHoldResponse>, CoordinatorError> {
    let reservation_id = state
        .coordinator
        .create_hold(&user_id, &body.event_id, &body.seats, body.total_price)
        .await?;
    Ok(Json(CreateHoldResponse { reservation_id }))
}

async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, CoordinatorError> {
    state.coordinator.cancel(id).await?;
    Ok(Json(serde_json::json!({ "reservationId": id })))
}

async fn confirm_reservation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, CoordinatorError> {
    state.coordinator.confirm(id).await?;
    Ok(Json(serde_json::json!({ "reservationId": id, "success": true })))
}

async fn get_reservation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationView>, CoordinatorError> {
    let view = state.coordinator.get(id).await?;
    Ok(Json(view))
}

async fn list_reservations(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<ReservationView>>, CoordinatorError> {
    let views = state.coordinator.list(&user_id).await?;
    Ok(Json(views))
}

/// `GetReservationByPaymentSessionID` from the gRPC surface (§6) — used by payment-flow
/// clients that only know the checkout session id, not the reservationId.
async fn get_reservation_by_payment_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<ReservationView>, CoordinatorError> {
    let header = state
        .coordinator
        .find_by_payment_session(&session_id)
        .await?
        .ok_or(CoordinatorError::NotFound)?;
    let view = state.coordinator.get(header.id).await?;
    Ok(Json(view))
}
