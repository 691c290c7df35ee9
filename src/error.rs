use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;

/// Таксономия ошибок координатора. Варианты соответствуют §7 спецификации один к одному;
/// только координатор решает, что с каждой делать (откат, ретрай, проброс) — остальные
/// компоненты просто поднимают свой типизированный вариант наверх.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("seat already taken")]
    SeatTaken,

    #[error("reservation not found")]
    NotFound,

    #[error("hold already expired")]
    Expired,

    #[error("too close to expiry to cancel safely")]
    TooLate,

    #[error("reservation is in a terminal state that forbids this operation")]
    BadState,

    #[error("payment session could not be created")]
    PaymentInitFailed,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            CoordinatorError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT"),
            CoordinatorError::SeatTaken => (StatusCode::CONFLICT, "SEAT_TAKEN"),
            CoordinatorError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            CoordinatorError::Expired => (StatusCode::CONFLICT, "EXPIRED"),
            CoordinatorError::TooLate => (StatusCode::CONFLICT, "TOO_LATE"),
            CoordinatorError::BadState => (StatusCode::UNPROCESSABLE_ENTITY, "BAD_STATE"),
            CoordinatorError::PaymentInitFailed => {
                (StatusCode::BAD_GATEWAY, "PAYMENT_INIT_FAILED")
            }
            CoordinatorError::Internal(e) => {
                tracing::error!(error = %e, "internal coordinator error");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
            }
        };

        (status, Json(json!({ "error": code, "message": self.to_string() }))).into_response()
    }
}

/// Ошибки Seat Index — чисто транспортные; координатор переводит их в
/// CoordinatorError::Internal или в SEAT_TAKEN в зависимости от контекста вызова.
#[derive(Debug, thiserror::Error)]
pub enum SeatIndexError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("seat coordinate malformed: {0}")]
    BadKey(String),
}

/// Ошибки Ticket Journal. Conflict — единственный вариант, на который координатор реагирует
/// содержательно (SEAT_TAKEN); остальное — инфраструктура.
#[derive(Debug, thiserror::Error)]
pub enum TicketJournalError {
    #[error("seat already confirmed for another reservation")]
    Conflict,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Ошибки Hold Store.
#[derive(Debug, thiserror::Error)]
pub enum HoldStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("hold not found")]
    NotFound,
}

/// Ошибки исходящего вызова к платёжному провайдеру (создание checkout-сессии).
#[derive(Debug, thiserror::Error)]
pub enum PaymentGatewayError {
    #[error("payment gateway circuit breaker is open")]
    CircuitOpen,
    #[error("payment gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
}

// Транспортные ошибки компонентов просто становятся CoordinatorError::Internal — только
// confirm_seats-конфликт в Ticket Journal координатор разбирает отдельно (см. coordinator.rs).
impl From<SeatIndexError> for CoordinatorError {
    fn from(e: SeatIndexError) -> Self {
        CoordinatorError::Internal(e.into())
    }
}

impl From<HoldStoreError> for CoordinatorError {
    fn from(e: HoldStoreError) -> Self {
        match e {
            HoldStoreError::NotFound => CoordinatorError::NotFound,
            other => CoordinatorError::Internal(other.into()),
        }
    }
}

impl From<TicketJournalError> for CoordinatorError {
    fn from(e: TicketJournalError) -> Self {
        match e {
            TicketJournalError::Conflict => CoordinatorError::SeatTaken,
            other => CoordinatorError::Internal(other.into()),
        }
    }
}

impl From<PaymentGatewayError> for CoordinatorError {
    fn from(e: PaymentGatewayError) -> Self {
        CoordinatorError::Internal(e.into())
    }
}
