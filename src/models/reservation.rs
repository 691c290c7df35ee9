use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Лежит в Ticket Journal как reservations.status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// AVAILABLE не материализуется нигде — это отсутствие записи и в Seat Index, и в Ticket Journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeatStatus {
    Available,
    Pending,
    Reserved,
}

/// Составной ключ места, уникальный в пределах события.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeatCoordinate {
    #[serde(rename = "zoneNumber")]
    pub zone_number: i32,
    pub row: i32,
    pub column: i32,
}

impl SeatCoordinate {
    pub fn new(zone_number: i32, row: i32, column: i32) -> Self {
        Self { zone_number, row, column }
    }
}

/// Строка заголовка резервации, как она лежит в reservations.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReservationHeader {
    pub id: Uuid,
    pub user_id: String,
    pub event_id: String,
    pub status: ReservationStatus,
    pub stripe_session_id: Option<String>,
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Строка билета, как она лежит в tickets. Никогда не обновляется и не удаляется ядром.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TicketRow {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub event_id: String,
    pub zone_number: i32,
    pub row_number: i32,
    pub col_number: i32,
    pub created_at: DateTime<Utc>,
}

impl TicketRow {
    pub fn seat(&self) -> SeatCoordinate {
        SeatCoordinate::new(self.zone_number, self.row_number, self.col_number)
    }
}

/// Ответ Get/List наружу — собирает заголовок, места и остаток TTL в одну DTO.
#[derive(Debug, Clone, Serialize)]
pub struct ReservationView {
    pub reservation_id: Uuid,
    pub user_id: String,
    pub event_id: String,
    pub status: ReservationStatus,
    pub total_price: Decimal,
    pub seats: Vec<SeatCoordinate>,
    pub payment_client_secret: Option<String>,
    pub time_left_seconds: i64,
}
