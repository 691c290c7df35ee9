//! coordinator.rs
//!
//! Reservation Coordinator — владелец стейт-машины холда. Пять операций, все идемпотентны
//! к ретраю при транзиентной ошибке, но не к логической (повторный Confirm уже
//! подтверждённой резервации — успех без побочных эффектов, а не ошибка).
//!
//! Координатор не держит собственного состояния: каждый вызов читает и пишет через Seat
//! Index, Hold Store и Ticket Journal, а интерпретация их типизированных ошибок (откат vs.
//! проброс) происходит только здесь — сами компоненты ничего не знают друг о друге.

use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use crate::bus::SeatEventBus;
use crate::error::CoordinatorError;
use crate::hold_store::HoldStore;
use crate::models::{
    BusMessage, ReservationHeader, ReservationStatus, ReservationView, SeatCoordinate, SeatStatus,
    SeatUpdate, SeatUpdateBatch,
};
use crate::seat_index::SeatIndex;
use crate::services::payment::PaymentGatewayClient;
use crate::ticket_journal::TicketJournal;

#[derive(Clone)]
pub struct Coordinator {
    seat_index: SeatIndex,
    hold_store: HoldStore,
    ticket_journal: TicketJournal,
    bus: SeatEventBus,
    payment: PaymentGatewayClient,
    hold_ttl_seconds: i64,
    safety_buffer_seconds: i64,
}

impl Coordinator {
    pub fn new(
        seat_index: SeatIndex,
        hold_store: HoldStore,
        ticket_journal: TicketJournal,
        bus: SeatEventBus,
        payment: PaymentGatewayClient,
        hold_ttl_seconds: i64,
        safety_buffer_seconds: i64,
    ) -> Self {
        Self {
            seat_index,
            hold_store,
            ticket_journal,
            bus,
            payment,
            hold_ttl_seconds,
            safety_buffer_seconds,
        }
    }

    /// §4.D CreateHold.
    pub async fn create_hold(
        &self,
        user_id: &str,
        event_id: &str,
        seats: &[SeatCoordinate],
        total_price: Decimal,
    ) -> Result<Uuid, CoordinatorError> {
        validate_create_hold(user_id, event_id, seats, total_price)?;

        // Шаг 1 — предпроверка. Гонка с шагом 4 возможна (см. §4.D race policy), но
        // окончательным арбитром всё равно остаётся уникальное ограничение Ticket Journal
        // на confirmSeats — здесь мы лишь отсекаем заведомо занятые места.
        for seat in seats {
            if !self.seat_index.is_available(event_id, *seat).await? {
                return Err(CoordinatorError::SeatTaken);
            }
        }

        let reservation_id = Uuid::new_v4();

        // Шаг 3 — запись в Hold Store.
        self.hold_store
            .put_hold(&reservation_id.to_string(), user_id, seats, self.hold_ttl_seconds)
            .await?;

        // Шаг 4 — захват в Seat Index, по одному месту. Откатываем уже захваченные места
        // при первой неудаче.
        let mut claimed: Vec<SeatCoordinate> = Vec::with_capacity(seats.len());
        for seat in seats {
            match self
                .seat_index
                .claim_temporary(event_id, *seat, &reservation_id.to_string(), self.hold_ttl_seconds)
                .await
            {
                Ok(()) => claimed.push(*seat),
                Err(e) => {
                    self.rollback_hold(user_id, reservation_id, event_id, &claimed).await;
                    return Err(e.into());
                }
            }
        }

        // Шаг 5 — платёжная сессия.
        let session = match self.payment.create_checkout_session(reservation_id, total_price).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, reservation_id = %reservation_id, "payment session creation failed, rolling back hold");
                self.rollback_hold(user_id, reservation_id, event_id, &claimed).await;
                return Err(CoordinatorError::PaymentInitFailed);
            }
        };

        // Шаг 6 — заголовок в журнале.
        if let Err(e) = self
            .ticket_journal
            .insert_reservation(
                reservation_id,
                user_id,
                event_id,
                ReservationStatus::Pending,
                Some(&session.session_id),
                total_price,
            )
            .await
        {
            self.rollback_hold(user_id, reservation_id, event_id, &claimed).await;
            return Err(e.into());
        }

        // Шаг 7 — публикация PENDING, одной пачкой если мест больше одного.
        self.emit_status(event_id, &claimed, SeatStatus::Pending).await;

        Ok(reservation_id)
    }

    /// §4.D Cancel.
    pub async fn cancel(&self, reservation_id: Uuid) -> Result<(), CoordinatorError> {
        let header = self
            .ticket_journal
            .get_reservation(reservation_id)
            .await?
            .ok_or(CoordinatorError::NotFound)?;

        let time_left = self.hold_store.get_time_left(&header.user_id, &reservation_id.to_string()).await?;
        if time_left <= 0 {
            return Err(CoordinatorError::NotFound);
        }
        if time_left < self.safety_buffer_seconds {
            return Err(CoordinatorError::TooLate);
        }

        let seats = self.hold_store.get_seats(&reservation_id.to_string()).await?;

        self.hold_store.drop_hold(&header.user_id, &reservation_id.to_string()).await?;
        self.ticket_journal.delete_reservation(reservation_id).await?;

        for seat in &seats {
            if let Err(e) = self.seat_index.release(&header.event_id, *seat).await {
                warn!(error = %e, reservation_id = %reservation_id, "failed to release seat index entry during cancel");
            }
        }
        self.emit_status(&header.event_id, &seats, SeatStatus::Available).await;

        Ok(())
    }

    /// §4.D Confirm, invoked by the payment webhook adapter once the provider reports the
    /// checkout session complete.
    pub async fn confirm(&self, reservation_id: Uuid) -> Result<(), CoordinatorError> {
        let header = self
            .ticket_journal
            .get_reservation(reservation_id)
            .await?
            .ok_or(CoordinatorError::NotFound)?;

        match header.status {
            ReservationStatus::Confirmed => return Ok(()),
            ReservationStatus::Cancelled => return Err(CoordinatorError::BadState),
            ReservationStatus::Pending => {}
        }

        let time_left = self.hold_store.get_time_left(&header.user_id, &reservation_id.to_string()).await?;
        if time_left <= 0 {
            return Err(CoordinatorError::Expired);
        }

        let seats = self.hold_store.get_seats(&reservation_id.to_string()).await?;

        match self.ticket_journal.confirm_seats(reservation_id, &header.event_id, &seats).await {
            Ok(_tickets) => {}
            Err(e) => {
                let coordinator_err: CoordinatorError = e.into();
                if matches!(coordinator_err, CoordinatorError::SeatTaken) {
                    // Confirmation-rollback: release our temp claims and drop the hold, but
                    // leave the PENDING header alone — the Expiry Watcher's temp-key
                    // subscription will cancel it once the hold's TTL actually runs out.
                    for seat in &seats {
                        if let Err(e) = self.seat_index.release(&header.event_id, *seat).await {
                            warn!(error = %e, reservation_id = %reservation_id, "failed to release seat index entry after confirm conflict");
                        }
                    }
                    self.hold_store.drop_hold(&header.user_id, &reservation_id.to_string()).await.ok();
                }
                return Err(coordinator_err);
            }
        }

        for seat in &seats {
            if let Err(e) = self
                .seat_index
                .promote_to_permanent(&header.event_id, *seat, &reservation_id.to_string())
                .await
            {
                warn!(error = %e, reservation_id = %reservation_id, "failed to promote seat index entry to permanent");
            }
        }
        self.emit_status(&header.event_id, &seats, SeatStatus::Reserved).await;

        self.ticket_journal.update_status(reservation_id, ReservationStatus::Confirmed).await?;
        self.hold_store.drop_hold(&header.user_id, &reservation_id.to_string()).await.ok();

        Ok(())
    }

    /// §4.D Get.
    pub async fn get(&self, reservation_id: Uuid) -> Result<ReservationView, CoordinatorError> {
        let header = self
            .ticket_journal
            .get_reservation(reservation_id)
            .await?
            .ok_or(CoordinatorError::NotFound)?;
        self.to_view(header).await
    }

    /// §4.D List.
    pub async fn list(&self, user_id: &str) -> Result<Vec<ReservationView>, CoordinatorError> {
        let headers = self.ticket_journal.list_by_user(user_id).await?;
        let mut views = Vec::with_capacity(headers.len());
        for header in headers {
            views.push(self.to_view(header).await?);
        }
        Ok(views)
    }

    pub async fn find_by_payment_session(&self, session_id: &str) -> Result<Option<ReservationHeader>, CoordinatorError> {
        Ok(self.ticket_journal.get_reservation_by_payment_session(session_id).await?)
    }

    async fn to_view(&self, header: ReservationHeader) -> Result<ReservationView, CoordinatorError> {
        let (seats, time_left_seconds) = match header.status {
            ReservationStatus::Pending => {
                let seats = self.hold_store.get_seats(&header.id.to_string()).await.unwrap_or_default();
                let raw = self
                    .hold_store
                    .get_time_left(&header.user_id, &header.id.to_string())
                    .await
                    .unwrap_or(0);
                let hold_max_seconds = self.hold_ttl_seconds - self.safety_buffer_seconds;
                let time_left = (raw - self.safety_buffer_seconds).min(hold_max_seconds).max(0);
                (seats, time_left)
            }
            ReservationStatus::Confirmed => {
                let tickets = self.ticket_journal.list_tickets_by_reservation(header.id).await?;
                (tickets.iter().map(|t| t.seat()).collect(), 0)
            }
            ReservationStatus::Cancelled => (Vec::new(), 0),
        };

        Ok(ReservationView {
            reservation_id: header.id,
            user_id: header.user_id,
            event_id: header.event_id,
            status: header.status,
            total_price: header.total_price,
            seats,
            payment_client_secret: header.stripe_session_id,
            time_left_seconds,
        })
    }

    /// Откатывает CreateHold: освобождает захваченные места в Seat Index и снимает холд.
    /// Никогда не публикует RESERVED в откате — только AVAILABLE для успешно захваченных мест.
    async fn rollback_hold(&self, user_id: &str, reservation_id: Uuid, event_id: &str, claimed: &[SeatCoordinate]) {
        for seat in claimed {
            if let Err(e) = self.seat_index.release(event_id, *seat).await {
                warn!(error = %e, reservation_id = %reservation_id, "failed to release seat during rollback");
            }
        }
        if let Err(e) = self.hold_store.drop_hold(user_id, &reservation_id.to_string()).await {
            warn!(error = %e, reservation_id = %reservation_id, "failed to drop hold during rollback");
        }
        if !claimed.is_empty() {
            self.emit_status(event_id, claimed, SeatStatus::Available).await;
        }
    }

    /// Одно сообщение на операцию: пачка, если мест больше одного, иначе одиночное
    /// сообщение — так мы избегаем обёртки `{"type":"batch"}` вокруг единственного места.
    async fn emit_status(&self, event_id: &str, seats: &[SeatCoordinate], status: SeatStatus) {
        if seats.is_empty() {
            return;
        }
        let now = chrono::Utc::now().timestamp_millis();
        let message = if seats.len() == 1 {
            BusMessage::Single(SeatUpdate::new(event_id, seats[0], status, now))
        } else {
            let updates = seats.iter().map(|s| SeatUpdate::new(event_id, *s, status, now)).collect();
            BusMessage::Batch(SeatUpdateBatch::new(updates))
        };
        if let Err(e) = self.bus.publish(&message).await {
            warn!(error = %e, event_id = %event_id, "failed to publish seat status update");
        }
    }
}

/// Чисто функциональная проверка входа CreateHold, вынесенная отдельно ради юнит-тестов
/// без живого Redis/Postgres за спиной.
fn validate_create_hold(
    user_id: &str,
    event_id: &str,
    seats: &[SeatCoordinate],
    total_price: Decimal,
) -> Result<(), CoordinatorError> {
    if user_id.trim().is_empty() {
        return Err(CoordinatorError::Validation("userId must not be empty".to_string()));
    }
    if event_id.trim().is_empty() {
        return Err(CoordinatorError::Validation("eventId must not be empty".to_string()));
    }
    if seats.is_empty() {
        return Err(CoordinatorError::Validation("seats must contain at least one seat".to_string()));
    }
    for seat in seats {
        if seat.zone_number <= 0 || seat.row <= 0 || seat.column <= 0 {
            return Err(CoordinatorError::Validation(format!(
                "seat coordinate must have positive components, got {:?}",
                seat
            )));
        }
    }
    let mut sorted = seats.to_vec();
    sorted.sort_by_key(|s| (s.zone_number, s.row, s.column));
    sorted.dedup();
    if sorted.len() != seats.len() {
        return Err(CoordinatorError::Validation("seats must not contain duplicates".to_string()));
    }
    if total_price < Decimal::ZERO {
        return Err(CoordinatorError::Validation("totalPrice must not be negative".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(z: i32, r: i32, c: i32) -> SeatCoordinate {
        SeatCoordinate::new(z, r, c)
    }

    #[test]
    fn rejects_empty_user_id() {
        let err = validate_create_hold("", "E1", &[seat(1, 1, 1)], Decimal::ZERO).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[test]
    fn rejects_empty_seat_list() {
        let err = validate_create_hold("u1", "E1", &[], Decimal::ZERO).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[test]
    fn rejects_non_positive_seat_coordinates() {
        let err = validate_create_hold("u1", "E1", &[seat(0, 1, 1)], Decimal::ZERO).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[test]
    fn rejects_duplicate_seats() {
        let err = validate_create_hold("u1", "E1", &[seat(1, 1, 1), seat(1, 1, 1)], Decimal::ZERO).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[test]
    fn rejects_negative_price() {
        let err = validate_create_hold("u1", "E1", &[seat(1, 1, 1)], Decimal::from(-1)).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[test]
    fn accepts_well_formed_input() {
        assert!(validate_create_hold("u1", "E1", &[seat(1, 1, 1), seat(1, 1, 2)], Decimal::from(500)).is_ok());
    }
}
