//! Ticket Journal — единственное действительно durable хранилище. Seat Index эфемерен и
//! может быть вытерт целиком; уникальное ограничение `(event_id, zone_number, row_number,
//! col_number)` здесь — окончательный страж инварианта "место не продано дважды".

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::TicketJournalError;
use crate::models::{ReservationHeader, ReservationStatus, SeatCoordinate, TicketRow};

#[derive(Clone)]
pub struct TicketJournal {
    pool: PgPool,
}

impl TicketJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_reservation(
        &self,
        reservation_id: Uuid,
        user_id: &str,
        event_id: &str,
        status: ReservationStatus,
        stripe_session_id: Option<&str>,
        total_price: Decimal,
    ) -> Result<ReservationHeader, TicketJournalError> {
        let row = sqlx::query_as::<_, ReservationHeader>(
            r#"
            INSERT INTO reservations (id, user_id, event_id, status, stripe_session_id, total_price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING id, user_id, event_id, status, stripe_session_id, total_price, created_at, updated_at
            "#,
        )
        .bind(reservation_id)
        .bind(user_id)
        .bind(event_id)
        .bind(status)
        .bind(stripe_session_id)
        .bind(total_price)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn update_status(
        &self,
        reservation_id: Uuid,
        new_status: ReservationStatus,
    ) -> Result<ReservationHeader, TicketJournalError> {
        let row = sqlx::query_as::<_, ReservationHeader>(
            r#"
            UPDATE reservations SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, user_id, event_id, status, stripe_session_id, total_price, created_at, updated_at
            "#,
        )
        .bind(reservation_id)
        .bind(new_status)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Переводит заголовок из PENDING в CANCELLED, если он всё ещё PENDING — условие в
    /// WHERE, а не отдельное чтение-потом-запись, чтобы не затереть CONFIRMED, если Confirm
    /// успел выполниться в гонке с этим истечением TTL. Возвращает, сработал ли переход.
    pub async fn cancel_if_pending(&self, reservation_id: Uuid) -> Result<bool, TicketJournalError> {
        let result = sqlx::query(
            "UPDATE reservations SET status = 'CANCELLED', updated_at = NOW()
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(reservation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_reservation(&self, reservation_id: Uuid) -> Result<(), TicketJournalError> {
        sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(reservation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<ReservationHeader>, TicketJournalError> {
        let row = sqlx::query_as::<_, ReservationHeader>(
            "SELECT id, user_id, event_id, status, stripe_session_id, total_price, created_at, updated_at
             FROM reservations WHERE id = $1",
        )
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_reservation_by_payment_session(
        &self,
        session_id: &str,
    ) -> Result<Option<ReservationHeader>, TicketJournalError> {
        let row = sqlx::query_as::<_, ReservationHeader>(
            "SELECT id, user_id, event_id, status, stripe_session_id, total_price, created_at, updated_at
             FROM reservations WHERE stripe_session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<ReservationHeader>, TicketJournalError> {
        let rows = sqlx::query_as::<_, ReservationHeader>(
            "SELECT id, user_id, event_id, status, stripe_session_id, total_price, created_at, updated_at
             FROM reservations WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Единственная операция, которой требуется настоящая транзакция: пере-проверка мест и
    /// вставка билетов должны либо пройти все разом, либо не произойти вовсе. Конфликт
    /// различается от инфраструктурной ошибки по коду уникального нарушения Postgres (23505).
    pub async fn confirm_seats(
        &self,
        reservation_id: Uuid,
        event_id: &str,
        seats: &[SeatCoordinate],
    ) -> Result<Vec<TicketRow>, TicketJournalError> {
        let mut tx = self.pool.begin().await?;
        let mut tickets = Vec::with_capacity(seats.len());

        for seat in seats {
            let existing: Option<(Uuid,)> = sqlx::query_as(
                "SELECT id FROM tickets WHERE event_id = $1 AND zone_number = $2 AND row_number = $3 AND col_number = $4",
            )
            .bind(event_id)
            .bind(seat.zone_number)
            .bind(seat.row)
            .bind(seat.column)
            .fetch_optional(&mut *tx)
            .await?;

            if existing.is_some() {
                tx.rollback().await.ok();
                return Err(TicketJournalError::Conflict);
            }

            let ticket = sqlx::query_as::<_, TicketRow>(
                r#"
                INSERT INTO tickets (id, reservation_id, event_id, zone_number, row_number, col_number, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, NOW())
                RETURNING id, reservation_id, event_id, zone_number, row_number, col_number, created_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(reservation_id)
            .bind(event_id)
            .bind(seat.zone_number)
            .bind(seat.row)
            .bind(seat.column)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    TicketJournalError::Conflict
                } else {
                    TicketJournalError::Database(e)
                }
            })?;

            tickets.push(ticket);
        }

        tx.commit().await?;
        Ok(tickets)
    }

    pub async fn list_tickets_by_event(&self, event_id: &str) -> Result<Vec<TicketRow>, TicketJournalError> {
        let rows = sqlx::query_as::<_, TicketRow>(
            "SELECT id, reservation_id, event_id, zone_number, row_number, col_number, created_at
             FROM tickets WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_tickets_by_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Vec<TicketRow>, TicketJournalError> {
        let rows = sqlx::query_as::<_, TicketRow>(
            "SELECT id, reservation_id, event_id, zone_number, row_number, col_number, created_at
             FROM tickets WHERE reservation_id = $1",
        )
        .bind(reservation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
