//! Seat Index — быстрый ответ на вопрос "занято ли место прямо сейчас". Источник истины
//! для AVAILABLE/PENDING; RESERVED он тоже видит (постоянная запись без TTL), но
//! окончательным арбитром остаётся Ticket Journal (см. confirmSeats).
//!
//! Ключ на проводе: `seat:{eventId}:{zoneNumber}:{row}:{column}` — десятичный,
//! через двоеточие, без выравнивания нулями.

use futures::Stream;
use redis::AsyncCommands;
use tracing::warn;

use crate::error::SeatIndexError;
use crate::models::SeatCoordinate;
use crate::redis_client::RedisClient;

pub fn seat_key(event_id: &str, seat: SeatCoordinate) -> String {
    format!("seat:{}:{}:{}:{}", event_id, seat.zone_number, seat.row, seat.column)
}

#[derive(Clone)]
pub struct SeatIndex {
    redis: RedisClient,
}

impl SeatIndex {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    pub async fn is_available(&self, event_id: &str, seat: SeatCoordinate) -> Result<bool, SeatIndexError> {
        let mut conn = self.redis.conn.clone();
        let exists: bool = conn.exists(seat_key(event_id, seat)).await?;
        Ok(!exists)
    }

    /// Выставляет временную запись с TTL. Это слепая перезапись — побеждает последний
    /// писатель; окончательная проверка конфликта — на confirmSeats в Ticket Journal.
    pub async fn claim_temporary(
        &self,
        event_id: &str,
        seat: SeatCoordinate,
        reservation_id: &str,
        ttl_seconds: i64,
    ) -> Result<(), SeatIndexError> {
        let mut conn = self.redis.conn.clone();
        let _: () = conn
            .set_ex(seat_key(event_id, seat), reservation_id, ttl_seconds as u64)
            .await?;
        Ok(())
    }

    /// Перезаписывает запись без TTL — место переходит в постоянный RESERVED.
    pub async fn promote_to_permanent(
        &self,
        event_id: &str,
        seat: SeatCoordinate,
        reservation_id: &str,
    ) -> Result<(), SeatIndexError> {
        let mut conn = self.redis.conn.clone();
        let _: () = conn.set(seat_key(event_id, seat), reservation_id).await?;
        Ok(())
    }

    pub async fn release(&self, event_id: &str, seat: SeatCoordinate) -> Result<(), SeatIndexError> {
        let mut conn = self.redis.conn.clone();
        let _: () = conn.del(seat_key(event_id, seat)).await?;
        Ok(())
    }

    /// Бесконечный поток истёкших ключей — по одному seat-координату за раз. Опирается на
    /// keyspace-уведомления Redis (`notify-keyspace-events Ex`), которые должны быть
    /// включены на сервере; `ensure_keyspace_notifications` делает это при старте.
    pub async fn subscribe_expiries(
        &self,
    ) -> Result<impl Stream<Item = (String, SeatCoordinate)>, SeatIndexError> {
        use futures::StreamExt;

        let mut pubsub = self.redis.new_pubsub_connection().await?;
        pubsub.psubscribe("__keyevent@*__:expired").await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let key: String = msg.get_payload().ok()?;
            parse_seat_key(&key)
        });

        Ok(stream)
    }

    /// Включает уведомления об истечении ключей на сервере Redis, если они ещё не включены.
    /// Сервера без этой опции по умолчанию молчат об expiry — без неё Expiry Watcher никогда
    /// бы не получил ни одного события.
    pub async fn ensure_keyspace_notifications(&self) -> Result<(), SeatIndexError> {
        let mut conn = self.redis.conn.clone();
        let current: String = redis::cmd("CONFIG")
            .arg("GET")
            .arg("notify-keyspace-events")
            .query_async::<Vec<String>>(&mut conn)
            .await?
            .into_iter()
            .nth(1)
            .unwrap_or_default();

        if !current.contains('E') || !(current.contains('x') || current.contains('A')) {
            let desired = if current.is_empty() {
                "Ex".to_string()
            } else {
                format!("{}Ex", current)
            };
            if let Err(e) = redis::cmd("CONFIG")
                .arg("SET")
                .arg("notify-keyspace-events")
                .arg(desired)
                .query_async::<()>(&mut conn)
                .await
            {
                warn!(error = %e, "could not set notify-keyspace-events, expiry watcher will see no events");
            }
        }
        Ok(())
    }
}

fn parse_seat_key(key: &str) -> Option<(String, SeatCoordinate)> {
    let mut parts = key.splitn(5, ':');
    if parts.next()? != "seat" {
        return None;
    }
    let event_id = parts.next()?.to_string();
    let zone_number: i32 = parts.next()?.parse().ok()?;
    let row: i32 = parts.next()?.parse().ok()?;
    let column: i32 = parts.next()?.parse().ok()?;
    Some((event_id, SeatCoordinate::new(zone_number, row, column)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_key_is_canonical() {
        let seat = SeatCoordinate::new(1, 5, 10);
        assert_eq!(seat_key("E1", seat), "seat:E1:1:5:10");
    }

    #[test]
    fn parse_seat_key_roundtrips() {
        let (event_id, seat) = parse_seat_key("seat:E1:1:5:10").unwrap();
        assert_eq!(event_id, "E1");
        assert_eq!(seat, SeatCoordinate::new(1, 5, 10));
    }

    #[test]
    fn parse_seat_key_rejects_other_namespaces() {
        assert!(parse_seat_key("reservation:temp:u:r").is_none());
    }
}
