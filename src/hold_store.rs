//! Hold Store — какие места держит резервация, и сколько ей осталось. Liveness-ключ
//! скопирован по пользователю (`reservation:temp:{userId}:{reservationId}`), чтобы список
//! активных холдов пользователя был дешёвым запросом; список мест — по резервации
//! (`reservation:seats:{reservationId}`).

use futures::Stream;
use redis::AsyncCommands;

use crate::error::HoldStoreError;
use crate::models::SeatCoordinate;
use crate::redis_client::RedisClient;

fn temp_key(user_id: &str, reservation_id: &str) -> String {
    format!("reservation:temp:{}:{}", user_id, reservation_id)
}

fn seats_key(reservation_id: &str) -> String {
    format!("reservation:seats:{}", reservation_id)
}

/// Разбирает `reservation:temp:{userId}:{reservationId}` обратно в пару идентификаторов.
/// Любой другой namespace (в частности `reservation:seats:*`) отбрасывается.
fn parse_temp_key(key: &str) -> Option<(String, String)> {
    let mut parts = key.splitn(4, ':');
    if parts.next()? != "reservation" || parts.next()? != "temp" {
        return None;
    }
    let user_id = parts.next()?.to_string();
    let reservation_id = parts.next()?.to_string();
    Some((user_id, reservation_id))
}

#[derive(Clone)]
pub struct HoldStore {
    redis: RedisClient,
}

impl HoldStore {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    pub async fn put_hold(
        &self,
        reservation_id: &str,
        user_id: &str,
        seats: &[SeatCoordinate],
        ttl_seconds: i64,
    ) -> Result<(), HoldStoreError> {
        let mut conn = self.redis.conn.clone();
        let seats_json = serde_json::to_string(seats).expect("SeatCoordinate always serializes");

        let _: () = redis::pipe()
            .atomic()
            .set_ex(temp_key(user_id, reservation_id), "1", ttl_seconds as u64)
            .set_ex(seats_key(reservation_id), seats_json, ttl_seconds as u64)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Возвращает остаток TTL в секундах. ≤ 0 означает "уже истёк или никогда не
    /// существовал" — вызывающая сторона не должна их различать.
    pub async fn get_time_left(&self, user_id: &str, reservation_id: &str) -> Result<i64, HoldStoreError> {
        let mut conn = self.redis.conn.clone();
        // TTL returns -2 if the key is gone, -1 if it has no expiry (shouldn't happen here
        // since put_hold always sets one) — both already satisfy "≤ 0 means expired/missing".
        let ttl: i64 = conn.ttl(temp_key(user_id, reservation_id)).await?;
        Ok(ttl)
    }

    pub async fn get_seats(&self, reservation_id: &str) -> Result<Vec<SeatCoordinate>, HoldStoreError> {
        let mut conn = self.redis.conn.clone();
        let data: Option<String> = conn.get(seats_key(reservation_id)).await?;
        let data = data.ok_or(HoldStoreError::NotFound)?;
        serde_json::from_str(&data).map_err(|_| HoldStoreError::NotFound)
    }

    pub async fn drop_hold(&self, user_id: &str, reservation_id: &str) -> Result<(), HoldStoreError> {
        let mut conn = self.redis.conn.clone();
        let _: () = conn
            .del((temp_key(user_id, reservation_id), seats_key(reservation_id)))
            .await?;
        Ok(())
    }

    /// Поток истёкших liveness-ключей — по одному `(userId, reservationId)` за раз.
    /// Это второй psubscribe Expiry Watcher'а: seat-ключи говорят ему, что вещать на шину,
    /// этот — какую запись журнала перевести из PENDING в CANCELLED.
    pub async fn subscribe_temp_expiries(
        &self,
    ) -> Result<impl Stream<Item = (String, String)>, HoldStoreError> {
        use futures::StreamExt;

        let mut pubsub = self.redis.new_pubsub_connection().await?;
        pubsub.psubscribe("__keyevent@*__:expired").await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let key: String = msg.get_payload().ok()?;
            parse_temp_key(&key)
        });

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats_match_wire_contract() {
        assert_eq!(temp_key("u1", "r1"), "reservation:temp:u1:r1");
        assert_eq!(seats_key("r1"), "reservation:seats:r1");
    }

    #[test]
    fn parse_temp_key_roundtrips() {
        assert_eq!(
            parse_temp_key("reservation:temp:u1:r1"),
            Some(("u1".to_string(), "r1".to_string()))
        );
    }

    #[test]
    fn parse_temp_key_rejects_seats_namespace() {
        assert!(parse_temp_key("reservation:seats:r1").is_none());
    }
}
