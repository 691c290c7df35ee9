//! Seat-Event Bus — лёгкий pub/sub поверх одного канала `seats:all`. At-most-once,
//! без персистентности и без повтора: медленные подписчики просто теряют сообщения
//! (их подстраховывает Realtime Gateway на уровне клиентских буферов, не шина).

use futures::{Stream, StreamExt};
use redis::AsyncCommands;

use crate::error::SeatIndexError;
use crate::models::BusMessage;
use crate::redis_client::RedisClient;

pub const CHANNEL: &str = "seats:all";

#[derive(Clone)]
pub struct SeatEventBus {
    redis: RedisClient,
}

impl SeatEventBus {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    pub async fn publish(&self, message: &BusMessage) -> Result<(), SeatIndexError> {
        let payload = serde_json::to_string(message).expect("BusMessage always serializes");
        let mut conn = self.redis.conn.clone();
        let _: () = conn.publish(CHANNEL, payload).await?;
        Ok(())
    }

    /// Один процесс-wide подписчик; дальше события раздаются через in-process
    /// `eventUsers`-карту гейтвея, а не по одной подписке на соединение.
    pub async fn subscribe(&self) -> Result<impl Stream<Item = BusMessage>, SeatIndexError> {
        let mut pubsub = self.redis.new_pubsub_connection().await?;
        pubsub.subscribe(CHANNEL).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str::<BusMessage>(&payload).ok()
        });

        Ok(stream)
    }
}
