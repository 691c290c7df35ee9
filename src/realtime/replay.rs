//! replay.rs
//!
//! Reconnect replay cache. A client that reconnects with `state=reconnect` has missed
//! whatever was pushed to it while it was offline; this Redis-backed cache lets the gateway
//! replay those events once before resuming live delivery. Direct port of `domain.go`'s
//! `SetEvent`/`AddUserEvent`/`GetUserEvents` pair: one key per event body, one list per user
//! of event ids pending acknowledgement.

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::error::SeatIndexError;
use crate::redis_client::RedisClient;

/// Caps how many pending event ids we keep per user — an inattentive client should not be
/// able to grow this list without bound.
const MAX_PENDING_PER_USER: isize = 500;

fn event_key(event_id: &str) -> String {
    format!("event:{}", event_id)
}

fn user_events_key(user_id: &str) -> String {
    format!("user:events:{}", user_id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEvent {
    pub id: String,
    pub event_type: String,
    pub data: String,
}

#[derive(Clone)]
pub struct ReplayCache {
    redis: RedisClient,
    ttl_seconds: i64,
}

impl ReplayCache {
    pub fn new(redis: RedisClient, ttl_seconds: i64) -> Self {
        Self { redis, ttl_seconds }
    }

    /// Records a pushed event as pending acknowledgement for `user_id`.
    pub async fn record(&self, user_id: &str, event: &CachedEvent) -> Result<(), SeatIndexError> {
        let mut conn = self.redis.conn.clone();
        let payload = serde_json::to_string(event).expect("CachedEvent always serializes");

        let _: () = redis::pipe()
            .atomic()
            .set_ex(event_key(&event.id), payload, self.ttl_seconds as u64)
            .lpush(user_events_key(user_id), &event.id)
            .ltrim(user_events_key(user_id), 0, MAX_PENDING_PER_USER - 1)
            .expire(user_events_key(user_id), self.ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Returns every still-cached event pending for `user_id`, oldest first.
    pub async fn pending_for_user(&self, user_id: &str) -> Result<Vec<CachedEvent>, SeatIndexError> {
        let mut conn = self.redis.conn.clone();
        let ids: Vec<String> = conn.lrange(user_events_key(user_id), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| event_key(id)).collect();
        let values: Vec<Option<String>> = conn.get(keys).await?;

        let mut events: Vec<CachedEvent> = values
            .into_iter()
            .flatten()
            .filter_map(|raw| serde_json::from_str(&raw).ok())
            .collect();
        events.reverse();
        Ok(events)
    }

    /// Acknowledges delivery of `event_id` for `user_id`, removing it from both the event
    /// body store and the user's pending list.
    pub async fn ack(&self, user_id: &str, event_id: &str) -> Result<(), SeatIndexError> {
        let mut conn = self.redis.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(event_key(event_id))
            .lrem(user_events_key(user_id), 0, event_id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
