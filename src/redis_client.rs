use redis::aio::MultiplexedConnection;
use redis::Client;

/// Обёртка над мультиплексированным соединением Redis. `client` остаётся рядом, потому
/// что Seat-Event Bus и Expiry Watcher открывают собственные выделенные pubsub-соединения —
/// мультиплексированное соединение не годится для SUBSCRIBE.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: MultiplexedConnection,
    pub client: Client,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self { conn, client })
    }

    /// Открывает новое выделенное асинхронное соединение — для SUBSCRIBE/PSUBSCRIBE,
    /// которые не могут разделять мультиплексированное соединение с обычными командами.
    pub async fn new_pubsub_connection(&self) -> redis::RedisResult<redis::aio::PubSub> {
        self.client.get_async_pubsub().await
    }
}
