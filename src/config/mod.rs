use serde::Deserialize;
use std::env;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub reservation: ReservationConfig,
    pub realtime: RealtimeConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Второй слушатель того же роутера — отражает прежнее разделение на публичный и
    /// внутренний сервисы (push-message/ack дергались только изнутри кластера).
    pub internal_port: u16,
    pub environment: String,
    pub rust_log: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Параметры, которыми спецификация управляет состоянием резервации (§6 Configuration).
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationConfig {
    /// HoldMax — максимальная длительность удержания места, секунды.
    pub hold_max_seconds: i64,
    /// SafetyBuffer — последние секунды удержания, когда Cancel отказывает.
    pub safety_buffer_seconds: i64,
    /// BatchCoalesceWindow — окно склейки Expiry Watcher, миллисекунды.
    pub batch_coalesce_window_ms: u64,
}

impl ReservationConfig {
    pub fn hold_ttl_seconds(&self) -> i64 {
        self.hold_max_seconds + self.safety_buffer_seconds
    }
}

/// Параметры Realtime Gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// PerClientBuffer — глубина канала на клиента.
    pub per_client_buffer: usize,
    /// PerClientSendTimeout — таймаут отправки клиенту, миллисекунды.
    pub per_client_send_timeout_ms: u64,
    /// SSEKeepAliveInterval — период PING, секунды.
    pub sse_keepalive_interval_seconds: u64,
    /// EventTTL — сколько держим событие в кеше повторной отправки, секунды.
    pub event_ttl_seconds: i64,
}

/// Настройки внешнего платёжного провайдера и вебхука.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub gateway_url: String,
    pub merchant_id: String,
    pub merchant_password: String,
    pub webhook_signing_secret: String,
    /// WebhookMaxBody — максимальный размер тела вебхука, байты.
    pub webhook_max_body_bytes: usize,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                internal_port: env::var("INTERNAL_PORT")
                    .unwrap_or_else(|_| "8001".to_string())
                    .parse()
                    .expect("INTERNAL_PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "seatcore=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
            },
            reservation: ReservationConfig {
                hold_max_seconds: env::var("HOLD_MAX_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .expect("HOLD_MAX_SECONDS must be a valid number"),
                safety_buffer_seconds: env::var("SAFETY_BUFFER_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .expect("SAFETY_BUFFER_SECONDS must be a valid number"),
                batch_coalesce_window_ms: env::var("BATCH_COALESCE_WINDOW_MS")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .expect("BATCH_COALESCE_WINDOW_MS must be a valid number"),
            },
            realtime: RealtimeConfig {
                per_client_buffer: env::var("PER_CLIENT_BUFFER")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .expect("PER_CLIENT_BUFFER must be a valid number"),
                per_client_send_timeout_ms: env::var("PER_CLIENT_SEND_TIMEOUT_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .expect("PER_CLIENT_SEND_TIMEOUT_MS must be a valid number"),
                sse_keepalive_interval_seconds: env::var("SSE_KEEPALIVE_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("SSE_KEEPALIVE_INTERVAL_SECONDS must be a valid number"),
                event_ttl_seconds: env::var("EVENT_TTL_SECONDS")
                    .unwrap_or_else(|_| "180".to_string())
                    .parse()
                    .expect("EVENT_TTL_SECONDS must be a valid number"),
            },
            payment: PaymentConfig {
                gateway_url: env::var("PAYMENT_GATEWAY_URL")
                    .unwrap_or_else(|_| "https://payment-provider.api/v1".to_string()),
                merchant_id: env::var("PAYMENT_MERCHANT_ID").unwrap_or_else(|_| "".to_string()),
                merchant_password: env::var("PAYMENT_MERCHANT_PASSWORD")
                    .unwrap_or_else(|_| "".to_string()),
                webhook_signing_secret: env::var("PAYMENT_WEBHOOK_SECRET")
                    .unwrap_or_else(|_| "".to_string()),
                webhook_max_body_bytes: env::var("WEBHOOK_MAX_BODY_BYTES")
                    .unwrap_or_else(|_| "65536".to_string())
                    .parse()
                    .expect("WEBHOOK_MAX_BODY_BYTES must be a valid number"),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_FAILURE_THRESHOLD must be a valid number"),
                timeout_seconds: env::var("CIRCUIT_BREAKER_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_TIMEOUT_SECONDS must be a valid number"),
            },
        }
    }
}
