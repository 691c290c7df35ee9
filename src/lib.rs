pub mod bus;
pub mod config;
pub mod controllers;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod expiry_watcher;
pub mod hold_store;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod redis_client;
pub mod seat_index;
pub mod services;
pub mod ticket_journal;

use std::sync::Arc;

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub config: config::Config,
    pub coordinator: coordinator::Coordinator,
    pub payment: services::payment::PaymentGatewayClient,
    pub realtime: Arc<realtime::RealtimeGateway>,
}
