//! mod.rs
//!
//! Корневой модуль маршрутизации API.

pub mod reservations;
pub mod webhook;

use axum::Router;
use std::sync::Arc;

use crate::AppState;

/// Собирает весь HTTP-поверхность ядра в один роутер: резервации под `/api`, вебхук и
/// realtime-эндпоинты на корне — так, как их видели отдельные сервисы до объединения в один
/// процесс.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api", reservations::routes())
        .merge(webhook::routes())
        .merge(crate::realtime::routes())
}
