use axum::{routing::get, Router};
use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use seatcore::{
    bus::SeatEventBus,
    config::Config,
    controllers,
    coordinator::Coordinator,
    database::Database,
    expiry_watcher::ExpiryWatcher,
    hold_store::HoldStore,
    realtime::{replay::ReplayCache, RealtimeGateway},
    redis_client::RedisClient,
    seat_index::SeatIndex,
    services::payment::PaymentGatewayClient,
    ticket_journal::TicketJournal,
    AppState,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting seat-reservation core");

    let db = Database::new(&config.database.url, config.database.pool_size)
        .await
        .expect("Failed to connect to database");
    info!("Database connected");

    db.run_migrations().await.expect("Failed to run migrations");

    let redis = RedisClient::new(&config.redis.url)
        .await
        .expect("Failed to connect to Redis");
    info!("Redis connected");

    let seat_index = SeatIndex::new(redis.clone());
    seat_index
        .ensure_keyspace_notifications()
        .await
        .expect("Failed to ensure Redis keyspace notifications are enabled");

    let hold_store = HoldStore::new(redis.clone());
    let ticket_journal = TicketJournal::new(db.pool.clone());
    let bus = SeatEventBus::new(redis.clone());
    let payment = PaymentGatewayClient::from_config(&config.payment);

    let coordinator = Coordinator::new(
        seat_index.clone(),
        hold_store.clone(),
        ticket_journal.clone(),
        bus.clone(),
        payment.clone(),
        config.reservation.hold_ttl_seconds(),
        config.reservation.safety_buffer_seconds,
    );

    let replay = ReplayCache::new(redis.clone(), config.realtime.event_ttl_seconds);
    let realtime = Arc::new(RealtimeGateway::new(
        Duration::from_millis(config.realtime.per_client_send_timeout_ms),
        config.realtime.per_client_buffer,
        replay,
    ));

    let app_state = Arc::new(AppState {
        db: db.clone(),
        redis: redis.clone(),
        config: config.clone(),
        coordinator,
        payment,
        realtime: realtime.clone(),
    });

    // Single-process фоновые задачи: Expiry Watcher закрывает истёкшие холды и места,
    // а Realtime Gateway держит ровно одну подписку на шину для всех подключённых клиентов.
    let watcher = ExpiryWatcher::new(
        seat_index,
        hold_store,
        ticket_journal.clone(),
        bus.clone(),
        Duration::from_millis(config.reservation.batch_coalesce_window_ms),
    );
    tokio::spawn(watcher.run());
    tokio::spawn(realtime.run_bus_consumer(bus));

    let app = Router::new()
        .route("/", get(|| async { "seatcore" }))
        .route("/health", get(|| async { "OK" }))
        .merge(controllers::routes())
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http());

    let public_addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    let internal_addr = SocketAddr::from(([0, 0, 0, 0], config.app.internal_port));

    let public_listener = tokio::net::TcpListener::bind(public_addr)
        .await
        .expect("Failed to bind public listener");
    let internal_listener = tokio::net::TcpListener::bind(internal_addr)
        .await
        .expect("Failed to bind internal listener");

    info!("Public listener on {}", public_addr);
    info!("Internal listener on {}", internal_addr);

    let public_app = app.clone();
    let internal_app = app;

    tokio::select! {
        result = axum::serve(public_listener, public_app.into_make_service()) => {
            result.expect("public listener exited");
        }
        result = axum::serve(internal_listener, internal_app.into_make_service()) => {
            result.expect("internal listener exited");
        }
    }
}
