//! mod.rs
//!
//! Realtime Gateway (§4.G): accepts SSE connections, tracks which users watch which events
//! in an in-process `eventUsers` map, and forwards Seat-Event Bus traffic to exactly the
//! right connections through the single-writer hub. One process-wide bus consumer feeds all
//! connections — N clients, one subscription, the redesign called for in §9.

pub mod hub;
pub mod replay;

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::SeatEventBus;
use crate::models::BusMessage;
use crate::AppState;

use hub::{ClientId, Hub, OutboundEvent};
use replay::{CachedEvent, ReplayCache};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/realtime", get(realtime_stream))
        .route("/push-message", post(push_message))
        .route("/ack", post(ack))
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
}

/// Nil UUID marks a broadcast-to-everyone push, mirroring the original's `userId == nil UUID`
/// convention so one message shape serves both single-user and fan-out delivery.
const NIL_USER_ID: Uuid = Uuid::nil();

pub struct RealtimeGateway {
    hub: Hub,
    event_users: RwLock<HashMap<String, HashSet<String>>>,
    replay: ReplayCache,
    per_client_buffer: usize,
}

impl RealtimeGateway {
    pub fn new(send_timeout: Duration, per_client_buffer: usize, replay: ReplayCache) -> Self {
        Self {
            hub: Hub::spawn(send_timeout),
            event_users: RwLock::new(HashMap::new()),
            replay,
            per_client_buffer,
        }
    }

    pub fn subscribe_user(&self, user_id: &str, event_id: &str) {
        self.event_users
            .write()
            .unwrap()
            .entry(event_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    pub fn unsubscribe_user(&self, user_id: &str, event_id: &str) {
        if let Some(users) = self.event_users.write().unwrap().get_mut(event_id) {
            users.remove(user_id);
        }
    }

    pub fn unsubscribe_user_from_all(&self, user_id: &str) {
        let mut guard = self.event_users.write().unwrap();
        for users in guard.values_mut() {
            users.remove(user_id);
        }
        guard.retain(|_, users| !users.is_empty());
    }

    async fn push_to_user(&self, user_id: &str, event: OutboundEvent) {
        if let Err(e) = self
            .replay
            .record(user_id, &CachedEvent { id: event.id.clone(), event_type: event.event_type.clone(), data: event.data.clone() })
            .await
        {
            warn!(error = %e, user_id = %user_id, "failed to record event for reconnect replay");
        }
        self.hub.send_to_user(user_id, event).await;
    }

    async fn broadcast(&self, event: OutboundEvent) {
        self.hub.broadcast(event).await;
    }

    /// The one bus consumer: looks up watchers for each incoming seat update under a
    /// read-lock, copies the set, and hands delivery off to the hub.
    pub async fn run_bus_consumer(self: Arc<Self>, bus: SeatEventBus) {
        let stream = match bus.subscribe().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "realtime gateway could not subscribe to the seat event bus");
                return;
            }
        };
        tokio::pin!(stream);

        while let Some(message) = stream.next().await {
            let updates = match message {
                BusMessage::Single(update) => vec![update],
                BusMessage::Batch(batch) => batch.updates,
            };

            for update in updates {
                let watchers: Vec<String> = {
                    let guard = self.event_users.read().unwrap();
                    guard.get(&update.event_id).map(|s| s.iter().cloned().collect()).unwrap_or_default()
                };
                if watchers.is_empty() {
                    continue;
                }

                let data = serde_json::to_string(&update).expect("SeatUpdate always serializes");
                let event = OutboundEvent { id: Uuid::new_v4().to_string(), event_type: "seat_update".to_string(), data };

                debug!(event_id = %update.event_id, watchers = watchers.len(), "fanning out seat update");
                for user_id in watchers {
                    self.push_to_user(&user_id, event.clone()).await;
                }
            }
        }
        warn!("seat event bus stream ended, realtime gateway fan-out is no longer live");
    }
}

#[derive(Debug, Deserialize)]
struct RealtimeQuery {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(default)]
    state: Option<String>,
}

async fn realtime_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RealtimeQuery>,
) -> (HeaderMap, Sse<impl Stream<Item = Result<Event, Infallible>>>) {
    let gateway = state.realtime.clone();
    let (client_id, receiver) = gateway.hub.register(query.user_id.clone(), gateway.per_client_buffer).await;

    let replayed: Vec<Event> = if query.state.as_deref() == Some("reconnect") {
        gateway
            .replay
            .pending_for_user(&query.user_id)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|cached| Event::default().id(cached.id).event(cached.event_type).data(cached.data))
            .collect()
    } else {
        Vec::new()
    };

    let guard = ConnectionGuard { gateway: gateway.clone(), user_id: query.user_id.clone(), client_id };
    let live = GuardedReceiverStream { inner: ReceiverStream::new(receiver), _guard: guard }
        .map(|event| Ok(Event::default().id(event.id).event(event.event_type).data(event.data)));

    // A leading comment event flushes response headers immediately so proxies that buffer
    // until the first byte (nginx et al.) don't hold the connection open with nothing sent.
    let opening = futures::stream::once(async { Ok(Event::default().comment("connected")) });
    let stream = opening.chain(futures::stream::iter(replayed.into_iter().map(Ok))).chain(live);

    let mut headers = HeaderMap::new();
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.config.realtime.sse_keepalive_interval_seconds))
            .text("ping"),
    );

    (headers, sse)
}

struct ConnectionGuard {
    gateway: Arc<RealtimeGateway>,
    user_id: String,
    client_id: ClientId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let gateway = self.gateway.clone();
        let user_id = self.user_id.clone();
        let client_id = self.client_id;
        tokio::spawn(async move {
            gateway.hub.unregister(&user_id, client_id).await;
            gateway.unsubscribe_user_from_all(&user_id);
        });
    }
}

struct GuardedReceiverStream {
    inner: ReceiverStream<OutboundEvent>,
    _guard: ConnectionGuard,
}

impl Stream for GuardedReceiverStream {
    type Item = OutboundEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

#[derive(Debug, Deserialize)]
struct PushMessageRequest {
    #[serde(rename = "userId")]
    user_id: Uuid,
    #[serde(rename = "eventType")]
    event_type: String,
    data: String,
}

async fn push_message(State(state): State<Arc<AppState>>, Json(body): Json<PushMessageRequest>) -> Json<serde_json::Value> {
    let event = OutboundEvent { id: Uuid::new_v4().to_string(), event_type: body.event_type, data: body.data };
    if body.user_id == NIL_USER_ID {
        state.realtime.broadcast(event).await;
    } else {
        state.realtime.push_to_user(&body.user_id.to_string(), event).await;
    }
    Json(serde_json::json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct AckRequest {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "eventId")]
    event_id: String,
}

async fn ack(State(state): State<Arc<AppState>>, Json(body): Json<AckRequest>) -> Json<serde_json::Value> {
    if let Err(e) = state.realtime.replay.ack(&body.user_id, &body.event_id).await {
        warn!(error = %e, event_id = %body.event_id, "failed to acknowledge event in replay cache");
    }
    Json(serde_json::json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct SubscriptionRequest {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "eventId")]
    event_id: String,
}

async fn subscribe(State(state): State<Arc<AppState>>, Json(body): Json<SubscriptionRequest>) -> Json<serde_json::Value> {
    state.realtime.subscribe_user(&body.user_id, &body.event_id);
    Json(serde_json::json!({ "ok": true }))
}

async fn unsubscribe(State(state): State<Arc<AppState>>, Json(body): Json<SubscriptionRequest>) -> Json<serde_json::Value> {
    state.realtime.unsubscribe_user(&body.user_id, &body.event_id);
    Json(serde_json::json!({ "ok": true }))
}
