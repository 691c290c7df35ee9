//! Expiry Watcher — превращает россыпь истёкших ключей Seat Index в редкие пачки
//! SeatUpdateBatch. Окно в 50 мс открывается первым пришедшим ключом и сбрасывается
//! каждым следующим; когда новых ключей не было BatchCoalesceWindow мс, всё накопленное
//! группируется по eventId и улетает на шину одним сообщением на событие.
//!
//! Без этого стовместный тайм-аут на сто мест дал бы сто отдельных publish/broadcast
//! циклов; с ним — один.
//!
//! Вторая половина этого таска слушает истечение liveness-ключей холдов
//! (`reservation:temp:*`) и переводит заголовок в Ticket Journal из PENDING в CANCELLED —
//! иначе он остался бы PENDING навсегда, несмотря на то что Seat Index уже всё забыл.

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::SeatEventBus;
use crate::hold_store::HoldStore;
use crate::models::{BusMessage, SeatStatus, SeatUpdate, SeatUpdateBatch};
use crate::seat_index::SeatIndex;
use crate::ticket_journal::TicketJournal;

pub struct ExpiryWatcher {
    seat_index: SeatIndex,
    hold_store: HoldStore,
    ticket_journal: TicketJournal,
    bus: SeatEventBus,
    coalesce_window: Duration,
}

impl ExpiryWatcher {
    pub fn new(
        seat_index: SeatIndex,
        hold_store: HoldStore,
        ticket_journal: TicketJournal,
        bus: SeatEventBus,
        coalesce_window: Duration,
    ) -> Self {
        Self { seat_index, hold_store, ticket_journal, bus, coalesce_window }
    }

    /// Запускает два независимых цикла наблюдения как отдельные задачи и ждёт оба —
    /// предполагается, что вызывающая сторона запускает это в своей задаче и не ждёт
    /// завершения (оба цикла рассчитаны жить вечно).
    pub async fn run(self) {
        let seat_index = self.seat_index;
        let bus = self.bus;
        let coalesce_window = self.coalesce_window;
        let hold_store = self.hold_store;
        let ticket_journal = self.ticket_journal;

        tokio::join!(
            run_seat_expiry_loop(seat_index, bus, coalesce_window),
            run_temp_expiry_loop(hold_store, ticket_journal),
        );
    }
}

async fn run_seat_expiry_loop(seat_index: SeatIndex, bus: SeatEventBus, coalesce_window: Duration) {
    let stream = match seat_index.subscribe_expiries().await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "expiry watcher could not subscribe to seat expiries, seats will not auto-release visibly");
            return;
        }
    };
    tokio::pin!(stream);

    let mut pending: HashMap<String, Vec<SeatUpdate>> = HashMap::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let sleep = match deadline {
            Some(d) => tokio::time::sleep_until(d),
            None => tokio::time::sleep(Duration::from_secs(3600)),
        };

        tokio::select! {
            maybe_key = stream.next() => {
                match maybe_key {
                    Some((event_id, seat)) => {
                        let update = SeatUpdate::new(event_id.clone(), seat, SeatStatus::Available, now_millis());
                        pending.entry(event_id).or_default().push(update);
                        deadline = Some(Instant::now() + coalesce_window);
                    }
                    None => {
                        warn!("seat expiry stream ended, that half of the expiry watcher is exiting");
                        flush(&bus, &mut pending).await;
                        return;
                    }
                }
            }
            _ = sleep, if deadline.is_some() => {
                flush(&bus, &mut pending).await;
                deadline = None;
            }
        }
    }
}

async fn flush(bus: &SeatEventBus, pending: &mut HashMap<String, Vec<SeatUpdate>>) {
    for (event_id, updates) in pending.drain() {
        debug!(event_id = %event_id, count = updates.len(), "flushing expiry batch");
        let message = BusMessage::Batch(SeatUpdateBatch::new(updates));
        if let Err(e) = bus.publish(&message).await {
            warn!(error = %e, event_id = %event_id, "failed to publish expiry batch");
        }
    }
}

async fn run_temp_expiry_loop(hold_store: HoldStore, ticket_journal: TicketJournal) {
    let stream = match hold_store.subscribe_temp_expiries().await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "expiry watcher could not subscribe to hold expiries, PENDING headers will never be cancelled on timeout");
            return;
        }
    };
    tokio::pin!(stream);

    while let Some((user_id, reservation_id)) = stream.next().await {
        let Ok(reservation_id) = reservation_id.parse::<Uuid>() else {
            warn!(reservation_id = %reservation_id, "hold expiry key carried a malformed reservation id, skipping");
            continue;
        };
        match ticket_journal.cancel_if_pending(reservation_id).await {
            Ok(true) => debug!(user_id = %user_id, reservation_id = %reservation_id, "cancelled pending reservation on hold expiry"),
            Ok(false) => debug!(reservation_id = %reservation_id, "hold expired but header was no longer pending, nothing to do"),
            Err(e) => warn!(error = %e, reservation_id = %reservation_id, "failed to cancel expired reservation header"),
        }
    }
    warn!("hold expiry stream ended, that half of the expiry watcher is exiting");
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
