//! Single-writer hub: один выделенный таск безраздельно владеет картой клиентов и
//! обрабатывает команды register/unregister/send из одной точки — без блокировок,
//! мутация только изнутри цикла. Прямой перенос `hub.go`: Go-каналы стали
//! `tokio::sync::mpsc`, `select` — `tokio::select!`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub type ClientId = u64;

/// Одно событие, которое гейтвей отдаёт клиенту как SSE-фрейм.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub id: String,
    pub event_type: String,
    pub data: String,
}

enum Command {
    Register {
        user_id: String,
        buffer: usize,
        reply: oneshot::Sender<(ClientId, mpsc::Receiver<OutboundEvent>)>,
    },
    Unregister {
        user_id: String,
        client_id: ClientId,
    },
    SendToUser {
        user_id: String,
        event: OutboundEvent,
    },
    Broadcast {
        event: OutboundEvent,
    },
}

/// Хэндл на хаб — дёшево клонируется, все операции идут через один mpsc-канал команд.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
}

struct ClientSlot {
    tx: mpsc::Sender<OutboundEvent>,
}

struct HubState {
    clients: HashMap<String, HashMap<ClientId, ClientSlot>>,
    next_id: ClientId,
}

impl Hub {
    /// Запускает таск-владелец состояния и возвращает дешёвый хэндл на него.
    pub fn spawn(send_timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(256);
        let mut state = HubState { clients: HashMap::new(), next_id: 0 };

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::Register { user_id, buffer, reply } => {
                        let (client_tx, client_rx) = mpsc::channel(buffer);
                        let id = state.next_id;
                        state.next_id += 1;
                        state
                            .clients
                            .entry(user_id.clone())
                            .or_default()
                            .insert(id, ClientSlot { tx: client_tx });
                        debug!(user_id = %user_id, client_id = id, "registered sse client");
                        let _ = reply.send((id, client_rx));
                    }
                    Command::Unregister { user_id, client_id } => {
                        if let Some(clients) = state.clients.get_mut(&user_id) {
                            clients.remove(&client_id);
                            if clients.is_empty() {
                                state.clients.remove(&user_id);
                            }
                        }
                        debug!(user_id = %user_id, client_id = client_id, "unregistered sse client");
                    }
                    Command::SendToUser { user_id, event } => {
                        if let Some(clients) = state.clients.get(&user_id) {
                            for slot in clients.values() {
                                deliver(slot, event.clone(), send_timeout).await;
                            }
                        }
                    }
                    Command::Broadcast { event } => {
                        for clients in state.clients.values() {
                            for slot in clients.values() {
                                deliver(slot, event.clone(), send_timeout).await;
                            }
                        }
                    }
                }
            }
        });

        Self { commands: tx }
    }

    pub async fn register(&self, user_id: impl Into<String>, buffer: usize) -> (ClientId, mpsc::Receiver<OutboundEvent>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .commands
            .send(Command::Register { user_id: user_id.into(), buffer, reply: reply_tx })
            .await;
        reply_rx.await.expect("hub task never drops the reply sender")
    }

    pub async fn unregister(&self, user_id: impl Into<String>, client_id: ClientId) {
        let _ = self
            .commands
            .send(Command::Unregister { user_id: user_id.into(), client_id })
            .await;
    }

    pub async fn send_to_user(&self, user_id: impl Into<String>, event: OutboundEvent) {
        let _ = self
            .commands
            .send(Command::SendToUser { user_id: user_id.into(), event })
            .await;
    }

    pub async fn broadcast(&self, event: OutboundEvent) {
        let _ = self.commands.send(Command::Broadcast { event }).await;
    }
}

/// Доставка с ограничением в 1 секунду: если буфер клиента забит дольше таймаута,
/// сообщение тихо отбрасывается для этого клиента — соединение не рвётся, один
/// залипший таб не должен тормозить вещание на весь концерт.
async fn deliver(slot: &ClientSlot, event: OutboundEvent, timeout: Duration) {
    match tokio::time::timeout(timeout, slot.tx.send(event)).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => warn!("sse client channel closed before send"),
        Err(_) => warn!("sse client send timed out, dropping message for this client"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> OutboundEvent {
        OutboundEvent { id: id.to_string(), event_type: "seat_update".to_string(), data: "{}".to_string() }
    }

    #[tokio::test]
    async fn send_to_user_delivers_to_every_registered_client() {
        let hub = Hub::spawn(Duration::from_millis(200));
        let (_id_a, mut rx_a) = hub.register("alice", 4).await;
        let (_id_b, mut rx_b) = hub.register("alice", 4).await;

        hub.send_to_user("alice", event("e1")).await;

        assert_eq!(rx_a.recv().await.unwrap().id, "e1");
        assert_eq!(rx_b.recv().await.unwrap().id, "e1");
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connected_user() {
        let hub = Hub::spawn(Duration::from_millis(200));
        let (_id_a, mut rx_a) = hub.register("alice", 4).await;
        let (_id_b, mut rx_b) = hub.register("bob", 4).await;

        hub.broadcast(event("e1")).await;

        assert_eq!(rx_a.recv().await.unwrap().id, "e1");
        assert_eq!(rx_b.recv().await.unwrap().id, "e1");
    }

    #[tokio::test]
    async fn unregister_stops_further_delivery_to_that_client() {
        let hub = Hub::spawn(Duration::from_millis(200));
        let (client_id, mut rx) = hub.register("alice", 4).await;
        hub.unregister("alice", client_id).await;

        hub.send_to_user("alice", event("e1")).await;

        // Give the hub task a turn to process send_to_user against the now-empty map.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    /// Scenario 5 (§8): a full per-client buffer drops one message for that client without
    /// tearing the connection down; a later message still gets through.
    #[tokio::test]
    async fn full_buffer_drops_a_message_but_keeps_the_client_connected() {
        let hub = Hub::spawn(Duration::from_millis(30));
        let (_client_id, mut rx) = hub.register("alice", 1).await;

        hub.send_to_user("alice", event("fills-buffer")).await;
        // The buffer (capacity 1) is now full and nobody is draining it; this send must
        // time out and be dropped rather than block the hub task indefinitely.
        hub.send_to_user("alice", event("dropped")).await;

        assert_eq!(rx.recv().await.unwrap().id, "fills-buffer");

        hub.send_to_user("alice", event("delivered-after-drain")).await;
        assert_eq!(rx.recv().await.unwrap().id, "delivered-after-drain");
    }
}
